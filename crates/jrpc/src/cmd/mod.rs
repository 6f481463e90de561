use std::path::Path;

use clap::{Args, Subcommand};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod api;
pub mod call;
pub mod ports;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the demo router until interrupted.
    Serve(ServeArgs),
    /// Send one query and print the replies.
    Call(CallArgs),
    /// List the routes a router exposes.
    Api(ApiArgs),
    /// List the ports registered in the socket directory.
    Ports(PortsArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, dir: &Path, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, dir).await,
        Command::Call(args) => call::run(args, dir, format).await,
        Command::Api(args) => api::run(args, dir, format).await,
        Command::Ports(args) => ports::run(args, dir, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Port to register the demo router on.
    #[arg(long, default_value = "demo")]
    pub port: String,
    /// Mirror every frame to the log at debug level.
    #[arg(long)]
    pub trace: bool,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Query line, e.g. `demo.add 2 3` or `demo.add[2,3]`.
    pub query: String,
    /// Number of reply frames to read before exiting.
    #[arg(long, conflicts_with = "follow")]
    pub count: Option<usize>,
    /// Keep printing replies until the stream closes.
    #[arg(long)]
    pub follow: bool,
    /// Maximum time to wait for each reply (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct ApiArgs {
    /// Router port to ask.
    pub port: String,
    /// Maximum time to wait for the reply (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug, Default)]
pub struct PortsArgs {}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
