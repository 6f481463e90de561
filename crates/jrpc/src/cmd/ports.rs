use std::path::Path;

use jrpc_transport::UnixTransport;

use crate::cmd::PortsArgs;
use crate::exit::{transport_error, CliResult, SUCCESS};
use crate::output::{print_names, OutputFormat};

pub fn run(_args: PortsArgs, dir: &Path, format: OutputFormat) -> CliResult<i32> {
    let ports = UnixTransport::new(dir)
        .ports()
        .map_err(|err| transport_error(&format!("listing {}", dir.display()), err))?;
    print_names("port", &ports, format);
    Ok(SUCCESS)
}
