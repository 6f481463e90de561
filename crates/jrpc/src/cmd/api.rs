use std::path::Path;

use jrpc_router::API_ROUTE;
use jrpc_wire::{Conn, WireError};

use crate::cmd::call::{dial, parse_duration};
use crate::cmd::ApiArgs;
use crate::exit::{wire_error, CliError, CliResult, FAILURE, SUCCESS};
use crate::output::{print_names, OutputFormat};

pub async fn run(args: ApiArgs, dir: &Path, format: OutputFormat) -> CliResult<i32> {
    let wait = parse_duration(&args.timeout)?;
    let query = format!("{}.{API_ROUTE}", args.port);
    let mut flow = dial(dir, &query, wait).await?;
    let routes = match flow.decode::<Vec<String>>().await {
        Ok(routes) => routes,
        Err(WireError::ConnectionClosed) => {
            return Err(CliError::new(
                FAILURE,
                format!("{}: connection closed before a reply", args.port),
            ));
        }
        Err(err) => return Err(wire_error("api failed", err)),
    };
    print_names("route", &routes, format);
    Ok(SUCCESS)
}
