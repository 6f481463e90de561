use std::path::Path;
use std::time::Duration;

use jrpc_transport::{Identity, Transport, UnixTransport};
use jrpc_wire::{Conn, Flow, WireConfig, WireError};
use serde_json::Value;

use crate::cmd::CallArgs;
use crate::exit::{timeout, transport_error, wire_error, CliError, CliResult, FAILURE, SUCCESS, USAGE};
use crate::output::{print_reply, OutputFormat};

pub async fn run(args: CallArgs, dir: &Path, format: OutputFormat) -> CliResult<i32> {
    let wait = parse_duration(&args.timeout)?;
    let limit = if args.follow {
        None
    } else {
        Some(args.count.unwrap_or(1))
    };
    if limit == Some(0) {
        return Err(CliError::new(USAGE, "--count must be greater than zero"));
    }

    let mut flow = dial(dir, &args.query, wait).await?;
    let remote = flow.remote_identity().to_string();

    let mut seq = 0usize;
    while limit.is_none_or(|limit| seq < limit) {
        let value = match flow.decode::<Value>().await {
            Ok(value) => value,
            Err(WireError::ConnectionClosed) if seq > 0 && args.follow => break,
            Err(WireError::ConnectionClosed) => {
                return Err(CliError::new(
                    FAILURE,
                    format!("{}: connection closed before a reply (rejected?)", args.query),
                ));
            }
            Err(err) => return Err(wire_error("call failed", err)),
        };
        seq += 1;
        print_reply(&args.query, seq, &value, &remote, format);
    }

    tracing::debug!(query = %args.query, replies = seq, "call finished");
    Ok(SUCCESS)
}

/// Dial `query` with `wait` bounding the dial and every read.
pub async fn dial(dir: &Path, query: &str, wait: Duration) -> CliResult<Flow> {
    let transport = UnixTransport::new(dir);
    let conn = tokio::time::timeout(wait, transport.query(&Identity::anyone(), query))
        .await
        .map_err(|_| timeout("dial failed", wait))?
        .map_err(|err| transport_error("dial failed", err))?;
    let config = WireConfig {
        read_timeout: Some(wait),
        ..WireConfig::default()
    };
    Ok(Flow::from_connection(conn, config))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
