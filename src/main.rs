//! mini-relay: a line-delimited TCP broadcast relay
//!
//! Every client's complete lines are rebroadcast to every other connected
//! client, prefixed with the sender's sequential id. Joins and departures
//! are announced the same way.
//!
//! Features:
//! - Single-threaded readiness loop (epoll/kqueue via mio)
//! - Partial-line buffering across arbitrarily fragmented reads
//! - Loopback-only listener with address/port reuse
//! - Configuration via CLI arguments or TOML file

mod config;
mod runtime;

use config::{is_informational, Config, ConfigError, USAGE_MESSAGE};
use std::io::Write;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const FATAL_ERROR: &str = "Fatal error\n";

fn main() -> ExitCode {
    // Load configuration
    let config = match Config::load() {
        Ok(config) => config,
        Err(ConfigError::Usage(e)) if is_informational(&e) => e.exit(),
        Err(ConfigError::Usage(_)) => return fail(USAGE_MESSAGE),
        Err(e) => {
            init_logging("info");
            error!(error = %e, "Failed to load configuration");
            return fail(FATAL_ERROR);
        }
    };

    init_logging(&config.log_level);

    info!(
        addr = %config.listen_addr(),
        read_chunk_size = config.read_chunk_size,
        event_capacity = config.event_capacity,
        "Starting mini-relay"
    );

    match runtime::run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Relay stopped");
            fail(FATAL_ERROR)
        }
    }
}

/// Initialize logging on stderr.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn fail(message: &str) -> ExitCode {
    let _ = std::io::stderr().write_all(message.as_bytes());
    ExitCode::FAILURE
}
