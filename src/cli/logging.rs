//! Logging setup for the binary. Library code only emits `tracing` events.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// `verbosity`: 0 = warnings only, 1 = INFO, 2 = DEBUG, 3+ = TRACE.
/// `json` switches stderr output to one JSON object per line.
///
/// `RUST_LOG` still applies on top of the verbosity level.
pub fn init(verbosity: u8, json: bool) {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"))
        .add_directive(level.into());

    let subscriber = tracing_subscriber::registry().with(filter);
    let result = if json {
        subscriber
            .with(fmt::layer().json().with_current_span(true).with_writer(std::io::stderr))
            .try_init()
    } else {
        subscriber
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };
    if let Err(e) = result {
        eprintln!("nestpm: logging already initialized: {e}");
    }
}
