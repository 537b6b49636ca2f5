// ============================================
// winusb-maker - logging.rs
// ============================================
// Log output for the command line: tracing events go to stderr, filtered
// by WINUSB_LOG or the --verbose flag.
// ============================================

use std::env;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding a tracing filter, e.g. `WINUSB_LOG=winusb_maker=trace`.
pub const LOG_ENV: &str = "WINUSB_LOG";

/// Install the stderr subscriber. Call once, first thing in main.
///
/// `WINUSB_LOG` wins over `--verbose` when both are set.
pub fn init_logger(verbose: bool, no_color: bool) {
    let filter = env::var(LOG_ENV).unwrap_or_else(|_| default_directive(verbose).to_string());

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose)
                .without_time()
                .with_ansi(!no_color),
        )
        .with(EnvFilter::new(filter))
        .init();
}

fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "info"
    }
}
