//! Structured logging for tests.
//!
//! Events go through the harness's captured writer as JSON, so a failing run
//! shows the phase a scenario reached. `DOCKET_TEST_LOG_LEVEL` overrides the
//! default `debug` filter.

use std::sync::Once;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static INIT: Once = Once::new();

/// Install the test subscriber. Only the first call in a process does
/// anything.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let level =
            std::env::var("DOCKET_TEST_LOG_LEVEL").unwrap_or_else(|_| "debug".to_string());
        let filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("debug"));

        // Another subscriber may already be installed by the harness.
        let _ = tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_test_writer()
                    .with_file(true)
                    .with_line_number(true)
                    .json(),
            )
            .with(filter)
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice() {
        init_test_logging();
        init_test_logging();
        tracing::info!(test = "test_init_twice", phase = "verify");
    }
}
