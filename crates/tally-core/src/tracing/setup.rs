//! Tracing initialization.

use std::sync::Once;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable holding the log filter.
pub const LOG_ENV_VAR: &str = "TALLY_LOG";

/// Filter used when `TALLY_LOG` is unset or invalid: stage timings, run
/// starts and dispatched notifications, without per-query debug lines.
pub const DEFAULT_LOG_FILTER: &str = "tally_core=info,tally_warehouse=info,tally_notify=info";

static INIT: Once = Once::new();

/// Install the global subscriber for Tally's crates.
///
/// `TALLY_LOG` takes `EnvFilter` directives, e.g.
/// `TALLY_LOG=tally_warehouse::pipeline=debug` to see each metric group of
/// a pipeline run, or `tally_notify=debug` to see memoized alerts that were
/// skipped. Only the first call installs anything, and an already installed
/// global subscriber (a test harness, an embedding service) is left alone.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

        let _ = tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true),
            )
            .with(filter)
            .try_init();
    });
}
