//! Tracing initialization.

use std::sync::Once;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static INIT: Once = Once::new();

/// Environment variable holding per-target log directives.
pub const LOG_ENV: &str = "REVDEP_LOG";

/// Initialize the tracing subscriber.
///
/// Reads `REVDEP_LOG` for directives (e.g. `REVDEP_LOG=revdep_core::graph=debug`)
/// and falls back to `revdep_core=<default_level>,revdep=<default_level>`.
///
/// Calling this more than once is a no-op.
pub fn init_tracing(default_level: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| {
            EnvFilter::new(format!("revdep_core={default_level},revdep={default_level}"))
        });

        let _ = tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_writer(std::io::stderr),
            )
            .with(filter)
            .try_init();
    });
}
