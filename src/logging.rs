//! Tracing subscriber setup for binaries and tests embedding the pipeline.
//!
//! Library code only emits `tracing` events; installing a subscriber is left
//! to the host.

use tracing_subscriber::EnvFilter;

pub const LOG_FILTER_ENV: &str = "DYAD_LOG";
const DEFAULT_FILTER: &str = "info";

/// Installs a fmt subscriber filtered by `DYAD_LOG` (default `info`).
///
/// Returns false when a global subscriber was already installed.
pub fn init_logging() -> bool {
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_no_op() {
        init_logging();
        assert!(!init_logging());
    }
}
