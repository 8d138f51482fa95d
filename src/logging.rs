//! Tracing subscriber setup for binaries and tests

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter, e.g. `model_zoo=debug`
pub const LOG_ENV: &str = "MODEL_ZOO_LOG";

/// Install a formatting subscriber filtered by `MODEL_ZOO_LOG` (default
/// `warn`). Calling it again, or after another subscriber was installed, is
/// a no-op.
pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
}
