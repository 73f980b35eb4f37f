//! Process-wide tracing subscriber installation. Library code never installs
//! a subscriber itself; only a binary entry point calls [`init`].

use tracing_subscriber::EnvFilter;

/// Install a `tracing-subscriber` formatter honoring `RUST_LOG` (defaulting
/// to `info` when unset). Safe to call at most once per process.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
