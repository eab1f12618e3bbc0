//! Process-wide tracing setup.

use tracing_subscriber::EnvFilter;

/// Installs a compact `fmt` subscriber filtered by `RUST_LOG`, falling back
/// to `default_directive` (e.g. `"info,squadforge_lobby=debug"`).
///
/// Calling it again, or after another subscriber was installed, is a no-op.
pub fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();

    if installed.is_ok() {
        tracing::debug!("tracing initialised");
    }
}
