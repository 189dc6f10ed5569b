use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the tracing subscriber for hosts (and tests) that do not bring
/// their own. Honors `RUST_LOG`, defaulting to `info` for this crate.
/// Calling it more than once is harmless.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("larder=info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
