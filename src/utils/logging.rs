use tracing_subscriber::EnvFilter;

/// Initialize tracing for binaries embedding the library.
///
/// `RUST_LOG` wins when set; otherwise `default_level` seeds the filter
/// (a bare level like `info`, or any filter directive).
pub fn init(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // try_init so tests and embedders can call this more than once without panicking
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
