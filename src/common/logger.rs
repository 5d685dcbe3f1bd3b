use tracing_subscriber::EnvFilter;

/// Install the process-wide fmt subscriber. `RUST_LOG` takes precedence over
/// `level`. Workers inherit the subscriber across fork, so this runs once in
/// the parent before the pool starts.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    // A second install (tests, embedding apps) is not an error.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
