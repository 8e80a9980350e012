/// Logging initialization for the embedding app shell, binaries and tests.
///
/// Called once before the engine is constructed. Respects `RUST_LOG`;
/// defaults to debug for this crate and info elsewhere.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "remed_core=debug,info".into()),
        )
        .try_init();
}
