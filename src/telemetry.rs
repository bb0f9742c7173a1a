use tracing_subscriber::{prelude::*, EnvFilter, Registry};

/// Default filter when RUST_LOG is unset: our crate at debug, the noisy
/// kube/hyper layers at info.
const DEFAULT_DIRECTIVES: &str = "info,controller=debug";

/// Initialize tracing
pub async fn init() {
    // Setup tracing layers
    let logger = tracing_subscriber::fmt::layer().compact();
    let env_filter = EnvFilter::try_from_default_env()
        .or(EnvFilter::try_new(DEFAULT_DIRECTIVES))
        .unwrap();

    let collector = Registry::default().with(logger).with(env_filter);

    // Initialize tracing
    tracing::subscriber::set_global_default(collector).unwrap();
}
