//! Logging initialization for hosts that do not install their own subscriber.

/// Install an env-filtered fmt subscriber. Respects `RUST_LOG` when set,
/// falling back to the given default filter. Does nothing if a global
/// subscriber is already installed.
pub fn init(default_filter: &str) {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string());
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .try_init()
        .ok();
}
