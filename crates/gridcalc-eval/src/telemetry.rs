//! Log output for embedders without a subscriber of their own.

/// Environment variable holding the filter directives, e.g.
/// `GRIDCALC_LOG=gridcalc_eval=debug`.
pub const LOG_ENV: &str = "GRIDCALC_LOG";

/// Install a global fmt subscriber filtered by [`LOG_ENV`] (default `warn`).
/// Returns `false` when a subscriber is already installed.
#[cfg(feature = "tracing")]
pub fn init_from_env() -> bool {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(not(feature = "tracing"))]
pub fn init_from_env() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn installs_at_most_once() {
        init_from_env();
        assert!(!init_from_env());
    }
}
