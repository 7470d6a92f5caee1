//! # Logging
//!
//! Tracing subscriber setup.
//!
//! `RUST_LOG` takes precedence; otherwise the configured level applies to this crate
//! only. `LOG_FORMAT=json` (default) emits one JSON object per event including the
//! current span, anything else emits human-readable text.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter for a given level, scoped to this crate
#[must_use]
pub fn default_filter(log_level: &str) -> String {
    format!(
        "secret_share_controller={}",
        log_level.trim().to_ascii_lowercase()
    )
}

/// Install the global subscriber; a second call is a no-op
pub fn init_tracing(log_level: &str, log_format: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(log_level)));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(false),
            )
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    if let Err(e) = result {
        tracing::warn!("Tracing subscriber already initialized: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_is_crate_scoped() {
        assert_eq!(default_filter("INFO"), "secret_share_controller=info");
        assert_eq!(default_filter(" Debug "), "secret_share_controller=debug");
    }
}
