//! # Structured Logging Module
//!
//! Environment-aware structured logging for debugging concurrent scheduler and
//! orchestrator behavior. Console output is human-readable; setting
//! `LEARNWORDS_LOG_JSON=1` switches to JSON lines for log shippers.

use std::sync::OnceLock;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize the global tracing subscriber once.
///
/// Safe to call from multiple entry points (tests, embedding web layer); later
/// calls are no-ops, and an already-installed global subscriber is tolerated.
pub fn init() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_env("LEARNWORDS_LOG")
            .unwrap_or_else(|_| EnvFilter::new(default_log_level(&environment)));

        let json_output = std::env::var("LEARNWORDS_LOG_JSON")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let result = if json_output {
            tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_ansi(false)
                        .with_filter(filter),
                )
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_level(true)
                        .with_filter(filter),
                )
                .try_init()
        };

        if result.is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing");
        }

        tracing::info!(
            environment = %environment,
            json = json_output,
            "🔧 Structured logging initialized"
        );
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("LEARNWORDS_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Default log level based on environment
fn default_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}
