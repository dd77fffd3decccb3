//! Tracing setup for the operator binary.
//!
//! Everything goes to stderr; stdout is reserved for command output such as
//! `scan --json`. Each self-test poll task runs inside a `session` span, so
//! JSON lines carry the session id and device without repeating them.

use std::time::Duration;

use tokio::time::Instant;
use tracing::Level;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::AppConfig;

#[derive(Debug, Clone, Copy, Default)]
pub struct LogConfig {
    /// JSON lines instead of the human readable format
    pub json: bool,
    /// Default to DEBUG for this crate (one line per poll sample)
    pub verbose: bool,
}

impl From<&AppConfig> for LogConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            json: config.json_logs,
            verbose: config.verbose,
        }
    }
}

/// Filter used when `RUST_LOG` is unset or unparseable.
fn default_directive(verbose: bool) -> String {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    format!("smartctl_wrapper={}", level.as_str().to_lowercase())
}

/// Install the global subscriber. Call once, after the config is loaded.
pub fn init(config: LogConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(config.verbose)));

    let registry = tracing_subscriber::registry().with(env_filter);

    if config.json {
        // A `session` span closes when its self-test ends; the close event
        // records how long the test was polled.
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_current_span(true)
                    .with_target(true),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            )
            .init();
    }
}

/// Lets a repeated log line through at most once per interval.
///
/// Owned by a single poll task. Runs on the tokio clock so paused-time tests
/// see the same behavior as real runs.
#[derive(Debug)]
pub struct LogThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn should_log(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive(false), "smartctl_wrapper=info");
        assert_eq!(default_directive(true), "smartctl_wrapper=debug");
    }

    #[test]
    fn test_log_config_from_app_config() {
        let app = AppConfig {
            json_logs: true,
            ..AppConfig::default()
        };
        let config = LogConfig::from(&app);
        assert!(config.json);
        assert!(!config.verbose);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_opens_again_after_interval() {
        let mut throttle = LogThrottle::new(Duration::from_secs(60));
        assert!(throttle.should_log());
        assert!(!throttle.should_log());

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!throttle.should_log());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(throttle.should_log());
        assert!(!throttle.should_log());
    }
}
