//! SDK Configuration Settings
//!
//! Configuration types loaded from environment variables.

use std::time::Duration;

use crate::application::services::reconnect::BackoffConfig;
use crate::application::services::stream::StreamConfig;

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is not set.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// A required environment variable is set but empty.
    #[error("environment variable is empty: {0}")]
    EmptyValue(String),
}

/// API auth token with a redacted debug representation.
#[derive(Clone)]
pub struct AuthToken(String);

impl AuthToken {
    /// Wrap a token value.
    #[must_use]
    pub const fn new(token: String) -> Self {
        Self(token)
    }

    /// Get the token value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AuthToken").field(&"[REDACTED]").finish()
    }
}

/// Stream connection settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before the stream fails (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Capacity of the outbound command channel.
    pub command_capacity: usize,
    /// Budget for subscribe acknowledgments and trade responses.
    pub request_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(60),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 0, // Unlimited
            command_capacity: 256,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&StreamSettings> for StreamConfig {
    fn from(settings: &StreamSettings) -> Self {
        Self {
            backoff: BackoffConfig {
                initial_delay: settings.reconnect_delay_initial,
                max_delay: settings.reconnect_delay_max,
                multiplier: settings.reconnect_delay_multiplier,
                jitter_factor: 0.1, // Default jitter
                max_attempts: settings.max_reconnect_attempts,
            },
            command_capacity: settings.command_capacity,
            request_timeout: settings.request_timeout,
        }
    }
}

/// Default budgets for blocking waits.
#[derive(Debug, Clone)]
pub struct WaitSettings {
    /// Budget for `wait_deployed`.
    pub deploy_timeout: Duration,
    /// Budget for `wait_connected`.
    pub connect_timeout: Duration,
    /// Budget for `wait_synchronized`.
    pub synchronize_timeout: Duration,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            deploy_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(300),
            synchronize_timeout: Duration::from_secs(300),
        }
    }
}

/// Complete SDK configuration.
#[derive(Debug, Clone)]
pub struct SdkConfig {
    /// API auth token.
    pub token: AuthToken,
    /// Account to synchronize.
    pub account_id: String,
    /// Provisioning API base URL.
    pub provisioning_url: String,
    /// Terminal stream WebSocket base URL.
    pub stream_url: String,
    /// Stream connection settings.
    pub stream: StreamSettings,
    /// Wait budgets.
    pub waits: WaitSettings,
}

impl SdkConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing
    /// or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        let token = std::env::var("TERMINAL_TOKEN")
            .map_err(|_| ConfigError::MissingEnvVar("TERMINAL_TOKEN".to_string()))?;
        if token.is_empty() {
            return Err(ConfigError::EmptyValue("TERMINAL_TOKEN".to_string()));
        }

        let account_id = std::env::var("TERMINAL_ACCOUNT_ID")
            .map_err(|_| ConfigError::MissingEnvVar("TERMINAL_ACCOUNT_ID".to_string()))?;
        if account_id.is_empty() {
            return Err(ConfigError::EmptyValue("TERMINAL_ACCOUNT_ID".to_string()));
        }

        let provisioning_url = std::env::var("TERMINAL_API_URL")
            .unwrap_or_else(|_| "https://provisioning.meridian.dev".to_string());
        let stream_url = std::env::var("TERMINAL_STREAM_URL")
            .unwrap_or_else(|_| "wss://stream.meridian.dev".to_string());

        let defaults = StreamSettings::default();
        let stream = StreamSettings {
            reconnect_delay_initial: parse_env_duration_millis(
                "TERMINAL_RECONNECT_DELAY_INITIAL_MS",
                defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_env_duration_secs(
                "TERMINAL_RECONNECT_DELAY_MAX_SECS",
                defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse_env_f64(
                "TERMINAL_RECONNECT_DELAY_MULTIPLIER",
                defaults.reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: parse_env_u32(
                "TERMINAL_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
            command_capacity: parse_env_usize(
                "TERMINAL_COMMAND_CAPACITY",
                defaults.command_capacity,
            ),
            request_timeout: parse_env_duration_secs(
                "TERMINAL_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout,
            ),
        };

        let wait_defaults = WaitSettings::default();
        let waits = WaitSettings {
            deploy_timeout: parse_env_duration_secs(
                "TERMINAL_DEPLOY_TIMEOUT_SECS",
                wait_defaults.deploy_timeout,
            ),
            connect_timeout: parse_env_duration_secs(
                "TERMINAL_CONNECT_TIMEOUT_SECS",
                wait_defaults.connect_timeout,
            ),
            synchronize_timeout: parse_env_duration_secs(
                "TERMINAL_SYNCHRONIZE_TIMEOUT_SECS",
                wait_defaults.synchronize_timeout,
            ),
        };

        Ok(Self {
            token: AuthToken::new(token),
            account_id,
            provisioning_url,
            stream_url,
            stream,
            waits,
        })
    }
}

fn parse_env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn parse_env_f64(name: &str, default: f64) -> f64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_millis(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .map_or(default, Duration::from_millis)
}

fn parse_env_duration_secs(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .map_or(default, Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_token_debug_is_redacted() {
        let token = AuthToken::new("super-secret".to_string());
        let debug = format!("{token:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("REDACTED"));
        assert_eq!(token.as_str(), "super-secret");
    }

    #[test]
    fn stream_settings_map_onto_stream_config() {
        let settings = StreamSettings {
            reconnect_delay_initial: Duration::from_millis(250),
            reconnect_delay_max: Duration::from_secs(10),
            reconnect_delay_multiplier: 3.0,
            max_reconnect_attempts: 7,
            command_capacity: 64,
            request_timeout: Duration::from_secs(5),
        };

        let config = StreamConfig::from(&settings);

        assert_eq!(config.backoff.initial_delay, Duration::from_millis(250));
        assert_eq!(config.backoff.max_delay, Duration::from_secs(10));
        assert_eq!(config.backoff.max_attempts, 7);
        assert_eq!(config.command_capacity, 64);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn default_stream_settings_retry_forever() {
        assert_eq!(StreamSettings::default().max_reconnect_attempts, 0);
    }
}
