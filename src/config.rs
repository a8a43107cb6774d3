//! Application-level configuration loading: token lifetimes, session limits and
//! the base URL used in emailed links.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{DurationSeconds, serde_as};
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "TANDEM_BACK_CONFIG_PATH";

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Lifetime of a bearer token issued at login.
    pub auth_token_ttl: Duration,
    /// Lifetime of an email verification token.
    pub verification_ttl: Duration,
    /// Lifetime of a password reset token.
    pub password_reset_ttl: Duration,
    /// Minimum delay between two verification emails.
    pub verification_resend_cooldown: Duration,
    /// Shortest accepted password, in characters.
    pub min_password_len: usize,
    /// Cap on participants per session, admin included.
    pub max_session_participants: usize,
    /// Maximum message length in characters, after trimming.
    pub max_message_len: usize,
    /// Default and maximum number of messages returned by one history page.
    pub message_page_size: usize,
    /// Upper bound for a single session read-plan-write cycle.
    pub transition_timeout: Duration,
    /// Compare-and-swap attempts before a contended update gives up.
    pub max_write_attempts: usize,
    /// Prefix of the links put in verification and reset emails.
    pub public_base_url: String,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    info!(path = %path.display(), "loaded configuration");
                    raw.into()
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            auth_token_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            verification_ttl: Duration::from_secs(24 * 60 * 60),
            password_reset_ttl: Duration::from_secs(60 * 60),
            verification_resend_cooldown: Duration::from_secs(60),
            min_password_len: 6,
            max_session_participants: 16,
            max_message_len: 2000,
            message_page_size: 100,
            transition_timeout: Duration::from_secs(5),
            max_write_attempts: 8,
            public_base_url: "http://localhost:8080".into(),
        }
    }
}

#[serde_as]
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
/// Durations are expressed in seconds; missing keys keep their default.
struct RawConfig {
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    auth_token_ttl_secs: Option<Duration>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    verification_ttl_secs: Option<Duration>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    password_reset_ttl_secs: Option<Duration>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    verification_resend_cooldown_secs: Option<Duration>,
    min_password_len: Option<usize>,
    max_session_participants: Option<usize>,
    max_message_len: Option<usize>,
    message_page_size: Option<usize>,
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    transition_timeout_secs: Option<Duration>,
    max_write_attempts: Option<usize>,
    public_base_url: Option<String>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = Self::default();
        Self {
            auth_token_ttl: value.auth_token_ttl_secs.unwrap_or(defaults.auth_token_ttl),
            verification_ttl: value
                .verification_ttl_secs
                .unwrap_or(defaults.verification_ttl),
            password_reset_ttl: value
                .password_reset_ttl_secs
                .unwrap_or(defaults.password_reset_ttl),
            verification_resend_cooldown: value
                .verification_resend_cooldown_secs
                .unwrap_or(defaults.verification_resend_cooldown),
            min_password_len: value.min_password_len.unwrap_or(defaults.min_password_len),
            max_session_participants: value
                .max_session_participants
                .unwrap_or(defaults.max_session_participants)
                .max(2),
            max_message_len: value.max_message_len.unwrap_or(defaults.max_message_len),
            message_page_size: value
                .message_page_size
                .unwrap_or(defaults.message_page_size)
                .max(1),
            transition_timeout: value
                .transition_timeout_secs
                .unwrap_or(defaults.transition_timeout),
            max_write_attempts: value
                .max_write_attempts
                .unwrap_or(defaults.max_write_attempts)
                .max(1),
            public_base_url: value
                .public_base_url
                .map(|url| url.trim_end_matches('/').to_owned())
                .unwrap_or(defaults.public_base_url),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let raw: RawConfig = serde_json::from_str(
            r#"{ "verification_resend_cooldown_secs": 5, "public_base_url": "https://tandem.example/" }"#,
        )
        .unwrap();
        let config = AppConfig::from(raw);
        assert_eq!(config.verification_resend_cooldown, Duration::from_secs(5));
        assert_eq!(config.public_base_url, "https://tandem.example");
        assert_eq!(config.min_password_len, 6);
        assert_eq!(config.max_message_len, 2000);
    }

    #[test]
    fn limits_are_clamped() {
        let raw: RawConfig =
            serde_json::from_str(r#"{ "max_session_participants": 0, "message_page_size": 0 }"#)
                .unwrap();
        let config = AppConfig::from(raw);
        assert_eq!(config.max_session_participants, 2);
        assert_eq!(config.message_page_size, 1);
    }
}
