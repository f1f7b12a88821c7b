//! Matchmaking service configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default bind address for the WebSocket gateway and admin API.
pub const DEFAULT_HTTP_BIND_ADDRESS: &str = "0.0.0.0:3000";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default prefix for every key in the shared store.
pub const DEFAULT_KEY_PREFIX: &str = "blinddate";

/// Default retention of room, member, choice and match keys (24h).
pub const DEFAULT_ROOM_TTL_SECONDS: u64 = 86_400;

/// Default delay after each introductory message.
pub const DEFAULT_INTRO_DELAY_MS: u64 = 2_000;

/// Default wait between a prompt and re-enabling chat.
pub const DEFAULT_PROMPT_SETTLE_MS: u64 = 5_000;

/// Default chat window per prompt (3 minutes).
pub const DEFAULT_CHAT_DURATION_MS: u64 = 180_000;

/// Default window for casting choices after the roster is shown.
pub const DEFAULT_CHOICE_WINDOW_MS: u64 = 12_000;

/// Default number of discussion prompts per room.
pub const DEFAULT_PROMPT_COUNT: usize = 3;

/// Default display name of the system host.
pub const DEFAULT_HOST_NAME: &str = "Cupid";

/// Default title for chatrooms created on a match.
pub const DEFAULT_CHATROOM_TITLE: &str = "Blind Date";

/// Default instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "mm";

/// Timings and text settings for the per-room choreography.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoreographyConfig {
    /// Delay after each introductory system message.
    pub intro_delay: Duration,
    /// Wait after a prompt before chat is thawed.
    pub prompt_settle: Duration,
    /// Chat time per prompt.
    pub chat_duration: Duration,
    /// Time allowed for choices after the roster is broadcast.
    pub choice_window: Duration,
    /// Number of prompts drawn from the pool.
    pub prompt_count: usize,
    /// Display name used as the sender of system messages.
    pub host_name: String,
}

impl Default for ChoreographyConfig {
    fn default() -> Self {
        Self {
            intro_delay: Duration::from_millis(DEFAULT_INTRO_DELAY_MS),
            prompt_settle: Duration::from_millis(DEFAULT_PROMPT_SETTLE_MS),
            chat_duration: Duration::from_millis(DEFAULT_CHAT_DURATION_MS),
            choice_window: Duration::from_millis(DEFAULT_CHOICE_WINDOW_MS),
            prompt_count: DEFAULT_PROMPT_COUNT,
            host_name: DEFAULT_HOST_NAME.to_string(),
        }
    }
}

/// Matchmaking service configuration.
///
/// Loaded from environment variables with sensible defaults.
/// Sensitive fields are redacted in Debug output.
#[derive(Clone)]
pub struct Config {
    /// Redis connection URL (shared state and queue lanes).
    /// Protected by `SecretString` since it may embed a password.
    pub redis_url: SecretString,

    /// WebSocket gateway and admin API bind address (default: "0.0.0.0:3000").
    pub http_bind_address: String,

    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Unique identifier for this instance (log correlation only).
    pub instance_id: String,

    /// Prefix for every key in the shared store.
    pub key_prefix: String,

    /// TTL applied to room, member, connection, choice and match keys.
    pub room_ttl: Duration,

    /// Choreography timings.
    pub choreography: ChoreographyConfig,

    /// Chatroom service endpoint (full URL of the create-room call).
    pub chatroom_endpoint: String,

    /// Bearer token for the chatroom service.
    pub chatroom_token: SecretString,

    /// Title given to created chatrooms.
    pub chatroom_title: String,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("redis_url", &"[REDACTED]")
            .field("http_bind_address", &self.http_bind_address)
            .field("health_bind_address", &self.health_bind_address)
            .field("instance_id", &self.instance_id)
            .field("key_prefix", &self.key_prefix)
            .field("room_ttl", &self.room_ttl)
            .field("choreography", &self.choreography)
            .field("chatroom_endpoint", &self.chatroom_endpoint)
            .field("chatroom_token", &"[REDACTED]")
            .field("chatroom_title", &self.chatroom_title)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

fn required(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    vars.get(name)
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

fn millis_or(vars: &HashMap<String, String>, name: &str, default_ms: u64) -> Duration {
    Duration::from_millis(
        vars.get(name)
            .and_then(|s| s.parse().ok())
            .unwrap_or(default_ms),
    )
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let redis_url = SecretString::from(required(vars, "REDIS_URL")?);
        let chatroom_token = SecretString::from(required(vars, "CHATROOM_TOKEN")?);

        let chatroom_endpoint = required(vars, "CHATROOM_ENDPOINT")?;
        if !chatroom_endpoint.starts_with("http://") && !chatroom_endpoint.starts_with("https://")
        {
            return Err(ConfigError::InvalidValue(format!(
                "CHATROOM_ENDPOINT must be an http(s) URL, got '{chatroom_endpoint}'"
            )));
        }

        let http_bind_address = vars
            .get("MATCH_HTTP_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HTTP_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("MATCH_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let key_prefix = vars
            .get("MATCH_KEY_PREFIX")
            .cloned()
            .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string());

        let room_ttl = Duration::from_secs(
            vars.get("MATCH_ROOM_TTL_SECONDS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_ROOM_TTL_SECONDS),
        );

        let prompt_count = vars
            .get("MATCH_PROMPT_COUNT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PROMPT_COUNT);

        let choreography = ChoreographyConfig {
            intro_delay: millis_or(vars, "MATCH_INTRO_DELAY_MS", DEFAULT_INTRO_DELAY_MS),
            prompt_settle: millis_or(vars, "MATCH_PROMPT_SETTLE_MS", DEFAULT_PROMPT_SETTLE_MS),
            chat_duration: millis_or(vars, "MATCH_CHAT_DURATION_MS", DEFAULT_CHAT_DURATION_MS),
            choice_window: millis_or(vars, "MATCH_CHOICE_WINDOW_MS", DEFAULT_CHOICE_WINDOW_MS),
            prompt_count,
            host_name: vars
                .get("MATCH_HOST_NAME")
                .cloned()
                .unwrap_or_else(|| DEFAULT_HOST_NAME.to_string()),
        };

        let chatroom_title = vars
            .get("CHATROOM_TITLE")
            .cloned()
            .unwrap_or_else(|| DEFAULT_CHATROOM_TITLE.to_string());

        let instance_id = vars.get("MATCH_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_INSTANCE_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            redis_url,
            http_bind_address,
            health_bind_address,
            instance_id,
            key_prefix,
            room_ttl,
            choreography,
            chatroom_endpoint,
            chatroom_token,
            chatroom_title,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::secret::ExposeSecret;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([
            (
                "REDIS_URL".to_string(),
                "redis://localhost:6379".to_string(),
            ),
            (
                "CHATROOM_ENDPOINT".to_string(),
                "http://chat.local/api/rooms".to_string(),
            ),
            ("CHATROOM_TOKEN".to_string(), "chat-token-123".to_string()),
        ])
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&base_vars()).expect("Config should load successfully");

        assert_eq!(config.redis_url.expose_secret(), "redis://localhost:6379");
        assert_eq!(config.http_bind_address, DEFAULT_HTTP_BIND_ADDRESS);
        assert_eq!(config.health_bind_address, DEFAULT_HEALTH_BIND_ADDRESS);
        assert_eq!(config.key_prefix, DEFAULT_KEY_PREFIX);
        assert_eq!(config.room_ttl, Duration::from_secs(86_400));
        assert_eq!(config.choreography, ChoreographyConfig::default());
        assert_eq!(config.choreography.choice_window, Duration::from_secs(12));
        assert_eq!(config.chatroom_title, DEFAULT_CHATROOM_TITLE);
        assert!(config.instance_id.starts_with("mm-"));
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let mut vars = base_vars();
        vars.insert(
            "MATCH_HTTP_BIND_ADDRESS".to_string(),
            "127.0.0.1:3001".to_string(),
        );
        vars.insert("MATCH_KEY_PREFIX".to_string(), "event-7".to_string());
        vars.insert("MATCH_ROOM_TTL_SECONDS".to_string(), "3600".to_string());
        vars.insert("MATCH_INTRO_DELAY_MS".to_string(), "10".to_string());
        vars.insert("MATCH_PROMPT_SETTLE_MS".to_string(), "20".to_string());
        vars.insert("MATCH_CHAT_DURATION_MS".to_string(), "30".to_string());
        vars.insert("MATCH_CHOICE_WINDOW_MS".to_string(), "40".to_string());
        vars.insert("MATCH_PROMPT_COUNT".to_string(), "5".to_string());
        vars.insert("MATCH_HOST_NAME".to_string(), "Host".to_string());
        vars.insert("MATCH_INSTANCE_ID".to_string(), "mm-custom-001".to_string());

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.http_bind_address, "127.0.0.1:3001");
        assert_eq!(config.key_prefix, "event-7");
        assert_eq!(config.room_ttl, Duration::from_secs(3600));
        assert_eq!(config.choreography.intro_delay, Duration::from_millis(10));
        assert_eq!(config.choreography.prompt_settle, Duration::from_millis(20));
        assert_eq!(config.choreography.chat_duration, Duration::from_millis(30));
        assert_eq!(config.choreography.choice_window, Duration::from_millis(40));
        assert_eq!(config.choreography.prompt_count, 5);
        assert_eq!(config.choreography.host_name, "Host");
        assert_eq!(config.instance_id, "mm-custom-001");
    }

    #[test]
    fn test_invalid_numbers_fall_back_to_defaults() {
        let mut vars = base_vars();
        vars.insert("MATCH_CHAT_DURATION_MS".to_string(), "soon".to_string());
        vars.insert("MATCH_PROMPT_COUNT".to_string(), "-1".to_string());

        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(
            config.choreography.chat_duration,
            Duration::from_millis(DEFAULT_CHAT_DURATION_MS)
        );
        assert_eq!(config.choreography.prompt_count, DEFAULT_PROMPT_COUNT);
    }

    #[test]
    fn test_missing_redis_url() {
        let mut vars = base_vars();
        vars.remove("REDIS_URL");

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "REDIS_URL"));
    }

    #[test]
    fn test_missing_chatroom_token() {
        let mut vars = base_vars();
        vars.remove("CHATROOM_TOKEN");

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "CHATROOM_TOKEN"));
    }

    #[test]
    fn test_chatroom_endpoint_must_be_http() {
        let mut vars = base_vars();
        vars.insert("CHATROOM_ENDPOINT".to_string(), "chat.local".to_string());

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut vars = base_vars();
        vars.insert(
            "REDIS_URL".to_string(),
            "redis://:supersecret@redis:6379".to_string(),
        );

        let config = Config::from_vars(&vars).unwrap();
        let debug_output = format!("{config:?}");

        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("supersecret"));
        assert!(!debug_output.contains("chat-token-123"));
        assert!(debug_output.contains("http://chat.local/api/rooms"));
    }
}
