use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 18790;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:4096";
pub const DEFAULT_BACKEND_USER: &str = "opencode";
pub const DEFAULT_SUBSCRIPTION_CAPACITY: usize = 64;
pub const DEFAULT_BACKOFF_INITIAL_MS: u64 = 1_000;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;
pub const DEFAULT_POLL_LIMITS: [usize; 3] = [10, 50, 200];
pub const DEFAULT_MAX_REPLY_CHARS: usize = 1950;

/// Top-level config (tether.toml + TETHER_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TetherConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            auth: AuthConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub token: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::None,
            token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    Token,
    None,
}

/// Connection settings for the conversational backend server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_backend_url")]
    pub base_url: String,
    /// Basic-auth user name; only sent when `password` is set.
    #[serde(default = "default_backend_user")]
    pub username: String,
    pub password: Option<String>,
    /// Extra system prompt attached to every outbound message.
    pub system_prompt: Option<String>,
    /// Model selector forwarded with every outbound message.
    pub model: Option<ModelSelector>,
    /// Timeout for request/response calls. The event stream has none.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BACKEND_URL.to_string(),
            username: DEFAULT_BACKEND_USER.to_string(),
            password: None,
            system_prompt: None,
            model: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSelector {
    pub provider_id: String,
    pub model_id: String,
}

/// Tuning knobs for the streaming engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Delivery queue slots per subscription.
    #[serde(default = "default_subscription_capacity")]
    pub subscription_capacity: usize,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Escalating history limits used while searching for the anchor message.
    #[serde(default = "default_poll_limits")]
    pub poll_limits: Vec<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            subscription_capacity: DEFAULT_SUBSCRIPTION_CAPACITY,
            backoff_initial_ms: DEFAULT_BACKOFF_INITIAL_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            poll_limits: default_poll_limits(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    #[serde(default = "default_sessions_path")]
    pub path: String,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            path: default_sessions_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    /// Outbound replies are split into chunks no longer than this.
    #[serde(default = "default_max_reply_chars")]
    pub max_reply_chars: usize,
    /// Include reasoning text in rendered replies.
    #[serde(default)]
    pub show_thinking: bool,
    /// Include one summary line per tool call in rendered replies.
    #[serde(default = "bool_true")]
    pub show_tools: bool,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            max_reply_chars: DEFAULT_MAX_REPLY_CHARS,
            show_thinking: false,
            show_tools: true,
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_backend_url() -> String {
    DEFAULT_BACKEND_URL.to_string()
}
fn default_backend_user() -> String {
    DEFAULT_BACKEND_USER.to_string()
}
fn default_request_timeout_secs() -> u64 {
    300
}
fn default_subscription_capacity() -> usize {
    DEFAULT_SUBSCRIPTION_CAPACITY
}
fn default_backoff_initial_ms() -> u64 {
    DEFAULT_BACKOFF_INITIAL_MS
}
fn default_backoff_max_ms() -> u64 {
    DEFAULT_BACKOFF_MAX_MS
}
fn default_poll_limits() -> Vec<usize> {
    DEFAULT_POLL_LIMITS.to_vec()
}
fn default_max_reply_chars() -> usize {
    DEFAULT_MAX_REPLY_CHARS
}
fn default_sessions_path() -> String {
    format!("{}/sessions.json", tether_home())
}

fn tether_home() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.tether", home)
}

impl TetherConfig {
    /// Load config from a TOML file with TETHER_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.tether/tether.toml
    ///
    /// Nested keys are separated by a double underscore in env vars because
    /// field names contain single underscores:
    /// `TETHER_BACKEND__BASE_URL=http://10.0.0.2:4096`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::figment(&path)
            .extract()
            .map_err(|e| crate::error::TetherError::Config(e.to_string()))
    }

    fn figment(path: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("TETHER_").split("__"))
    }
}

fn default_config_path() -> String {
    format!("{}/tether.toml", tether_home())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("absent.toml");
        let config = TetherConfig::load(path.to_str()).expect("load failed");
        assert_eq!(config.gateway.port, DEFAULT_PORT);
        assert_eq!(config.engine.subscription_capacity, 64);
        assert_eq!(config.engine.poll_limits, vec![10, 50, 200]);
        assert_eq!(config.backend.username, "opencode");
        assert!(config.backend.password.is_none());
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tether.toml");
        std::fs::write(
            &path,
            r#"
[backend]
base_url = "http://10.1.2.3:4096"
password = "hunter2"

[backend.model]
provider_id = "anthropic"
model_id = "claude-sonnet-4-5"

[engine]
poll_limits = [5, 25]
"#,
        )
        .expect("write config");

        let config = TetherConfig::load(path.to_str()).expect("load failed");
        assert_eq!(config.backend.base_url, "http://10.1.2.3:4096");
        assert_eq!(config.backend.password.as_deref(), Some("hunter2"));
        assert_eq!(
            config.backend.model,
            Some(ModelSelector {
                provider_id: "anthropic".to_string(),
                model_id: "claude-sonnet-4-5".to_string(),
            })
        );
        assert_eq!(config.engine.poll_limits, vec![5, 25]);
        assert_eq!(config.engine.backoff_max_ms, DEFAULT_BACKOFF_MAX_MS);
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[gateway\nport = ").expect("write config");
        let err = TetherConfig::load(path.to_str()).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}
