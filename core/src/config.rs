use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides `upstream.api_key`
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Relay server configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default)]
    pub allow_lan_access: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            allow_lan_access: false,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        let host = if self.allow_lan_access {
            "0.0.0.0"
        } else {
            self.host.as_str()
        };
        format!("{}:{}", host, self.port)
    }
}

/// Where the upstream credential travels on each call
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthScheme {
    /// `?key=<credential>`
    Query,
    /// `x-goog-api-key: <credential>`
    Header,
}

impl Default for AuthScheme {
    fn default() -> Self {
        Self::Query
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default)]
    pub auth_scheme: AuthScheme,

    /// Seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Seconds, covers the whole exchange including the streamed body
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    #[serde(default)]
    pub proxy_url: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            auth_scheme: AuthScheme::default(),
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
            proxy_url: None,
        }
    }
}

// Keeps the credential out of logs.
impl std::fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("auth_scheme", &self.auth_scheme)
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("proxy_url", &self.proxy_url)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Bounded handoff between the upstream reader and the client writer
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Seconds to wait for the next upstream record before giving up
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            idle_timeout: default_idle_timeout(),
        }
    }
}

impl RelayConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default value functions
fn default_port() -> u16 { 8080 }
fn default_host() -> String { "127.0.0.1".to_string() }
fn default_base_url() -> String { "https://generativelanguage.googleapis.com/v1beta".to_string() }
fn default_connect_timeout() -> u64 { 20 }
fn default_request_timeout() -> u64 { 600 }
fn default_channel_capacity() -> usize { 64 }
fn default_idle_timeout() -> u64 { 120 }
fn default_log_level() -> String { "info".to_string() }

impl Config {
    /// Fold environment overrides into the file configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_api_key_override(std::env::var(API_KEY_ENV).ok());
    }

    fn apply_api_key_override(&mut self, value: Option<String>) {
        if let Some(key) = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
            self.upstream.api_key = key;
        }
    }

    /// The relay must not serve traffic without an upstream credential.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.upstream.api_key.trim().is_empty() {
            anyhow::bail!(
                "No upstream credential configured: set {} or upstream.api_key",
                API_KEY_ENV
            );
        }
        if self.relay.channel_capacity == 0 {
            anyhow::bail!("relay.channel_capacity must be at least 1");
        }
        if self.relay.idle_timeout == 0 {
            anyhow::bail!("relay.idle_timeout must be at least 1 second");
        }
        if self.upstream.connect_timeout == 0 || self.upstream.request_timeout == 0 {
            anyhow::bail!("upstream.connect_timeout and upstream.request_timeout must be at least 1 second");
        }
        Ok(())
    }
}

/// Mask all but the last four characters of a secret.
pub fn redact(secret: &str) -> String {
    if secret.is_empty() {
        return "<unset>".to_string();
    }
    let tail: String = secret
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("****{}", tail)
}

/// Get default config file path
/// Uses ~/.config/gemini-relay/config.toml
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("gemini-relay")
        .join("config.toml")
}

/// Pick the config file to read, or `None` for built-in defaults.
///
/// Lookup order:
/// 1. Specified path (must exist)
/// 2. ./config.toml (if exists)
/// 3. default_config_path() (usually ~/.config/gemini-relay/config.toml)
///
/// Does not log: it runs before the subscriber is installed.
pub fn resolve_config_path(path: Option<PathBuf>) -> anyhow::Result<Option<PathBuf>> {
    if let Some(config_path) = path {
        if !config_path.exists() {
            anyhow::bail!("Specified config file not found: {:?}", config_path);
        }
        return Ok(Some(config_path));
    }

    let local_config = PathBuf::from("config.toml");
    if local_config.exists() {
        return Ok(Some(local_config));
    }

    let default_path = default_config_path();
    Ok(default_path.exists().then_some(default_path))
}

/// Read `path` (or defaults when `None`) and apply environment overrides on top.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let mut config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {:?}", path))?;
            toml::from_str::<Config>(&content).with_context(|| format!("Failed to parse config file {:?}", path))?
        }
        None => Config::default(),
    };
    config.apply_env_overrides();
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_file() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.bind_address(), "127.0.0.1:8080");
        assert_eq!(config.upstream.auth_scheme, AuthScheme::Query);
        assert_eq!(config.relay.channel_capacity, 64);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_sections() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 9000
            allow_lan_access = true

            [upstream]
            api_key = "abc"
            auth_scheme = "header"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.bind_address(), "0.0.0.0:9000");
        assert_eq!(config.upstream.auth_scheme, AuthScheme::Header);
        assert_eq!(config.upstream.request_timeout, 600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_credential_is_rejected() {
        let config = Config::default();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains(API_KEY_ENV));
    }

    #[test]
    fn test_zero_limits_are_rejected() {
        let mut base = Config::default();
        base.upstream.api_key = "k".to_string();
        assert!(base.validate().is_ok());

        let mut config = base.clone();
        config.relay.channel_capacity = 0;
        assert!(config.validate().unwrap_err().to_string().contains("channel_capacity"));

        let mut config = base.clone();
        config.relay.idle_timeout = 0;
        assert!(config.validate().unwrap_err().to_string().contains("idle_timeout"));

        let mut config = base.clone();
        config.upstream.request_timeout = 0;
        assert!(config.validate().unwrap_err().to_string().contains("request_timeout"));

        let mut config = base;
        config.upstream.connect_timeout = 0;
        assert!(config.validate().unwrap_err().to_string().contains("connect_timeout"));
    }

    #[test]
    fn test_env_key_overrides_file() {
        let mut config = Config::default();
        config.upstream.api_key = "from-file".to_string();

        config.apply_api_key_override(Some("  ".to_string()));
        assert_eq!(config.upstream.api_key, "from-file");

        config.apply_api_key_override(Some("from-env".to_string()));
        assert_eq!(config.upstream.api_key, "from-env");
    }

    fn scratch_file(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("gemini-relay-{}-{}.toml", name, std::process::id()));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_explicit_path_wins_and_must_exist() {
        let path = scratch_file("explicit", "[server]\nport = 9555\n");
        assert_eq!(resolve_config_path(Some(path.clone())).unwrap(), Some(path.clone()));

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.server.port, 9555);
        std::fs::remove_file(&path).unwrap();

        assert!(resolve_config_path(Some(path)).is_err());
    }

    #[test]
    fn test_unparsable_file_is_an_error() {
        let path = scratch_file("broken", "[server\nport = ");
        let err = load_config(Some(&path)).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse"));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_no_file_means_defaults() {
        assert_eq!(load_config(None).unwrap().server.port, 8080);
    }

    #[test]
    fn test_debug_redacts_credential() {
        let mut upstream = UpstreamConfig::default();
        upstream.api_key = "super-secret-1234".to_string();
        let printed = format!("{:?}", upstream);
        assert!(!printed.contains("super-secret"));
        assert!(printed.contains("****1234"));
    }
}
