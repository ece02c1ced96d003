//! Configuration parsing and validation for chatrelay.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::Path;

/// Environment variable consulted when the config carries no `api_key`.
pub const API_KEY_ENV_VAR: &str = "OPENROUTER_API_KEY";

const DEFAULT_SYSTEM_PROMPT: &str = "You are a capable, knowledgeable AI assistant. \
Give comprehensive, truthful and non-judgmental answers to the questions you are asked. \
Keep your tone neutral and objective: present information as facts or clearly labelled \
hypotheses, not as personal opinions, and do not lecture or moralize.";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:5000")
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "127.0.0.1:5000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Upstream completions API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the API; `/chat/completions` is appended.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Model identifier sent with every request.
    #[serde(default = "default_model")]
    pub model: String,
    /// Bearer credential. Absence is reported per request, not at startup.
    pub api_key: Option<ApiKey>,
    /// Sent as `HTTP-Referer`.
    #[serde(default = "default_referer")]
    pub referer: String,
    /// Sent as `X-Title`.
    #[serde(default = "default_title")]
    pub title: String,
    /// Instruction prepended to every conversation. Empty disables it.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_model() -> String {
    "cognitivecomputations/dolphin-mistral-24b-venice-edition:free".to_string()
}

fn default_referer() -> String {
    "https://justaski-ai.replit.app".to_string()
}

fn default_title() -> String {
    "JustAskIT".to_string()
}

fn default_system_prompt() -> Option<String> {
    Some(DEFAULT_SYSTEM_PROMPT.to_string())
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            referer: default_referer(),
            title: default_title(),
            system_prompt: default_system_prompt(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl UpstreamConfig {
    /// Full URL of the chat-completions endpoint.
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// The system instruction, if one is configured and non-empty.
    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref().filter(|p| !p.is_empty())
    }
}

/// API key wrapper that redacts in Debug/Display/Serialize and zeroizes on drop.
#[derive(Clone)]
pub struct ApiKey(SecretString);

impl ApiKey {
    /// Access the raw key value. Every call site is auditable via `grep expose_secret`.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl Serialize for ApiKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> Deserialize<'de> for ApiKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|s| ApiKey(SecretString::from(s)))
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        ApiKey(SecretString::from(s))
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        ApiKey(SecretString::from(s))
    }
}

/// How the upstream API key was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum KeySource {
    /// Key was a literal string in config (no ${} references)
    Literal,
    /// Key contained ${VAR} references expanded from environment
    EnvExpanded,
    /// Key was read from the convention env var (holds var name)
    Convention(String),
    /// No key available
    None,
}

impl std::fmt::Display for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::Literal => write!(f, "config-literal"),
            KeySource::EnvExpanded => write!(f, "env-expanded"),
            KeySource::Convention(var) => write!(f, "convention ({})", var),
            KeySource::None => write!(f, "none"),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable '{var}' could not be expanded: {message}")]
    EnvVar { var: String, message: String },
}

/// Upstream section as written in TOML.
/// `api_key` may still contain `${VAR}` references.
#[derive(Deserialize)]
pub struct RawUpstreamConfig {
    #[serde(default = "default_base_url")]
    base_url: String,
    #[serde(default = "default_model")]
    model: String,
    api_key: Option<String>,
    #[serde(default = "default_referer")]
    referer: String,
    #[serde(default = "default_title")]
    title: String,
    #[serde(default = "default_system_prompt")]
    system_prompt: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    connect_timeout_secs: u64,
}

impl Default for RawUpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            referer: default_referer(),
            title: default_title(),
            system_prompt: default_system_prompt(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Raw configuration deserialized directly from TOML.
#[derive(Deserialize, Default)]
pub struct RawConfig {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    upstream: RawUpstreamConfig,
}

/// Expand all `${VAR}` references in a string using a custom lookup function.
///
/// Fails on first missing variable, unclosed `${`, or empty variable name.
fn expand_env_vars_with<F>(input: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains("${") {
        return Ok(input.to_string());
    }

    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let end = after.find('}').ok_or_else(|| ConfigError::EnvVar {
            var: "<unclosed>".to_string(),
            message: "Unclosed '${' in upstream.api_key".to_string(),
        })?;

        let var_name = &after[..end];
        if var_name.is_empty() {
            return Err(ConfigError::EnvVar {
                var: "".to_string(),
                message: "Empty variable name in '${}' reference".to_string(),
            });
        }

        let value = lookup(var_name).ok_or_else(|| ConfigError::EnvVar {
            var: var_name.to_string(),
            message: "variable is not set (referenced in upstream.api_key)".to_string(),
        })?;

        result.push_str(&value);
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

impl Config {
    /// Parse configuration from a TOML string, resolving the API key.
    pub fn parse_str(content: &str) -> Result<(Self, KeySource), ConfigError> {
        let raw: RawConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
        let (config, source) = Self::from_raw(raw)?;
        config.validate()?;
        Ok((config, source))
    }

    /// Load configuration from a TOML file with environment variable expansion.
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<(Self, KeySource), ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::parse_str(&content)
    }

    /// Built-in defaults with the API key taken from the environment.
    pub fn from_env() -> Result<(Self, KeySource), ConfigError> {
        let (config, source) = Self::from_raw(RawConfig::default())?;
        config.validate()?;
        Ok((config, source))
    }

    /// Convert raw config to final config using the process environment.
    pub fn from_raw(raw: RawConfig) -> Result<(Self, KeySource), ConfigError> {
        Self::from_raw_with(raw, |name| std::env::var(name).ok())
    }

    /// Convert raw config to final config with a custom env lookup.
    ///
    /// - `api_key` containing `${VAR}`: expanded, source = `EnvExpanded`
    /// - literal `api_key`: used directly, source = `Literal`
    /// - absent: `OPENROUTER_API_KEY`, source = `Convention` or `KeySource::None`
    ///
    /// A key that is empty after resolution is dropped (`KeySource::None`).
    pub fn from_raw_with<F>(raw: RawConfig, lookup: F) -> Result<(Self, KeySource), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let RawUpstreamConfig {
            base_url,
            model,
            api_key,
            referer,
            title,
            system_prompt,
            connect_timeout_secs,
        } = raw.upstream;

        // An empty key is treated as absent on every path.
        let (api_key, source) = match api_key {
            Some(ref raw_key) if raw_key.contains("${") => {
                let expanded = expand_env_vars_with(raw_key, &lookup)?;
                if expanded.is_empty() {
                    (None, KeySource::None)
                } else {
                    (Some(ApiKey::from(expanded)), KeySource::EnvExpanded)
                }
            }
            Some(ref raw_key) if !raw_key.is_empty() => {
                (Some(ApiKey::from(raw_key.as_str())), KeySource::Literal)
            }
            Some(_) => (None, KeySource::None),
            None => match lookup(API_KEY_ENV_VAR).filter(|v| !v.is_empty()) {
                Some(value) => (
                    Some(ApiKey::from(value)),
                    KeySource::Convention(API_KEY_ENV_VAR.to_string()),
                ),
                None => (None, KeySource::None),
            },
        };

        let config = Config {
            server: raw.server,
            upstream: UpstreamConfig {
                base_url,
                model,
                api_key,
                referer,
                title,
                system_prompt,
                connect_timeout_secs,
            },
        };

        Ok((config, source))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.listen.is_empty() {
            return Err(ConfigError::Validation(
                "server.listen must not be empty".to_string(),
            ));
        }

        let base_url = &self.upstream.base_url;
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::Validation(format!(
                "upstream.base_url must be an http(s) URL, got '{}'",
                base_url
            )));
        }

        if self.upstream.model.is_empty() {
            return Err(ConfigError::Validation(
                "upstream.model must not be empty".to_string(),
            ));
        }

        if self.upstream.api_key.is_none() {
            tracing::warn!(
                env_var = API_KEY_ENV_VAR,
                "No upstream API key configured - chat requests will fail with 500"
            );
        }

        Ok(())
    }
}
