use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

// ── Runtime configuration ─────────────────────────────────────────

/// Everything is read once at startup: an optional TOML file, then
/// environment overrides. No hot reload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the Ollama server.
    #[serde(default = "default_ollama_base_url")]
    pub ollama_base_url: String,
    /// Model name passed to the generate endpoint.
    #[serde(default = "default_model")]
    pub model: String,
    /// Deadline for one generate call, in seconds. Local models can be slow.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Storage bound: exchanges kept per session (oldest dropped first).
    #[serde(default = "default_max_conversation_length")]
    pub max_conversation_length: usize,
    /// Exchanges included in a generic chat prompt.
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    /// Exchanges included in a widget (webhook) prompt.
    #[serde(default = "default_widget_context_window")]
    pub widget_context_window: usize,
    /// Idle time after which a session is eligible for eviction.
    #[serde(default = "default_session_retention_secs")]
    pub session_retention_secs: u64,
    /// Gateway bind host (default: 127.0.0.1)
    #[serde(default = "default_host")]
    pub host: String,
    /// Gateway bind port (default: 8080)
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".into()
}

fn default_model() -> String {
    "phi3:mini".into()
}

fn default_request_timeout_secs() -> u64 {
    600
}

fn default_max_conversation_length() -> usize {
    10
}

fn default_context_window() -> usize {
    3
}

fn default_widget_context_window() -> usize {
    5
}

fn default_session_retention_secs() -> u64 {
    86_400
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    8080
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ollama_base_url: default_ollama_base_url(),
            model: default_model(),
            request_timeout_secs: default_request_timeout_secs(),
            max_conversation_length: default_max_conversation_length(),
            context_window: default_context_window(),
            widget_context_window: default_widget_context_window(),
            session_retention_secs: default_session_retention_secs(),
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Config {
    /// Load from an optional TOML file, apply env overrides, validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let contents = fs::read_to_string(path)?;
                toml::from_str(&contents)
                    .map_err(|error| ConfigError::Load(error.to_string()))?
            }
            None => Self::default(),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("CHATBRIDGE_OLLAMA_URL") {
            if !url.is_empty() {
                self.ollama_base_url = url;
            }
        }

        if let Ok(model) = std::env::var("CHATBRIDGE_MODEL") {
            if !model.is_empty() {
                self.model = model;
            }
        }

        if let Ok(timeout_str) = std::env::var("CHATBRIDGE_REQUEST_TIMEOUT_SECS") {
            if let Ok(timeout) = timeout_str.parse::<u64>() {
                self.request_timeout_secs = timeout;
            }
        }

        if let Ok(length_str) = std::env::var("CHATBRIDGE_MAX_CONVERSATION_LENGTH") {
            if let Ok(length) = length_str.parse::<usize>() {
                self.max_conversation_length = length;
            }
        }

        if let Ok(window_str) = std::env::var("CHATBRIDGE_CONTEXT_WINDOW") {
            if let Ok(window) = window_str.parse::<usize>() {
                self.context_window = window;
            }
        }

        if let Ok(retention_str) = std::env::var("CHATBRIDGE_SESSION_RETENTION_SECS") {
            if let Ok(retention) = retention_str.parse::<u64>() {
                self.session_retention_secs = retention;
            }
        }

        if let Ok(host) = std::env::var("CHATBRIDGE_HOST").or_else(|_| std::env::var("HOST")) {
            if !host.is_empty() {
                self.host = host;
            }
        }

        if let Ok(port_str) = std::env::var("CHATBRIDGE_PORT").or_else(|_| std::env::var("PORT")) {
            if let Ok(port) = port_str.parse::<u16>() {
                self.port = port;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::Validation("model must not be empty".into()));
        }
        if !self.ollama_base_url.starts_with("http://")
            && !self.ollama_base_url.starts_with("https://")
        {
            return Err(ConfigError::Validation(format!(
                "ollama_base_url must be an http(s) URL, got {:?}",
                self.ollama_base_url
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "request_timeout_secs must be at least 1".into(),
            ));
        }
        if self.max_conversation_length == 0 {
            return Err(ConfigError::Validation(
                "max_conversation_length must be at least 1".into(),
            ));
        }
        if self.context_window == 0 || self.widget_context_window == 0 {
            return Err(ConfigError::Validation(
                "context windows must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
