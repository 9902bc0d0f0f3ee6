use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CostlensError, Result};

/// Environment variable that overrides `llm.api_key`.
pub const ENV_LLM_API_KEY: &str = "COSTLENS_LLM_API_KEY";
/// Environment variable that overrides `llm.endpoint`.
pub const ENV_LLM_ENDPOINT: &str = "COSTLENS_LLM_ENDPOINT";

/// Top-level configuration for the costlens service.
///
/// Loaded from `~/.costlens/config.toml` by default. Every section falls back
/// to its defaults when absent, so an empty file is a valid configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostlensConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

impl CostlensConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CostlensConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| CostlensError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Apply LLM secrets from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply LLM secrets from an arbitrary key lookup. Empty values are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(ENV_LLM_API_KEY).filter(|v| !v.trim().is_empty()) {
            self.llm.api_key = Some(key);
        }
        if let Some(endpoint) = lookup(ENV_LLM_ENDPOINT).filter(|v| !v.trim().is_empty()) {
            self.llm.endpoint = Some(endpoint);
        }
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory holding the SQLite database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.costlens/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Origins allowed by the CORS layer.
    pub cors_origins: Vec<String>,
    /// Requests allowed per minute across the rate-limited routes.
    pub rate_limit_per_minute: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:3001".to_string(),
            ],
            rate_limit_per_minute: 100,
        }
    }
}

/// Database and query-execution bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file name inside `general.data_dir`.
    pub file_name: String,
    /// Number of read-only sessions available to the query executor.
    pub read_pool_size: usize,
    /// Wall-clock limit for a single assistant query, in milliseconds.
    pub statement_timeout_ms: u64,
    /// Maximum rows returned by a single assistant query.
    pub max_rows: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            file_name: "costlens.db".to_string(),
            read_pool_size: 4,
            statement_timeout_ms: 5_000,
            max_rows: 1_000,
        }
    }
}

/// Chat-completion provider flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Azure OpenAI deployment (`api-key` header, `api-version` query).
    Azure,
    /// Any OpenAI-compatible `/chat/completions` endpoint (bearer token).
    OpenAi,
}

/// LLM service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    /// Base endpoint, e.g. `https://my-resource.openai.azure.com`.
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    /// Azure deployment name, or model name for OpenAI-compatible providers.
    pub deployment: String,
    /// Azure `api-version` query parameter.
    pub api_version: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Per-call timeout in seconds.
    pub timeout_secs: u64,
    /// Backoff before the single retry of a failed call, in milliseconds.
    pub retry_backoff_ms: u64,
}

impl LlmConfig {
    /// Whether both an endpoint and an API key are present.
    pub fn is_configured(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        present(&self.endpoint) && present(&self.api_key)
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Azure,
            endpoint: None,
            api_key: None,
            deployment: "gpt-4o".to_string(),
            api_version: "2024-02-15-preview".to_string(),
            temperature: 0.3,
            max_tokens: 1_000,
            timeout_secs: 30,
            retry_backoff_ms: 500,
        }
    }
}

/// SQL-Agent pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Maximum characters in an incoming chat message.
    pub max_message_chars: usize,
    /// Maximum characters in an extracted SQL candidate.
    pub max_query_chars: usize,
    /// Turns retained per conversation (oldest trimmed first).
    pub history_turns: usize,
    /// Rows rendered into the chat answer.
    pub display_rows: usize,
    /// Characters rendered per cell before eliding with `...`.
    pub display_cell_chars: usize,
    /// Idle minutes after which the sweeper forgets a conversation. 0 disables.
    pub idle_conversation_minutes: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_message_chars: 1_000,
            max_query_chars: 2_000,
            history_turns: 20,
            display_rows: 10,
            display_cell_chars: 50,
            idle_conversation_minutes: 0,
        }
    }
}
