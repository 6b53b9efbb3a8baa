//! Configuration management for veille
//!
//! Configuration is read once at startup, validated, and then shared
//! read-only. An invalid search mode or a zero limit is rejected here,
//! before any pipeline run can start.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Unsupported search mode '{0}' (expected 'text' or 'news')")]
    UnsupportedSearchMode(String),

    #[error("Unsupported search strategy '{0}' (expected 'explicit' or 'tool_calling')")]
    UnsupportedSearchStrategy(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub pipeline: PipelineConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Generation backend: "ollama" or "openai" (any OpenAI-compatible endpoint)
    pub provider: String,
    pub model: String,
    /// Abort a streamed answer when no bytes arrive for this long
    pub stream_idle_timeout_secs: u64,
    pub ollama: OllamaConfig,
    pub openai: OpenAiConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            model: "aya-expanse:8b-q8_0".to_string(),
            stream_idle_timeout_secs: 60,
            ollama: OllamaConfig::default(),
            openai: OpenAiConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub base_url: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    pub base_url: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub max_tokens: usize,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            max_tokens: 4096,
        }
    }
}

/// Kind of web search performed by the search tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(try_from = "String", into = "String")]
pub enum SearchMode {
    /// General web results, query suffixed with the current year-month
    #[default]
    Text,
    /// News articles from the last month
    News,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Text => "text",
            SearchMode::News => "news",
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(SearchMode::Text),
            "news" => Ok(SearchMode::News),
            _ => Err(ConfigError::UnsupportedSearchMode(s.to_string())),
        }
    }
}

impl TryFrom<String> for SearchMode {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SearchMode> for String {
    fn from(mode: SearchMode) -> Self {
        mode.as_str().to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub mode: SearchMode,
    /// DuckDuckGo region code
    pub region: String,
    pub max_results: usize,
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            mode: SearchMode::Text,
            region: "fr-fr".to_string(),
            max_results: 10,
            timeout_secs: 20,
        }
    }
}

/// How the Search stage obtains its results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(try_from = "String", into = "String")]
pub enum SearchStrategy {
    /// Call the search tool directly, then let the model describe the results
    #[default]
    Explicit,
    /// Offer the search tool to the model and let it decide to call it
    ToolCalling,
}

impl SearchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchStrategy::Explicit => "explicit",
            SearchStrategy::ToolCalling => "tool_calling",
        }
    }
}

impl FromStr for SearchStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "explicit" => Ok(SearchStrategy::Explicit),
            "tool_calling" | "tools" => Ok(SearchStrategy::ToolCalling),
            _ => Err(ConfigError::UnsupportedSearchStrategy(s.to_string())),
        }
    }
}

impl TryFrom<String> for SearchStrategy {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SearchStrategy> for String {
    fn from(strategy: SearchStrategy) -> Self {
        strategy.as_str().to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub search_strategy: SearchStrategy,
    /// Upper bound for each blocking stage (Search, Synthesize)
    pub stage_timeout_secs: u64,
    /// Model round-trips allowed while a stage resolves tool calls
    pub max_tool_iterations: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            search_strategy: SearchStrategy::Explicit,
            stage_timeout_secs: 300,
            max_tool_iterations: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8501,
        }
    }
}

impl Config {
    /// Load configuration from the default location, or defaults when absent
    pub fn load() -> Result<Self, ConfigError> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Config::default()),
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Default configuration file path (`<config dir>/veille/config.toml`)
    pub fn config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "veille")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.llm.provider.to_lowercase().as_str() {
            "ollama" | "local" | "openai" | "gpt" => {}
            #[cfg(feature = "test-sim")]
            "scripted" | "sim" => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "unknown LLM provider '{}' (expected 'ollama' or 'openai')",
                    other
                )))
            }
        }
        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::Invalid("llm.model must not be empty".into()));
        }
        if self.llm.stream_idle_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "llm.stream_idle_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.search.region.trim().is_empty() {
            return Err(ConfigError::Invalid("search.region must not be empty".into()));
        }
        if self.search.max_results == 0 {
            return Err(ConfigError::Invalid(
                "search.max_results must be greater than 0".into(),
            ));
        }
        if self.search.timeout_secs == 0 || self.pipeline.stage_timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be greater than 0".into()));
        }
        if self.pipeline.max_tool_iterations == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.max_tool_iterations must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
