//! LLM provider implementations
//!
//! A provider is the generation engine behind every pipeline stage. One
//! provider handle is built at startup and shared by all runs.

use std::sync::Arc;
use std::time::Duration;

use crate::config::LlmConfig;

mod error;
mod ollama;
mod openai;
pub mod streaming;
mod types;

// Deterministic provider for offline runs and tests (feature-gated)
#[cfg(feature = "test-sim")]
pub mod scripted;
#[cfg(feature = "test-sim")]
pub use scripted::{ProviderEvent, ScriptedProvider, ScriptedReply, ScriptedStream};

pub use error::LlmError;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use types::*;

use async_trait::async_trait;

/// Trait for LLM providers
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &str;

    /// Model used for every request
    fn model(&self) -> &str;

    /// Send a chat completion request (non-streaming)
    ///
    /// When `tools` is given the model may answer with tool calls instead of
    /// text; resolving them is the caller's job.
    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<LlmResponse, LlmError>;

    /// Start a streaming chat completion request
    ///
    /// The returned stream is lazy: no request is sent until it is first
    /// polled. Dropping it closes the connection.
    fn chat_stream(&self, messages: Vec<Message>) -> FragmentStream;
}

/// Create the LLM provider named in the configuration
///
/// Environment variables (`OLLAMA_BASE_URL`, `OPENAI_BASE_URL`, ...) override
/// the config file so a deployment can repoint the engine without editing it.
pub fn create_provider(config: &LlmConfig) -> anyhow::Result<Arc<dyn LlmProvider>> {
    let idle = Duration::from_secs(config.stream_idle_timeout_secs);

    match config.provider.to_lowercase().as_str() {
        "ollama" | "local" => {
            let p = OllamaProvider::from_config(config)
                .with_stream_idle_timeout(idle);
            tracing::info!("Using Ollama at {} (model: {})", p.base_url(), p.model());
            Ok(Arc::new(p))
        }
        "openai" | "gpt" => {
            let p = OpenAiProvider::from_config(config)?.with_stream_idle_timeout(idle);
            tracing::info!(
                "Using OpenAI-compatible endpoint {} (model: {})",
                p.base_url(),
                p.model()
            );
            Ok(Arc::new(p))
        }
        #[cfg(feature = "test-sim")]
        "scripted" | "sim" => {
            tracing::info!("Using scripted provider (offline)");
            Ok(Arc::new(ScriptedProvider::echo()))
        }
        other => anyhow::bail!(
            "Unknown LLM provider: {}. Supported: ollama, openai",
            other
        ),
    }
}
