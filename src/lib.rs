//! veille: web research assistant
//!
//! This library provides:
//! - A three-stage article pipeline (Search, Synthesize, Write) over a shared
//!   LLM provider, the last stage streamed
//! - Web search through DuckDuckGo, rendered into one text block per query
//! - Ollama and OpenAI-compatible providers with lazy streaming
//! - A terminal presenter and an HTTP server that stream the article as it is
//!   written

pub mod agent;
pub mod config;
pub mod llm;
pub mod orchestration;
pub mod presenter;
pub mod search;
pub mod tools;
pub mod transport;

pub use config::Config;
pub use orchestration::{ArticlePipeline, PipelineError};
pub use presenter::ArticleSession;
