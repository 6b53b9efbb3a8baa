//! Pipeline orchestration

mod error;
pub mod pipeline;

pub use error::PipelineError;
pub use pipeline::{search_request, ArticlePipeline, ArticleStream, Interrupt, PipelineRun};
