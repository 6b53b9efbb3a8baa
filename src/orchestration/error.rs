//! Pipeline failures

use thiserror::Error;

use crate::agent::{RunnerError, StageKind};
use crate::search::SearchError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Query is empty")]
    EmptyQuery,

    #[error("Web search failed: {0}")]
    Search(#[from] SearchError),

    #[error("{stage} stage failed: {source}")]
    Engine {
        stage: StageKind,
        #[source]
        source: RunnerError,
    },

    #[error("{stage} stage returned an empty answer")]
    EmptyResponse { stage: StageKind },

    #[error("{stage} stage timed out after {secs} seconds")]
    Timeout { stage: StageKind, secs: u64 },

    #[error("Article stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Run cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Stage the failure happened in, when it belongs to one
    pub fn stage(&self) -> Option<StageKind> {
        match self {
            PipelineError::Search(_) => Some(StageKind::Search),
            PipelineError::Engine { stage, .. }
            | PipelineError::EmptyResponse { stage }
            | PipelineError::Timeout { stage, .. } => Some(*stage),
            PipelineError::StreamInterrupted(_) => Some(StageKind::Write),
            _ => None,
        }
    }

    /// True when the caller asked for this (empty query, cancellation)
    pub fn is_user_error(&self) -> bool {
        matches!(self, PipelineError::EmptyQuery | PipelineError::Cancelled)
    }
}
