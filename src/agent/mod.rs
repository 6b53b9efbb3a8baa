//! Stage profiles and the runner that executes them

mod profile;
mod runner;

pub use profile::{
    StageKind, StageProfile, StageProfiles, RESEARCH_AGENT_NAME, SEARCH_AGENT_NAME,
    WRITER_AGENT_NAME,
};
pub use runner::{RunnerError, StageOutput, StageRunner};
