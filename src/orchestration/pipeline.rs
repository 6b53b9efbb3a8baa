//! Article pipeline - Search, Synthesize, Write
//!
//! Search and Synthesize run to completion before the next stage starts;
//! Write is handed back as a lazy stream that the caller drives.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use uuid::Uuid;

use super::PipelineError;
use crate::agent::{StageKind, StageOutput, StageProfile, StageProfiles, StageRunner};
use crate::config::{PipelineConfig, SearchStrategy};
use crate::llm::{FragmentStream, LlmProvider, Message};
use crate::search::SearchTool;
use crate::tools::ToolRegistry;

/// Lazy sequence of Write-stage fragments, exactly as the engine produced them
pub type ArticleStream = FragmentStream;

/// User message that opens the Search stage
pub fn search_request(query: &str) -> String {
    format!("Fais une recherche sur le Web pour : {}", query)
}

/// Shared cancellation flag
///
/// Checked between stages, raced against blocking stage calls, and polled by
/// the presenter between fragments.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Re-arm for the next run
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// Resolves once [`trigger`](Self::trigger) has been called
    pub async fn triggered(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_triggered() {
                return;
            }
            notified.await;
        }
    }
}

/// One query's trip through the pipeline
///
/// Holds the blocking stages' outputs and the not-yet-started Write stream.
pub struct PipelineRun {
    pub id: Uuid,
    pub query: String,
    pub raw_results: String,
    pub synthesized: String,
    stream: ArticleStream,
}

impl PipelineRun {
    pub fn into_stream(self) -> ArticleStream {
        self.stream
    }
}

impl std::fmt::Debug for PipelineRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRun")
            .field("id", &self.id)
            .field("query", &self.query)
            .field("raw_results", &self.raw_results.len())
            .field("synthesized", &self.synthesized.len())
            .finish_non_exhaustive()
    }
}

pub struct ArticlePipeline {
    runner: StageRunner,
    profiles: Arc<StageProfiles>,
    /// Search profile with no tools, used by the explicit strategy
    describe_profile: StageProfile,
    search: Arc<SearchTool>,
    strategy: SearchStrategy,
    stage_timeout: Duration,
    interrupt: Interrupt,
}

impl ArticlePipeline {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        search: Arc<SearchTool>,
        config: &PipelineConfig,
    ) -> Self {
        let profiles = Arc::new(StageProfiles::new(search.clone()));
        let describe_profile = profiles.search.clone().with_tools(ToolRegistry::new());

        Self {
            runner: StageRunner::new(provider).with_max_tool_iterations(config.max_tool_iterations),
            profiles,
            describe_profile,
            search,
            strategy: config.search_strategy,
            stage_timeout: Duration::from_secs(config.stage_timeout_secs),
            interrupt: Interrupt::new(),
        }
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    pub fn profiles(&self) -> &StageProfiles {
        &self.profiles
    }

    pub fn strategy(&self) -> SearchStrategy {
        self.strategy
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        self.runner.provider()
    }

    /// Run the pipeline and return the article stream
    pub async fn run(&self, query: &str) -> Result<ArticleStream, PipelineError> {
        Ok(self.prepare(query).await?.into_stream())
    }

    /// Run Search and Synthesize; the Write stage is set up but not started
    pub async fn prepare(&self, query: &str) -> Result<PipelineRun, PipelineError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(PipelineError::EmptyQuery);
        }

        let id = Uuid::new_v4();
        tracing::info!(run = %id, "Starting article pipeline for: {}", query);

        let raw_results = self.search_step(id, query).await?;

        let synthesized = self
            .complete_stage(
                id,
                &self.profiles.synthesize,
                vec![Message::user(raw_results.as_str())],
            )
            .await?
            .text;

        self.check_interrupt()?;
        tracing::info!(run = %id, stage = %StageKind::Write, "Streaming article");
        let stream = self
            .runner
            .stream(&self.profiles.write, vec![Message::user(synthesized.as_str())]);

        Ok(PipelineRun {
            id,
            query: query.to_string(),
            raw_results,
            synthesized,
            stream,
        })
    }

    async fn search_step(&self, id: Uuid, query: &str) -> Result<String, PipelineError> {
        let request = search_request(query);

        match self.strategy {
            SearchStrategy::Explicit => {
                self.check_interrupt()?;
                let results = self
                    .bounded(StageKind::Search, self.search.search(query))
                    .await??;
                let content = format!("{}\n\nRésultats de recherche :\n\n{}", request, results);
                let output = self
                    .complete_stage(id, &self.describe_profile, vec![Message::user(content)])
                    .await?;
                Ok(output.text)
            }
            SearchStrategy::ToolCalling => {
                let output = self
                    .complete_stage(id, &self.profiles.search, vec![Message::user(request)])
                    .await?;
                if output.tool_calls_made == 0 {
                    tracing::warn!(
                        run = %id,
                        "Search stage answered without calling web_search; using its answer as-is"
                    );
                }
                Ok(output.text)
            }
        }
    }

    async fn complete_stage(
        &self,
        id: Uuid,
        profile: &StageProfile,
        conversation: Vec<Message>,
    ) -> Result<StageOutput, PipelineError> {
        self.check_interrupt()?;
        let stage = profile.kind;
        tracing::info!(run = %id, stage = %stage, "Running '{}'", profile.name);
        let started = Instant::now();

        let output = self
            .bounded(stage, self.runner.complete(profile, conversation))
            .await?
            .map_err(|source| PipelineError::Engine { stage, source })?;

        if output.text.trim().is_empty() {
            return Err(PipelineError::EmptyResponse { stage });
        }

        tracing::info!(
            run = %id,
            stage = %stage,
            "Finished in {:.1}s ({} bytes, {} tool calls, {} tokens in / {} out)",
            started.elapsed().as_secs_f64(),
            output.text.len(),
            output.tool_calls_made,
            output.usage.input_tokens,
            output.usage.output_tokens
        );
        Ok(output)
    }

    /// Apply the stage timeout and the interrupt to a blocking call
    async fn bounded<F, T>(&self, stage: StageKind, fut: F) -> Result<T, PipelineError>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            result = tokio::time::timeout(self.stage_timeout, fut) => {
                result.map_err(|_| PipelineError::Timeout {
                    stage,
                    secs: self.stage_timeout.as_secs(),
                })
            }
            _ = self.interrupt.triggered() => Err(PipelineError::Cancelled),
        }
    }

    fn check_interrupt(&self) -> Result<(), PipelineError> {
        if self.interrupt.is_triggered() {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }
}
