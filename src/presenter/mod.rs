//! Presentation: session state and progressive rendering of the article
//!
//! An [`ArticleSession`] owns the only state kept between runs (last query,
//! last article). Renderers receive the whole buffer each time it grows and
//! decide how to show it.

use std::io::{self, Write};

use futures::channel::mpsc::UnboundedSender;
use futures::StreamExt;
use serde::Serialize;

use crate::agent::{RunnerError, StageKind};
use crate::llm::StreamEvent;
use crate::orchestration::{ArticlePipeline, ArticleStream, Interrupt, PipelineError, PipelineRun};

/// Shown after the text while the article is still streaming
pub const CURSOR: &str = "▌";

/// Receives the growing article buffer
pub trait Renderer: Send {
    /// `text` is everything received so far; `in_progress` is false for the
    /// final render
    fn render(&mut self, text: &str, in_progress: bool) -> io::Result<()>;
}

/// Appends new text to a terminal, with a trailing cursor while streaming
pub struct TerminalRenderer<W: Write + Send> {
    out: W,
    printed: usize,
    cursor_shown: bool,
}

impl TerminalRenderer<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> TerminalRenderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            printed: 0,
            cursor_shown: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> Renderer for TerminalRenderer<W> {
    fn render(&mut self, text: &str, in_progress: bool) -> io::Result<()> {
        if self.cursor_shown {
            // Backspace over the cursor glyph
            self.out.write_all("\u{8} \u{8}".as_bytes())?;
            self.cursor_shown = false;
        }
        if let Some(new) = text.get(self.printed..) {
            self.out.write_all(new.as_bytes())?;
        }
        self.printed = text.len();
        if in_progress {
            self.out.write_all(CURSOR.as_bytes())?;
            self.cursor_shown = true;
        }
        self.out.flush()
    }
}

/// Forwards each new piece of text to a channel (HTTP response bodies)
pub struct ChannelRenderer {
    tx: UnboundedSender<String>,
    sent: usize,
}

impl ChannelRenderer {
    pub fn new(tx: UnboundedSender<String>) -> Self {
        Self { tx, sent: 0 }
    }
}

impl Renderer for ChannelRenderer {
    fn render(&mut self, text: &str, _in_progress: bool) -> io::Result<()> {
        let Some(new) = text.get(self.sent..) else {
            return Ok(());
        };
        if new.is_empty() {
            return Ok(());
        }
        self.tx
            .unbounded_send(new.to_string())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client went away"))?;
        self.sent = text.len();
        Ok(())
    }
}

/// How consuming an article stream ended
#[derive(Debug)]
pub enum RenderOutcome {
    Complete(String),
    /// The stream stopped early; `text` is what was shown
    Incomplete { text: String, error: PipelineError },
}

impl RenderOutcome {
    pub fn text(&self) -> &str {
        match self {
            RenderOutcome::Complete(text) | RenderOutcome::Incomplete { text, .. } => text,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, RenderOutcome::Complete(_))
    }
}

/// Query and article of the current interactive session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArticleSession {
    query: String,
    article: String,
}

impl ArticleSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn article(&self) -> &str {
        &self.article
    }

    /// Forget the stored query and article
    pub fn clear(&mut self) {
        self.query.clear();
        self.article.clear();
    }

    /// Run Search and Synthesize for `query`
    ///
    /// On success the query is stored and the previous article dropped; on
    /// failure the session is left untouched.
    pub async fn start(
        &mut self,
        pipeline: &ArticlePipeline,
        query: &str,
    ) -> Result<PipelineRun, PipelineError> {
        let run = pipeline.prepare(query).await?;
        self.query = run.query.clone();
        self.article.clear();
        Ok(run)
    }

    /// Pull the article stream to the end, rendering as it grows
    ///
    /// The article is stored only when the stream completes.
    pub async fn consume<R: Renderer>(
        &mut self,
        stream: ArticleStream,
        interrupt: &Interrupt,
        renderer: &mut R,
    ) -> RenderOutcome {
        let outcome = consume_stream(stream, interrupt, renderer).await;
        match &outcome {
            RenderOutcome::Complete(text) => {
                tracing::info!("Article complete ({} bytes)", text.len());
                self.article = text.clone();
            }
            RenderOutcome::Incomplete { text, error } => {
                tracing::warn!("Article incomplete after {} bytes: {}", text.len(), error);
            }
        }
        outcome
    }

    /// Start a run and render its article
    pub async fn generate<R: Renderer>(
        &mut self,
        pipeline: &ArticlePipeline,
        query: &str,
        renderer: &mut R,
    ) -> Result<RenderOutcome, PipelineError> {
        let run = self.start(pipeline, query).await?;
        Ok(self
            .consume(run.into_stream(), pipeline.interrupt(), renderer)
            .await)
    }
}

async fn consume_stream<R: Renderer>(
    mut stream: ArticleStream,
    interrupt: &Interrupt,
    renderer: &mut R,
) -> RenderOutcome {
    let mut text = String::new();

    loop {
        let next = tokio::select! {
            next = stream.next() => next,
            _ = interrupt.triggered() => {
                return incomplete(renderer, text, PipelineError::Cancelled);
            }
        };

        match next {
            Some(Ok(StreamEvent::TextDelta(delta))) => {
                text.push_str(&delta);
                if let Err(e) = renderer.render(&text, true) {
                    return incomplete(renderer, text, PipelineError::StreamInterrupted(e.to_string()));
                }
            }
            Some(Ok(StreamEvent::Done)) | None => break,
            // Delimiters and reasoning are not part of the article
            Some(Ok(_)) => {}
            // Refused before anything was written: the Write stage failed
            Some(Err(e)) if text.is_empty() && !e.is_stream_failure() => {
                let error = PipelineError::Engine {
                    stage: StageKind::Write,
                    source: RunnerError::Llm(e),
                };
                return incomplete(renderer, text, error);
            }
            Some(Err(e)) => {
                return incomplete(renderer, text, PipelineError::StreamInterrupted(e.to_string()));
            }
        }
    }

    match renderer.render(&text, false) {
        Ok(()) => RenderOutcome::Complete(text),
        Err(e) => RenderOutcome::Incomplete {
            text,
            error: PipelineError::StreamInterrupted(e.to_string()),
        },
    }
}

fn incomplete<R: Renderer>(renderer: &mut R, text: String, error: PipelineError) -> RenderOutcome {
    // Final unmarked render of what arrived; the outcome carries the failure
    let _ = renderer.render(&text, false);
    RenderOutcome::Incomplete { text, error }
}
