//! Shared streaming utilities for LLM providers
//!
//! Providers describe how to open a streaming HTTP request and how to turn
//! body bytes into [`StreamEvent`]s; [`lazy_stream`] does the rest. The
//! request is only sent when the returned stream is first polled.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use futures::stream::{self, BoxStream};
use futures::StreamExt;

use super::{Boundary, FragmentStream, LlmError, StreamEvent};

/// Server-Sent Events (SSE) decoder
///
/// Buffers incoming bytes and extracts complete SSE `data:` payloads.
/// Handles edge cases like:
/// - Events split across multiple chunks
/// - Multiple events in a single chunk
/// - Final event without trailing newline
///
/// # Example
/// ```
/// use veille_cli::llm::streaming::SseDecoder;
///
/// let mut decoder = SseDecoder::new();
///
/// let payloads = decoder.push(b"data: {\"text\":\"bon\"}\n\n");
/// assert_eq!(payloads, vec!["{\"text\":\"bon\"}"]);
///
/// // Split event stays buffered until completed
/// assert!(decoder.push(b"data: {\"text\"").is_empty());
/// assert_eq!(decoder.push(b":\"jour\"}\n\n"), vec!["{\"text\":\"jour\"}"]);
///
/// decoder.push(b"data: [DONE]");
/// assert_eq!(decoder.finish(), vec!["[DONE]"]);
/// ```
#[derive(Debug, Default)]
pub struct SseDecoder {
    lines: LineDecoder,
}

impl SseDecoder {
    /// Create a new SSE decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Push incoming bytes and extract complete SSE `data:` payloads
    ///
    /// Incomplete events remain buffered for the next `push()` or `finish()`.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.lines
            .push(bytes)
            .into_iter()
            .filter_map(|line| Self::payload(&line))
            .collect()
    }

    /// Flush any remaining buffered content
    ///
    /// Call this when the stream ends to extract the final event
    /// if it doesn't have a trailing newline.
    pub fn finish(&mut self) -> Vec<String> {
        self.lines
            .finish()
            .into_iter()
            .filter_map(|line| Self::payload(&line))
            .collect()
    }

    fn payload(line: &str) -> Option<String> {
        line.strip_prefix("data:").map(|p| p.trim().to_string())
    }
}

/// Newline-delimited decoder (Ollama streams one JSON object per line)
///
/// Returns trimmed, non-empty lines; a partial line stays buffered as bytes,
/// so a UTF-8 sequence split across chunks is decoded intact.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(newline_pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            let line = String::from_utf8_lossy(&raw).trim().to_string();
            if !line.is_empty() {
                lines.push(line);
            }
        }
        lines
    }

    pub fn finish(&mut self) -> Vec<String> {
        let rest = std::mem::take(&mut self.buffer);
        String::from_utf8_lossy(&rest)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Provider-specific conversion from body bytes to stream events
///
/// Implementations emit [`StreamEvent::Done`] when the wire protocol signals
/// the end of the answer. A body that ends without it is treated as truncated.
pub trait ChunkDecoder: Send + 'static {
    fn decode(&mut self, bytes: &[u8]) -> Result<Vec<StreamEvent>, LlmError>;

    fn finish(&mut self) -> Result<Vec<StreamEvent>, LlmError>;
}

type ByteStream = BoxStream<'static, Result<Vec<u8>, reqwest::Error>>;

enum LazyState<F, D> {
    Pending {
        open: F,
        decoder: D,
    },
    Open {
        body: Option<ByteStream>,
        decoder: D,
        queue: VecDeque<StreamEvent>,
    },
    Finished,
}

/// Build a lazy event stream over a streaming HTTP response
///
/// `open` is not called until the first poll. Every event produced by the
/// decoder is yielded in order, framed by a start and end
/// [`StreamEvent::Delimiter`]. Silence longer than `idle` ends the stream
/// with [`LlmError::StreamIdle`].
pub fn lazy_stream<F, Fut, D>(open: F, decoder: D, idle: Duration) -> FragmentStream
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<reqwest::Response, LlmError>> + Send + 'static,
    D: ChunkDecoder,
{
    let initial = LazyState::Pending { open, decoder };

    stream::unfold(initial, move |state| async move {
        let (mut body, mut decoder, mut queue) = match state {
            LazyState::Finished => return None,
            LazyState::Pending { open, decoder } => match open().await {
                Ok(response) => {
                    let body: ByteStream = response
                        .bytes_stream()
                        .map(|chunk| chunk.map(|b| b.to_vec()))
                        .boxed();
                    let mut queue = VecDeque::new();
                    queue.push_back(StreamEvent::Delimiter(Boundary::Start));
                    (Some(body), decoder, queue)
                }
                Err(e) => return Some((Err(e), LazyState::Finished)),
            },
            LazyState::Open {
                body,
                decoder,
                queue,
            } => (body, decoder, queue),
        };

        loop {
            if let Some(event) = queue.pop_front() {
                let next = if event == StreamEvent::Done {
                    LazyState::Finished
                } else {
                    LazyState::Open {
                        body,
                        decoder,
                        queue,
                    }
                };
                return Some((Ok(event), next));
            }

            let Some(stream) = body.as_mut() else {
                return Some((
                    Err(LlmError::Stream(
                        "connection closed before the answer completed".to_string(),
                    )),
                    LazyState::Finished,
                ));
            };

            let next = tokio::time::timeout(idle, stream.next()).await;
            let decoded = match next {
                Err(_) => {
                    tracing::warn!("Stream idle for {}s, giving up", idle.as_secs());
                    return Some((Err(LlmError::StreamIdle(idle.as_secs())), LazyState::Finished));
                }
                Ok(Some(Err(e))) => {
                    return Some((
                        Err(LlmError::Stream(format!("Error reading stream chunk: {}", e))),
                        LazyState::Finished,
                    ));
                }
                Ok(Some(Ok(bytes))) => decoder.decode(&bytes),
                Ok(None) => {
                    body = None;
                    decoder.finish()
                }
            };

            match decoded {
                Ok(events) => {
                    for event in events {
                        if event == StreamEvent::Done {
                            queue.push_back(StreamEvent::Delimiter(Boundary::End));
                        }
                        queue.push_back(event);
                    }
                }
                Err(e) => return Some((Err(e), LazyState::Finished)),
            }
        }
    })
    .boxed()
}
