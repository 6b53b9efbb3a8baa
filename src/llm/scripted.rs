//! Scripted provider - deterministic stand-in for a real model
//!
//! Registered as provider "scripted". Replies come from a queue filled by the
//! caller; when the queue is empty the provider echoes the last user message.
//! Every call is recorded so tests can assert what each stage received and in
//! which order stages ran.

use super::{
    Boundary, FragmentStream, LlmError, LlmProvider, LlmResponse, Message, Role, StreamEvent,
    TokenUsage, ToolCall, ToolDefinition,
};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted answer to a non-streaming call
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    ToolCall {
        name: String,
        arguments: serde_json::Value,
    },
    Fail(String),
}

/// Scripted streaming answer: fragments, then optionally a failure
#[derive(Debug, Clone, Default)]
pub struct ScriptedStream {
    pub fragments: Vec<String>,
    pub fail_with: Option<String>,
}

/// Observable provider activity, in call order
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    ChatStarted { system: String, user: String },
    ChatFinished { system: String },
    StreamCreated { system: String },
    StreamPolled { system: String },
}

#[derive(Default)]
struct Script {
    replies: VecDeque<ScriptedReply>,
    streams: VecDeque<ScriptedStream>,
}

pub struct ScriptedProvider {
    model: String,
    script: Mutex<Script>,
    log: Arc<Mutex<Vec<ProviderEvent>>>,
    /// Tools offered on each chat call, by name
    offered_tools: Mutex<Vec<Vec<String>>>,
    fragments_produced: Arc<AtomicUsize>,
    delay: Duration,
}

/// Rough token count, about four bytes per token
pub fn count_tokens(text: &str) -> u32 {
    (text.len() / 4).max(1) as u32
}

fn sim_usage(input: &str, output: &str) -> TokenUsage {
    let input_tokens = count_tokens(input);
    let output_tokens = count_tokens(output);
    TokenUsage {
        input_tokens,
        output_tokens,
        total_tokens: input_tokens + output_tokens,
    }
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            model: "scripted".to_string(),
            script: Mutex::new(Script::default()),
            log: Arc::new(Mutex::new(Vec::new())),
            offered_tools: Mutex::new(Vec::new()),
            fragments_produced: Arc::new(AtomicUsize::new(0)),
            delay: Duration::ZERO,
        }
    }

    /// Provider that answers every call with the last user message
    pub fn echo() -> Self {
        Self::new()
    }

    /// Sleep before each chat reply and each streamed fragment
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn push_text(&self, text: impl Into<String>) -> &Self {
        self.push_reply(ScriptedReply::Text(text.into()))
    }

    pub fn push_tool_call(&self, name: &str, arguments: serde_json::Value) -> &Self {
        self.push_reply(ScriptedReply::ToolCall {
            name: name.to_string(),
            arguments,
        })
    }

    pub fn push_failure(&self, message: impl Into<String>) -> &Self {
        self.push_reply(ScriptedReply::Fail(message.into()))
    }

    pub fn push_reply(&self, reply: ScriptedReply) -> &Self {
        if let Ok(mut script) = self.script.lock() {
            script.replies.push_back(reply);
        }
        self
    }

    pub fn push_stream<I, S>(&self, fragments: I) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push_stream_script(ScriptedStream {
            fragments: fragments.into_iter().map(Into::into).collect(),
            fail_with: None,
        })
    }

    pub fn push_stream_script(&self, stream: ScriptedStream) -> &Self {
        if let Ok(mut script) = self.script.lock() {
            script.streams.push_back(stream);
        }
        self
    }

    /// Everything that happened so far, oldest first
    pub fn events(&self) -> Vec<ProviderEvent> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    /// Tool names offered on each chat call, oldest first
    pub fn offered_tools(&self) -> Vec<Vec<String>> {
        self.offered_tools
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    /// Text fragments handed out by streams so far
    pub fn fragments_produced(&self) -> usize {
        self.fragments_produced.load(Ordering::SeqCst)
    }

    fn record(&self, event: ProviderEvent) {
        if let Ok(mut log) = self.log.lock() {
            log.push(event);
        }
    }

    fn system_of(messages: &[Message]) -> String {
        messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.text().to_string())
            .unwrap_or_default()
    }

    fn last_user_of(messages: &[Message]) -> String {
        messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.text().to_string())
            .unwrap_or_default()
    }

    fn last_tool_result_of(messages: &[Message]) -> Option<String> {
        match messages.last() {
            Some(m) if m.role == Role::Tool => Some(m.text().to_string()),
            _ => None,
        }
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<LlmResponse, LlmError> {
        let system = Self::system_of(messages);
        self.record(ProviderEvent::ChatStarted {
            system: system.clone(),
            user: Self::last_user_of(messages),
        });
        if let Ok(mut offered) = self.offered_tools.lock() {
            offered.push(
                tools
                    .unwrap_or_default()
                    .iter()
                    .map(|t| t.name.clone())
                    .collect(),
            );
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let reply = self
            .script
            .lock()
            .ok()
            .and_then(|mut script| script.replies.pop_front());

        let input: String = messages.iter().map(|m| m.text()).collect();
        let response = match reply {
            Some(ScriptedReply::Text(text)) => Ok(LlmResponse::Text {
                usage: Some(sim_usage(&input, &text)),
                text,
            }),
            Some(ScriptedReply::ToolCall { name, arguments }) => Ok(LlmResponse::ToolCalls {
                usage: Some(sim_usage(&input, &arguments.to_string())),
                calls: vec![ToolCall {
                    id: format!("scripted_call_{}", messages.len()),
                    name,
                    arguments,
                }],
            }),
            Some(ScriptedReply::Fail(message)) => Err(LlmError::ServiceError(message)),
            // Echo: after a tool round-trip, pass the tool output through unchanged
            None => {
                let text = Self::last_tool_result_of(messages)
                    .unwrap_or_else(|| Self::last_user_of(messages));
                Ok(LlmResponse::Text {
                    usage: Some(sim_usage(&input, &text)),
                    text,
                })
            }
        };

        self.record(ProviderEvent::ChatFinished { system });
        response
    }

    fn chat_stream(&self, messages: Vec<Message>) -> FragmentStream {
        let system = Self::system_of(&messages);
        self.record(ProviderEvent::StreamCreated {
            system: system.clone(),
        });

        let script = self
            .script
            .lock()
            .ok()
            .and_then(|mut script| script.streams.pop_front())
            .unwrap_or_else(|| ScriptedStream {
                fragments: Self::last_user_of(&messages)
                    .split_inclusive('\n')
                    .map(str::to_string)
                    .collect(),
                fail_with: None,
            });

        let mut items: Vec<Result<StreamEvent, LlmError>> = Vec::new();
        items.push(Ok(StreamEvent::Delimiter(Boundary::Start)));
        items.extend(
            script
                .fragments
                .into_iter()
                .map(|f| Ok(StreamEvent::TextDelta(f))),
        );
        match script.fail_with {
            Some(message) => items.push(Err(LlmError::Stream(message))),
            None => {
                items.push(Ok(StreamEvent::Delimiter(Boundary::End)));
                items.push(Ok(StreamEvent::Done));
            }
        }

        let log = self.log.clone();
        let produced = self.fragments_produced.clone();
        let delay = self.delay;
        let mut first = true;

        stream::iter(items)
            .then(move |item| {
                if first {
                    first = false;
                    if let Ok(mut log) = log.lock() {
                        log.push(ProviderEvent::StreamPolled {
                            system: system.clone(),
                        });
                    }
                }
                if matches!(item, Ok(StreamEvent::TextDelta(_))) {
                    produced.fetch_add(1, Ordering::SeqCst);
                }
                async move {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    item
                }
            })
            .boxed()
    }
}
