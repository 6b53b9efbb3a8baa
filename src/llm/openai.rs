//! OpenAI-compatible chat completions provider
//!
//! Works against api.openai.com and any server exposing the same
//! `/chat/completions` API (vLLM, LM Studio, Ollama's `/v1`, ...).
//!
//! SECURITY: the API key is only attached when one is configured; local
//! servers are called without an Authorization header.

use super::streaming::{lazy_stream, ChunkDecoder, SseDecoder};
use super::{
    ContentPart, FragmentStream, LlmError, LlmProvider, LlmResponse, Message, MessageContent,
    Role, StreamEvent, TokenUsage, ToolCall, ToolDefinition,
};
use crate::config::LlmConfig;
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

const DEFAULT_STREAM_IDLE: Duration = Duration::from_secs(60);

pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: usize,
    stream_idle: Duration,
}

impl OpenAiProvider {
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: "gpt-4o".to_string(),
            max_tokens: 4096,
            stream_idle: DEFAULT_STREAM_IDLE,
        }
    }

    /// Build from config; OPENAI_BASE_URL overrides the configured endpoint
    ///
    /// The key is read from the variable named by `llm.openai.api_key_env`.
    /// It is required for api.openai.com and optional everywhere else.
    pub fn from_config(config: &LlmConfig) -> anyhow::Result<Self> {
        let base_url =
            env::var("OPENAI_BASE_URL").unwrap_or_else(|_| config.openai.base_url.clone());
        let api_key = env::var(&config.openai.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());

        if api_key.is_none() && base_url.contains("api.openai.com") {
            anyhow::bail!(
                "{} environment variable not set (required for api.openai.com)",
                config.openai.api_key_env
            );
        }

        Ok(Self::new(&base_url, api_key)
            .with_model(&config.model)
            .with_max_tokens(config.openai.max_tokens))
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_stream_idle_timeout(mut self, idle: Duration) -> Self {
        self.stream_idle = idle;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Convert internal messages to OpenAI format
    fn convert_messages(messages: &[Message]) -> Vec<OpenAiMessage> {
        messages
            .iter()
            .map(|msg| {
                let role = match msg.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::Tool => "tool",
                };

                match &msg.content {
                    MessageContent::Text(text) => OpenAiMessage {
                        role: role.to_string(),
                        content: Some(text.clone()),
                        tool_calls: None,
                        tool_call_id: msg.tool_call_id.clone(),
                    },
                    MessageContent::Parts(parts) => {
                        let tool_calls: Vec<OpenAiToolCall> = msg
                            .content
                            .tool_uses()
                            .into_iter()
                            .map(|call| OpenAiToolCall {
                                id: call.id,
                                call_type: "function".to_string(),
                                function: OpenAiFunctionCall {
                                    name: call.name,
                                    arguments: call.arguments.to_string(),
                                },
                            })
                            .collect();

                        let text_content = parts.iter().find_map(|p| match p {
                            ContentPart::Text { text } => Some(text.clone()),
                            _ => None,
                        });

                        OpenAiMessage {
                            role: role.to_string(),
                            content: text_content,
                            tool_calls: (!tool_calls.is_empty()
                                && msg.role == Role::Assistant)
                                .then_some(tool_calls),
                            tool_call_id: msg.tool_call_id.clone(),
                        }
                    }
                }
            })
            .collect()
    }

    fn convert_tools(tools: &[ToolDefinition]) -> Vec<OpenAiTool> {
        tools
            .iter()
            .map(|t| OpenAiTool {
                tool_type: "function".to_string(),
                function: OpenAiFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn build_request(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        stream: bool,
    ) -> OpenAiRequest {
        let tools = tools.filter(|t| !t.is_empty()).map(Self::convert_tools);
        OpenAiRequest {
            model: self.model.clone(),
            messages: Self::convert_messages(messages),
            max_tokens: Some(self.max_tokens),
            tool_choice: tools.as_ref().map(|_| "auto".to_string()),
            tools,
            stream: stream.then_some(true),
        }
    }

    fn build_http_request(
        client: &reqwest::Client,
        url: &str,
        api_key: Option<&str>,
        body: &OpenAiRequest,
    ) -> reqwest::RequestBuilder {
        let mut req = client
            .post(url)
            .header("Content-Type", "application/json");
        if let Some(key) = api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }
        req.json(body)
    }

    /// Parse a non-streaming response
    fn parse_response(response: OpenAiResponse) -> LlmResponse {
        let usage = response.usage.map(|u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        let Some(choice) = response.choices.into_iter().next() else {
            return LlmResponse::Text {
                text: String::new(),
                usage,
            };
        };

        let calls: Vec<ToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: serde_json::from_str(&tc.function.arguments)
                    .unwrap_or(serde_json::Value::Null),
            })
            .collect();

        LlmResponse::from_parts(choice.message.content.unwrap_or_default(), calls, usage)
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<LlmResponse, LlmError> {
        let body = self.build_request(messages, tools, false);
        tracing::debug!(
            "OpenAI chat: model={}, messages={}, tools={}",
            body.model,
            body.messages.len(),
            body.tools.is_some()
        );

        let response = Self::build_http_request(
            &self.client,
            &self.completions_url(),
            self.api_key.as_deref(),
            &body,
        )
        .send()
        .await
        .map_err(LlmError::from_network_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::from_http_status(status, error_text));
        }

        let parsed: OpenAiResponse = response
            .json()
            .await
            .context("Failed to parse OpenAI response")?;
        Ok(Self::parse_response(parsed))
    }

    fn chat_stream(&self, messages: Vec<Message>) -> FragmentStream {
        let client = self.client.clone();
        let url = self.completions_url();
        let api_key = self.api_key.clone();
        let body = self.build_request(&messages, None, true);

        lazy_stream(
            move || async move {
                tracing::debug!("OpenAI streaming request: model={}", body.model);
                let response = Self::build_http_request(&client, &url, api_key.as_deref(), &body)
                    .send()
                    .await
                    .map_err(LlmError::from_network_error)?;

                if !response.status().is_success() {
                    let status = response.status();
                    let error_text = response.text().await.unwrap_or_default();
                    return Err(LlmError::from_http_status(status, error_text));
                }
                Ok(response)
            },
            OpenAiChunkDecoder::default(),
            self.stream_idle,
        )
    }
}

/// Turns chat-completions SSE payloads into stream events
#[derive(Debug, Default)]
struct OpenAiChunkDecoder {
    sse: SseDecoder,
    finished: bool,
}

impl OpenAiChunkDecoder {
    fn decode_payloads(&mut self, payloads: Vec<String>) -> Result<Vec<StreamEvent>, LlmError> {
        let mut events = Vec::new();
        for payload in payloads {
            if self.finished {
                break;
            }
            if payload == "[DONE]" {
                self.finished = true;
                events.push(StreamEvent::Done);
                break;
            }

            let chunk: OpenAiStreamChunk = serde_json::from_str(&payload)
                .map_err(|e| LlmError::Stream(format!("Malformed stream chunk: {}", e)))?;

            for choice in chunk.choices {
                if let Some(reasoning) = choice.delta.reasoning_content.filter(|r| !r.is_empty()) {
                    events.push(StreamEvent::ThinkingDelta(reasoning));
                }
                if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                    events.push(StreamEvent::TextDelta(content));
                }
                // Some compatible servers close the body right after the finish
                // reason without sending [DONE]
                if choice.finish_reason.is_some() {
                    self.finished = true;
                    events.push(StreamEvent::Done);
                }
            }
        }
        Ok(events)
    }
}

impl ChunkDecoder for OpenAiChunkDecoder {
    fn decode(&mut self, bytes: &[u8]) -> Result<Vec<StreamEvent>, LlmError> {
        let payloads = self.sse.push(bytes);
        self.decode_payloads(payloads)
    }

    fn finish(&mut self) -> Result<Vec<StreamEvent>, LlmError> {
        let payloads = self.sse.finish();
        self.decode_payloads(payloads)
    }
}

// ============================================================================
// API Types (OpenAI Format)
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: OpenAiFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct OpenAiTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: OpenAiFunction,
}

#[derive(Debug, Serialize)]
struct OpenAiFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    #[serde(default)]
    delta: OpenAiDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiDelta {
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}
