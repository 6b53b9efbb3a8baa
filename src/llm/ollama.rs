//! Ollama LLM provider implementation (local models)

use super::streaming::{lazy_stream, ChunkDecoder, LineDecoder};
use super::{
    FragmentStream, LlmError, LlmProvider, LlmResponse, Message, MessageContent, Role,
    StreamEvent, TokenUsage, ToolCall, ToolDefinition,
};
use crate::config::LlmConfig;
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_STREAM_IDLE: Duration = Duration::from_secs(60);

/// Generate a unique tool call ID for Ollama tool calls
fn generate_tool_call_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let id = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("ollama_call_{}", id)
}

/// Splits streamed text into visible text and reasoning segments using
/// prompt-level tags (`<think>...</think>` or `<thinking>...</thinking>`).
#[derive(Debug, Default)]
struct PromptThinkingTagParser {
    in_thinking: bool,
    pending: String,
}

impl PromptThinkingTagParser {
    fn ingest(&mut self, chunk: &str) -> (String, String) {
        self.pending.push_str(chunk);
        let mut text_out = String::new();
        let mut thinking_out = String::new();

        loop {
            if self.in_thinking {
                if let Some((idx, close_len)) = find_tag(&self.pending, &["</think>", "</thinking>"])
                {
                    thinking_out.push_str(&self.pending[..idx]);
                    self.pending.drain(..idx + close_len);
                    self.in_thinking = false;
                    continue;
                }

                thinking_out.push_str(&self.pending);
                self.pending.clear();
                break;
            }

            if let Some((idx, open_len)) = find_tag(&self.pending, &["<think>", "<thinking>"]) {
                text_out.push_str(&self.pending[..idx]);
                self.pending.drain(..idx + open_len);
                self.in_thinking = true;
                continue;
            }

            let hold = partial_open_tag_len(&self.pending);
            let emit_to = self.pending.len() - hold;
            text_out.push_str(&self.pending[..emit_to]);
            self.pending.drain(..emit_to);
            break;
        }

        (text_out, thinking_out)
    }

    fn flush(&mut self) -> (String, String) {
        let pending = std::mem::take(&mut self.pending);
        if self.in_thinking {
            self.in_thinking = false;
            (String::new(), pending)
        } else {
            (pending, String::new())
        }
    }
}

/// Earliest occurrence of any of `tags` as (index, tag length)
fn find_tag(s: &str, tags: &[&str]) -> Option<(usize, usize)> {
    tags.iter()
        .filter_map(|tag| s.find(tag).map(|idx| (idx, tag.len())))
        .min_by_key(|(idx, _)| *idx)
}

/// Length of a trailing prefix of an opening tag, held back until the next chunk
fn partial_open_tag_len(s: &str) -> usize {
    const OPEN_TAGS: [&str; 2] = ["<think>", "<thinking>"];
    let mut hold_len = 0usize;
    for tag in OPEN_TAGS {
        let max_prefix = std::cmp::min(tag.len() - 1, s.len());
        for len in (1..=max_prefix).rev() {
            if s.ends_with(&tag[..len]) {
                hold_len = hold_len.max(len);
                break;
            }
        }
    }
    hold_len
}

pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    stream_idle: Duration,
}

impl OllamaProvider {
    /// Create a new Ollama provider
    ///
    /// Uses localhost:11434 unless OLLAMA_BASE_URL/OLLAMA_MODEL are set.
    pub fn new() -> Self {
        let base_url =
            env::var("OLLAMA_BASE_URL").unwrap_or_else(|_| DEFAULT_OLLAMA_URL.to_string());
        let model = env::var("OLLAMA_MODEL").unwrap_or_else(|_| "aya-expanse:8b-q8_0".to_string());

        Self {
            client: reqwest::Client::new(),
            base_url,
            model,
            stream_idle: DEFAULT_STREAM_IDLE,
        }
    }

    /// Build from config, letting OLLAMA_BASE_URL/OLLAMA_MODEL take precedence
    pub fn from_config(config: &LlmConfig) -> Self {
        let base_url = env::var("OLLAMA_BASE_URL").unwrap_or_else(|_| config.ollama.base_url.clone());
        let model = env::var("OLLAMA_MODEL").unwrap_or_else(|_| config.model.clone());
        Self::new().with_base_url(&base_url).with_model(&model)
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_stream_idle_timeout(mut self, idle: Duration) -> Self {
        self.stream_idle = idle;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn convert_messages(messages: &[Message]) -> Vec<OllamaMessage> {
        messages
            .iter()
            .map(|msg| {
                let role = match msg.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::Tool => "tool",
                };

                let tool_calls = match &msg.content {
                    MessageContent::Parts(_) if msg.role == Role::Assistant => {
                        let calls: Vec<OllamaToolCall> = msg
                            .content
                            .tool_uses()
                            .into_iter()
                            .map(|call| OllamaToolCall {
                                function: OllamaToolCallFunction {
                                    name: call.name,
                                    arguments: call.arguments,
                                },
                            })
                            .collect();
                        (!calls.is_empty()).then_some(calls)
                    }
                    _ => None,
                };

                OllamaMessage {
                    role: role.to_string(),
                    content: msg.text().to_string(),
                    tool_calls,
                }
            })
            .collect()
    }

    /// Convert ToolDefinition to native Ollama tool format
    fn convert_tools(tools: &[ToolDefinition]) -> Vec<OllamaTool> {
        tools
            .iter()
            .map(|t| OllamaTool {
                type_field: "function".to_string(),
                function: OllamaFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    async fn send_request(&self, request: &OllamaRequest) -> Result<OllamaResponse, LlmError> {
        let url = format!("{}/api/chat", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(LlmError::from_network_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::from_http_status(status, error_text));
        }

        let parsed = response
            .json::<OllamaResponse>()
            .await
            .context("Failed to parse Ollama response")?;
        Ok(parsed)
    }

    /// Some local models print `{"tool": ..., "args": ...}` instead of using native tool calls
    fn parse_tool_call(content: &str) -> Option<ToolCall> {
        let content = content.trim();
        let start = content.find('{')?;
        let end = content.rfind('}')?;
        if end < start {
            return None;
        }

        #[derive(Deserialize)]
        struct ToolCallJson {
            tool: String,
            args: serde_json::Value,
        }

        serde_json::from_str::<ToolCallJson>(&content[start..=end])
            .ok()
            .map(|tc| ToolCall {
                id: generate_tool_call_id(),
                name: tc.tool,
                arguments: tc.args,
            })
    }
}

impl Default for OllamaProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<LlmResponse, LlmError> {
        let ollama_tools = tools.filter(|t| !t.is_empty()).map(Self::convert_tools);
        let has_tools = ollama_tools.is_some();

        let request = OllamaRequest {
            model: self.model.clone(),
            messages: Self::convert_messages(messages),
            stream: false,
            tools: ollama_tools,
        };

        tracing::debug!(
            "Ollama chat: model={}, messages={}, tools={}",
            self.model,
            request.messages.len(),
            has_tools
        );
        let response = self.send_request(&request).await?;
        let usage = response.usage();

        // Native tool calling
        if let Some(tool_calls) = response.message.tool_calls {
            if !tool_calls.is_empty() {
                let calls = tool_calls
                    .into_iter()
                    .map(|tc| ToolCall {
                        id: generate_tool_call_id(),
                        name: tc.function.name,
                        arguments: tc.function.arguments,
                    })
                    .collect();
                return Ok(LlmResponse::ToolCalls { calls, usage });
            }
        }

        if has_tools {
            if let Some(tool_call) = Self::parse_tool_call(&response.message.content) {
                return Ok(LlmResponse::ToolCalls {
                    calls: vec![tool_call],
                    usage,
                });
            }
        }

        // Reasoning models wrap their scratchpad in <think> tags; keep only the answer
        let mut parser = PromptThinkingTagParser::default();
        let (mut text, _) = parser.ingest(&response.message.content);
        text.push_str(&parser.flush().0);

        Ok(LlmResponse::Text {
            text: text.trim().to_string(),
            usage,
        })
    }

    fn chat_stream(&self, messages: Vec<Message>) -> FragmentStream {
        let client = self.client.clone();
        let url = format!("{}/api/chat", self.base_url);
        let request = OllamaRequest {
            model: self.model.clone(),
            messages: Self::convert_messages(&messages),
            stream: true,
            tools: None,
        };

        lazy_stream(
            move || async move {
                tracing::debug!("Ollama streaming request: model={}", request.model);
                let response = client
                    .post(&url)
                    .json(&request)
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
            OllamaChunkDecoder::default(),
            self.stream_idle,
        )
    }
}

/// Turns Ollama's newline-delimited JSON chunks into stream events
#[derive(Debug, Default)]
struct OllamaChunkDecoder {
    lines: LineDecoder,
    thinking: PromptThinkingTagParser,
}

impl OllamaChunkDecoder {
    fn decode_lines(&mut self, lines: Vec<String>) -> Result<Vec<StreamEvent>, LlmError> {
        let mut events = Vec::new();
        for line in lines {
            let chunk: OllamaStreamChunk = serde_json::from_str(&line)
                .map_err(|e| LlmError::Stream(format!("Malformed Ollama chunk: {}", e)))?;

            if let Some(error) = chunk.error {
                return Err(LlmError::Stream(error));
            }

            if let Some(message) = chunk.message {
                if !message.content.is_empty() {
                    let (text, thinking) = self.thinking.ingest(&message.content);
                    push_deltas(&mut events, text, thinking);
                }
            }

            if chunk.done {
                let (text, thinking) = self.thinking.flush();
                push_deltas(&mut events, text, thinking);
                events.push(StreamEvent::Done);
            }
        }
        Ok(events)
    }
}

fn push_deltas(events: &mut Vec<StreamEvent>, text: String, thinking: String) {
    if !thinking.is_empty() {
        events.push(StreamEvent::ThinkingDelta(thinking));
    }
    if !text.is_empty() {
        events.push(StreamEvent::TextDelta(text));
    }
}

impl ChunkDecoder for OllamaChunkDecoder {
    fn decode(&mut self, bytes: &[u8]) -> Result<Vec<StreamEvent>, LlmError> {
        let lines = self.lines.push(bytes);
        self.decode_lines(lines)
    }

    fn finish(&mut self) -> Result<Vec<StreamEvent>, LlmError> {
        let lines = self.lines.finish();
        self.decode_lines(lines)
    }
}

// Ollama API types

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OllamaTool>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OllamaToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

impl OllamaResponse {
    fn usage(&self) -> Option<TokenUsage> {
        match (self.prompt_eval_count, self.eval_count) {
            (Some(input), Some(output)) => Some(TokenUsage {
                input_tokens: input,
                output_tokens: output,
                total_tokens: input + output,
            }),
            _ => None,
        }
    }
}

// Native tool calling types
#[derive(Debug, Clone, Serialize)]
struct OllamaTool {
    #[serde(rename = "type")]
    type_field: String,
    function: OllamaFunction,
}

#[derive(Debug, Clone, Serialize)]
struct OllamaFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OllamaToolCall {
    function: OllamaToolCallFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OllamaToolCallFunction {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

// Streaming response type
#[derive(Debug, Deserialize)]
struct OllamaStreamChunk {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parser_splits_prompt_thinking_tags() {
        let mut parser = PromptThinkingTagParser::default();
        let (t1, k1) = parser.ingest("bonjour <think>réflexion");
        assert_eq!(t1, "bonjour ");
        assert_eq!(k1, "réflexion");

        let (t2, k2) = parser.ingest(" suite</think> monde");
        assert_eq!(t2, " monde");
        assert_eq!(k2, " suite");

        assert_eq!(parser.flush(), (String::new(), String::new()));
    }

    #[test]
    fn parser_handles_split_open_tag() {
        let mut parser = PromptThinkingTagParser::default();
        let (t1, k1) = parser.ingest("titre <thi");
        assert_eq!(t1, "titre ");
        assert_eq!(k1, "");

        let (t2, k2) = parser.ingest("nk>r</think>");
        assert_eq!(t2, "");
        assert_eq!(k2, "r");
    }

    #[test]
    fn decoder_emits_text_and_done() {
        let mut decoder = OllamaChunkDecoder::default();
        let events = decoder
            .decode(
                b"{\"message\":{\"role\":\"assistant\",\"content\":\"Titre\\n\"},\"done\":false}\n\
                  {\"message\":{\"role\":\"assistant\",\"content\":\"r\xc3\xa9sum\xc3\xa9\"},\"done\":false}\n",
            )
            .unwrap();
        assert_eq!(
            events,
            vec![
                StreamEvent::TextDelta("Titre\n".to_string()),
                StreamEvent::TextDelta("résumé".to_string()),
            ]
        );

        let events = decoder.decode(b"{\"done\":true}").unwrap();
        assert!(events.is_empty());
        let events = decoder.finish().unwrap();
        assert_eq!(events, vec![StreamEvent::Done]);
    }

    #[test]
    fn decoder_surfaces_server_errors() {
        let mut decoder = OllamaChunkDecoder::default();
        let err = decoder
            .decode(b"{\"error\":\"model 'x' not found\"}\n")
            .unwrap_err();
        assert!(matches!(err, LlmError::Stream(msg) if msg.contains("not found")));
    }

    #[test]
    fn converts_assistant_tool_calls() {
        let call = ToolCall {
            id: "call_1".to_string(),
            name: "web_search".to_string(),
            arguments: serde_json::json!({"query": "ia"}),
        };
        let messages = vec![
            Message::user("cherche"),
            Message::assistant_tool_calls(None, &[call]),
            Message::tool_result("call_1", "Title: IA"),
        ];

        let converted = OllamaProvider::convert_messages(&messages);
        assert_eq!(converted[1].role, "assistant");
        let calls = converted[1].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.name, "web_search");
        assert_eq!(converted[2].role, "tool");
        assert_eq!(converted[2].content, "Title: IA");
    }

    #[test]
    fn parses_text_tool_call_fallback() {
        let call =
            OllamaProvider::parse_tool_call("Voici: {\"tool\": \"web_search\", \"args\": {\"query\": \"ia\"}}")
                .unwrap();
        assert_eq!(call.name, "web_search");
        assert_eq!(call.arguments["query"], "ia");
        assert!(OllamaProvider::parse_tool_call("pas de json").is_none());
    }
}
