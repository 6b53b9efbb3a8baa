//! Stage runner - executes one profile against the generation engine

use std::sync::Arc;

use thiserror::Error;

use super::profile::StageProfile;
use crate::llm::{FragmentStream, LlmError, LlmProvider, LlmResponse, Message, TokenUsage};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("Tool '{name}' failed: {message}")]
    Tool { name: String, message: String },

    #[error("Model was still calling tools after {0} iterations")]
    ToolLoop(usize),
}

/// Final answer of a non-streaming stage
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutput {
    pub text: String,
    pub tool_calls_made: usize,
    /// Summed over every call of the tool loop
    pub usage: TokenUsage,
}

/// Runs stage profiles on a shared provider handle
#[derive(Clone)]
pub struct StageRunner {
    provider: Arc<dyn LlmProvider>,
    max_tool_iterations: usize,
}

impl StageRunner {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            max_tool_iterations: 4,
        }
    }

    pub fn with_max_tool_iterations(mut self, max: usize) -> Self {
        self.max_tool_iterations = max.max(1);
        self
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    /// Run a stage to its final assistant message
    ///
    /// Tools bound to the profile are offered to the model and executed when
    /// it asks for them; the loop ends at the first answer without tool calls.
    pub async fn complete(
        &self,
        profile: &StageProfile,
        conversation: Vec<Message>,
    ) -> Result<StageOutput, RunnerError> {
        let mut messages = Vec::with_capacity(conversation.len() + 1);
        messages.push(profile.system_message());
        messages.extend(conversation);

        let definitions = profile.tools.definitions();
        let tools = if definitions.is_empty() {
            None
        } else {
            Some(definitions.as_slice())
        };

        let mut tool_calls_made = 0;
        let mut usage = TokenUsage::default();
        for iteration in 0..self.max_tool_iterations {
            tracing::debug!(
                "'{}' iteration {} ({} messages)",
                profile.name,
                iteration + 1,
                messages.len()
            );

            let response = self.provider.chat(&messages, tools).await?;
            if let Some(response_usage) = response.usage() {
                usage.accumulate(response_usage);
            }
            let calls = response.tool_calls().to_vec();

            if calls.is_empty() || tools.is_none() {
                if !calls.is_empty() {
                    tracing::warn!(
                        "'{}' requested {} tool call(s) but has no tools; ignoring",
                        profile.name,
                        calls.len()
                    );
                }
                let text = match response {
                    LlmResponse::Text { text, .. } => text,
                    other => other.text().unwrap_or_default().to_string(),
                };
                return Ok(StageOutput {
                    text,
                    tool_calls_made,
                    usage,
                });
            }

            messages.push(Message::assistant_tool_calls(response.text(), &calls));
            for call in &calls {
                tracing::info!("'{}' calls tool {} with {}", profile.name, call.name, call.arguments);
                let result = profile
                    .tools
                    .execute(&call.name, call.arguments.clone())
                    .await
                    .map_err(|e| RunnerError::Tool {
                        name: call.name.clone(),
                        message: e.to_string(),
                    })?;
                tool_calls_made += 1;
                messages.push(Message::tool_result(&call.id, result.output));
            }
        }

        Err(RunnerError::ToolLoop(self.max_tool_iterations))
    }

    /// Start a streaming stage; nothing is sent until the stream is polled
    pub fn stream(&self, profile: &StageProfile, conversation: Vec<Message>) -> FragmentStream {
        let mut messages = Vec::with_capacity(conversation.len() + 1);
        messages.push(profile.system_message());
        messages.extend(conversation);
        self.provider.chat_stream(messages)
    }
}

#[cfg(all(test, feature = "test-sim"))]
mod tests {
    use super::*;
    use crate::agent::StageKind;
    use crate::llm::scripted::count_tokens;
    use crate::llm::{ProviderEvent, ScriptedProvider};
    use crate::tools::{Tool, ToolRegistry, ToolResult};
    use async_trait::async_trait;
    use futures::StreamExt;
    use serde_json::{json, Value};

    struct UpperTool;

    #[async_trait]
    impl Tool for UpperTool {
        fn name(&self) -> &str {
            "upper"
        }

        fn description(&self) -> &str {
            "uppercases text"
        }

        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }

        async fn execute(&self, params: Value) -> anyhow::Result<ToolResult> {
            let text = params["text"].as_str().unwrap_or_default();
            Ok(ToolResult::success(text.to_uppercase()))
        }
    }

    struct BrokenTool;

    #[async_trait]
    impl Tool for BrokenTool {
        fn name(&self) -> &str {
            "broken"
        }

        fn description(&self) -> &str {
            "always fails"
        }

        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }

        async fn execute(&self, _params: Value) -> anyhow::Result<ToolResult> {
            anyhow::bail!("backend unreachable")
        }
    }

    fn profile_with(tool: Arc<dyn Tool>) -> StageProfile {
        StageProfile::new(StageKind::Search, "Searcher", "find things")
            .with_tools(ToolRegistry::new().with_tool(tool))
    }

    #[tokio::test]
    async fn prepends_instructions_as_system_message() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_text("ok");
        let runner = StageRunner::new(provider.clone());
        let profile = StageProfile::new(StageKind::Synthesize, "Synth", "be brief");

        let out = runner
            .complete(&profile, vec![Message::user("input")])
            .await
            .unwrap();
        assert_eq!(out.text, "ok");
        assert_eq!(
            provider.events()[0],
            ProviderEvent::ChatStarted {
                system: "be brief".to_string(),
                user: "input".to_string()
            }
        );
        assert_eq!(provider.offered_tools(), vec![Vec::<String>::new()]);
    }

    #[tokio::test]
    async fn executes_requested_tools_then_returns_final_text() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_tool_call("upper", json!({"text": "abc"}));
        let runner = StageRunner::new(provider.clone());

        // Second reply is the echo of the tool result
        let out = runner
            .complete(&profile_with(Arc::new(UpperTool)), vec![Message::user("go")])
            .await
            .unwrap();
        assert_eq!(out.text, "ABC");
        assert_eq!(out.tool_calls_made, 1);
        assert_eq!(provider.offered_tools()[0], vec!["upper".to_string()]);
    }

    #[tokio::test]
    async fn usage_is_summed_over_the_tool_loop() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_tool_call("upper", json!({"text": "abc"}));
        let runner = StageRunner::new(provider);

        let out = runner
            .complete(&profile_with(Arc::new(UpperTool)), vec![Message::user("go")])
            .await
            .unwrap();

        // {"text":"abc"} then the "ABC" echo
        let expected_output = count_tokens(r#"{"text":"abc"}"#) + count_tokens("ABC");
        assert_eq!(out.usage.output_tokens, expected_output);
        assert!(out.usage.input_tokens >= 2);
        assert_eq!(
            out.usage.total_tokens,
            out.usage.input_tokens + out.usage.output_tokens
        );
    }

    #[tokio::test]
    async fn tool_errors_abort_the_stage() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_tool_call("broken", json!({}));
        let runner = StageRunner::new(provider);

        let err = runner
            .complete(&profile_with(Arc::new(BrokenTool)), vec![Message::user("go")])
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Tool { ref name, .. } if name == "broken"));
        assert!(err.to_string().contains("backend unreachable"));
    }

    #[tokio::test]
    async fn endless_tool_calls_hit_the_iteration_cap() {
        let provider = Arc::new(ScriptedProvider::new());
        for _ in 0..3 {
            provider.push_tool_call("upper", json!({"text": "x"}));
        }
        let runner = StageRunner::new(provider).with_max_tool_iterations(2);

        let err = runner
            .complete(&profile_with(Arc::new(UpperTool)), vec![Message::user("go")])
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::ToolLoop(2)));
    }

    #[tokio::test]
    async fn stream_carries_profile_instructions() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_stream(["a", "b"]);
        let runner = StageRunner::new(provider.clone());
        let profile = StageProfile::new(StageKind::Write, "Writer", "write well");

        let stream = runner.stream(&profile, vec![Message::user("notes")]);
        let text: String = stream
            .filter_map(|item| async move { item.ok().and_then(|e| e.content().map(str::to_string)) })
            .collect()
            .await;
        assert_eq!(text, "ab");
        assert_eq!(
            provider.events()[0],
            ProviderEvent::StreamCreated {
                system: "write well".to_string()
            }
        );
    }
}
