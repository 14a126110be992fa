// Anthropic Provider Adapter
//
// Anti-Corruption Layer for the Anthropic messages API. The system prompt
// travels as a top-level field and tool traffic travels as content blocks
// (tool_use / tool_result), so the conversation mapping differs from the
// OpenAI-style adapters.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::conversation::{ConversationMessage, MessageRole};
use crate::domain::provider::{
    CompletionRequest, CompletionResponse, FinishReason, ModelProvider, ProviderError, ToolChoice,
};
use crate::domain::tool::ToolCall;

pub struct AnthropicAdapter {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<serde_json::Value>,
}

#[derive(Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<AnthropicBlock>,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "is_false")]
        is_error: bool,
    },
}

fn is_false(value: &bool) -> bool {
    !value
}

#[derive(Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<AnthropicBlock>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

impl AnthropicAdapter {
    pub fn new(endpoint: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
        }
    }

    fn build_messages(messages: &[ConversationMessage]) -> Vec<AnthropicMessage> {
        let mut wire = Vec::with_capacity(messages.len());
        for message in messages {
            match message.role {
                MessageRole::User => wire.push(AnthropicMessage {
                    role: "user".to_string(),
                    content: vec![AnthropicBlock::Text {
                        text: message.content.clone(),
                    }],
                }),
                MessageRole::Assistant => {
                    let mut content = Vec::new();
                    if !message.content.is_empty() {
                        content.push(AnthropicBlock::Text {
                            text: message.content.clone(),
                        });
                    }
                    for call in &message.tool_calls {
                        content.push(AnthropicBlock::ToolUse {
                            id: call.id.clone(),
                            name: call.name.clone(),
                            input: call.arguments.clone(),
                        });
                    }
                    wire.push(AnthropicMessage {
                        role: "assistant".to_string(),
                        content,
                    });
                }
                // The API has no tool role; results travel in user turns
                MessageRole::Tool => wire.push(AnthropicMessage {
                    role: "user".to_string(),
                    content: vec![AnthropicBlock::ToolResult {
                        tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                        content: message.content.clone(),
                        is_error: message.is_error,
                    }],
                }),
            }
        }
        wire
    }
}

fn parse_stop_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("end_turn") | Some("stop_sequence") | None => FinishReason::Stop,
        Some("tool_use") => FinishReason::ToolCalls,
        Some("max_tokens") => FinishReason::Length,
        Some(other) => FinishReason::Other(other.to_string()),
    }
}

#[async_trait]
impl ModelProvider for AnthropicAdapter {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .iter()
                    .map(|spec| AnthropicTool {
                        name: spec.name.clone(),
                        description: spec.description.clone(),
                        input_schema: spec.parameters.clone(),
                    })
                    .collect(),
            )
        };
        let tool_choice = tools.as_ref().map(|_| match request.tool_choice {
            ToolChoice::Auto => serde_json::json!({ "type": "auto" }),
            ToolChoice::None => serde_json::json!({ "type": "none" }),
        });

        // reasoning_effort has no direct equivalent here; it is an
        // OpenAI-side knob and is intentionally not forwarded.
        let wire_request = AnthropicRequest {
            model: request.model.clone(),
            max_tokens: request.max_tokens,
            system: request.system.clone(),
            messages: Self::build_messages(&request.messages),
            tools,
            tool_choice,
        };

        let url = format!("{}/messages", self.endpoint.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&wire_request)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();

            return Err(if status == 401 || status == 403 {
                ProviderError::Authentication(error_text)
            } else if status == 429 {
                ProviderError::RateLimit
            } else if status == 404 {
                ProviderError::ModelNotFound(request.model)
            } else {
                ProviderError::Api(format!("HTTP {}: {}", status, error_text))
            });
        }

        let wire_response: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for block in wire_response.content {
            match block {
                AnthropicBlock::Text { text } => content.push_str(&text),
                AnthropicBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments: input,
                }),
                AnthropicBlock::ToolResult { .. } => {}
            }
        }

        Ok(CompletionResponse {
            content,
            tool_calls,
            input_tokens: wire_response.usage.input_tokens,
            output_tokens: wire_response.usage.output_tokens,
            model: wire_response.model,
            finish_reason: parse_stop_reason(wire_response.stop_reason.as_deref()),
        })
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        let url = format!("{}/models", self.endpoint.trim_end_matches('/'));

        let response = self
            .client
            .get(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else if response.status() == 401 || response.status() == 403 {
            Err(ProviderError::Authentication("Invalid API key".to_string()))
        } else {
            Err(ProviderError::Network(format!("HTTP {}", response.status())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request_with_tools() -> CompletionRequest {
        let mut request = CompletionRequest::new(
            "claude-sonnet-4-5",
            vec![ConversationMessage::user("hello")],
        );
        request.system = Some("be brief".to_string());
        request.tools = vec![crate::domain::provider::ToolSpec {
            name: "echo".to_string(),
            description: "echo".to_string(),
            parameters: json!({ "type": "object" }),
        }];
        request
    }

    #[test]
    fn wire_messages_map_tool_turns_to_user_results() {
        let messages = vec![
            ConversationMessage::user("hello"),
            ConversationMessage::assistant_with_calls(
                "Let me check.",
                vec![ToolCall {
                    id: "toolu_1".to_string(),
                    name: "echo".to_string(),
                    arguments: json!({ "text": "hi" }),
                }],
            ),
            ConversationMessage::tool_result("toolu_1", "Echoed: hi", true),
        ];

        let wire = AnthropicAdapter::build_messages(&messages);
        let value = serde_json::to_value(&wire).unwrap();

        assert_eq!(value[0]["role"], "user");
        assert_eq!(value[0]["content"][0]["type"], "text");
        assert_eq!(value[1]["role"], "assistant");
        assert_eq!(value[1]["content"][0]["text"], "Let me check.");
        assert_eq!(value[1]["content"][1]["type"], "tool_use");
        assert_eq!(value[1]["content"][1]["id"], "toolu_1");
        assert_eq!(value[1]["content"][1]["input"], json!({ "text": "hi" }));
        // Tool results are user turns carrying a tool_result block
        assert_eq!(value[2]["role"], "user");
        assert_eq!(value[2]["content"][0]["type"], "tool_result");
        assert_eq!(value[2]["content"][0]["tool_use_id"], "toolu_1");
        assert_eq!(value[2]["content"][0]["is_error"], true);
    }

    #[test]
    fn assistant_without_text_omits_the_empty_block() {
        let messages = vec![ConversationMessage::assistant_with_calls(
            "",
            vec![ToolCall {
                id: "toolu_1".to_string(),
                name: "echo".to_string(),
                arguments: json!({}),
            }],
        )];

        let wire = AnthropicAdapter::build_messages(&messages);
        assert_eq!(wire[0].content.len(), 1);
        assert!(matches!(wire[0].content[0], AnthropicBlock::ToolUse { .. }));
    }

    #[tokio::test]
    async fn parses_tool_use_blocks_and_usage() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/messages")
            .match_header("x-api-key", "test-key")
            .match_header("anthropic-version", "2023-06-01")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "id": "msg_1",
                    "model": "claude-sonnet-4-5",
                    "content": [
                        { "type": "text", "text": "Checking." },
                        {
                            "type": "tool_use",
                            "id": "toolu_9",
                            "name": "echo",
                            "input": { "text": "hi" }
                        }
                    ],
                    "stop_reason": "tool_use",
                    "usage": { "input_tokens": 21, "output_tokens": 9 }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let adapter = AnthropicAdapter::new(server.url(), "test-key".to_string());
        let response = adapter.complete(request_with_tools()).await.unwrap();

        assert_eq!(response.content, "Checking.");
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].id, "toolu_9");
        assert_eq!(response.tool_calls[0].arguments, json!({ "text": "hi" }));
        assert_eq!(response.input_tokens, 21);
        assert_eq!(response.output_tokens, 9);
        assert_eq!(response.finish_reason, FinishReason::ToolCalls);

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn maps_stop_reasons() {
        assert_eq!(parse_stop_reason(Some("end_turn")), FinishReason::Stop);
        assert_eq!(parse_stop_reason(Some("stop_sequence")), FinishReason::Stop);
        assert_eq!(parse_stop_reason(Some("max_tokens")), FinishReason::Length);
        assert_eq!(parse_stop_reason(Some("tool_use")), FinishReason::ToolCalls);
        assert_eq!(parse_stop_reason(None), FinishReason::Stop);
        assert_eq!(
            parse_stop_reason(Some("refusal")),
            FinishReason::Other("refusal".to_string())
        );
    }

    #[tokio::test]
    async fn maps_rate_limits() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/messages")
            .with_status(429)
            .create_async()
            .await;

        let adapter = AnthropicAdapter::new(server.url(), "key".to_string());
        let error = adapter.complete(request_with_tools()).await.unwrap_err();
        assert!(matches!(error, ProviderError::RateLimit));
    }
}
