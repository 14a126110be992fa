// OpenAI Provider Adapter
//
// Anti-Corruption Layer for the OpenAI chat-completions API, including
// tool calling. Also works with OpenAI-compatible APIs (LM Studio, vLLM,
// etc.), which is why the endpoint is injected rather than fixed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::conversation::{ConversationMessage, MessageRole};
use crate::domain::provider::{
    CompletionRequest, CompletionResponse, FinishReason, ModelProvider, ProviderError,
    ReasoningEffort, ToolChoice,
};
use crate::domain::tool::ToolCall;

pub struct OpenAIAdapter {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

#[derive(Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAITool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<serde_json::Value>,
}

#[derive(Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAIToolCall>>,
}

#[derive(Serialize)]
struct OpenAITool {
    #[serde(rename = "type")]
    tool_type: String,
    function: OpenAIFunction,
}

#[derive(Serialize)]
struct OpenAIFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Serialize, Deserialize)]
struct OpenAIToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: OpenAIFunctionCall,
}

#[derive(Serialize, Deserialize)]
struct OpenAIFunctionCall {
    name: String,
    /// JSON-encoded arguments, a string on the wire
    arguments: String,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    model: String,
    choices: Vec<OpenAIChoice>,
    usage: OpenAIUsage,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAIToolCall>>,
}

#[derive(Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl OpenAIAdapter {
    pub fn new(endpoint: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
        }
    }

    fn build_messages(system: Option<&str>, messages: &[ConversationMessage]) -> Vec<OpenAIMessage> {
        let mut wire = Vec::with_capacity(messages.len() + 1);
        if let Some(system) = system {
            wire.push(OpenAIMessage {
                role: "system".to_string(),
                content: Some(system.to_string()),
                tool_call_id: None,
                tool_calls: None,
            });
        }

        for message in messages {
            let role = match message.role {
                MessageRole::User => "user",
                MessageRole::Assistant => "assistant",
                MessageRole::Tool => "tool",
            };
            // Assistant turns must re-state the calls they made so tool
            // results can be correlated; error results travel as content.
            let tool_calls = if message.tool_calls.is_empty() {
                None
            } else {
                Some(
                    message
                        .tool_calls
                        .iter()
                        .map(|call| OpenAIToolCall {
                            id: call.id.clone(),
                            call_type: "function".to_string(),
                            function: OpenAIFunctionCall {
                                name: call.name.clone(),
                                arguments: call.arguments.to_string(),
                            },
                        })
                        .collect(),
                )
            };
            wire.push(OpenAIMessage {
                role: role.to_string(),
                content: Some(message.content.clone()),
                tool_call_id: message.tool_call_id.clone(),
                tool_calls,
            });
        }
        wire
    }

    fn effort_str(effort: ReasoningEffort) -> String {
        match effort {
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
        .to_string()
    }
}

fn parse_finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("stop") | None => FinishReason::Stop,
        Some("length") => FinishReason::Length,
        Some("tool_calls") => FinishReason::ToolCalls,
        Some(other) => FinishReason::Other(other.to_string()),
    }
}

#[async_trait]
impl ModelProvider for OpenAIAdapter {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        // Translate domain types to OpenAI's wire format
        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .iter()
                    .map(|spec| OpenAITool {
                        tool_type: "function".to_string(),
                        function: OpenAIFunction {
                            name: spec.name.clone(),
                            description: spec.description.clone(),
                            parameters: spec.parameters.clone(),
                        },
                    })
                    .collect(),
            )
        };
        let tool_choice = tools.as_ref().map(|_| match request.tool_choice {
            ToolChoice::Auto => serde_json::json!("auto"),
            ToolChoice::None => serde_json::json!("none"),
        });

        let wire_request = OpenAIRequest {
            model: request.model.clone(),
            messages: Self::build_messages(request.system.as_deref(), &request.messages),
            max_tokens: request.max_tokens,
            reasoning_effort: request.reasoning_effort.map(Self::effort_str),
            tools,
            tool_choice,
        };

        let url = format!("{}/chat/completions", self.endpoint.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
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

        let wire_response: OpenAIResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        let choice = wire_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("No choices in response".to_string()))?;

        let tool_calls: Vec<ToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| {
                // Malformed arguments degrade to null; the tool will report
                // the failure and the loop carries it back to the model
                let arguments = serde_json::from_str(&call.function.arguments)
                    .unwrap_or(serde_json::Value::Null);
                ToolCall {
                    id: call.id,
                    name: call.function.name,
                    arguments,
                }
            })
            .collect();

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            input_tokens: wire_response.usage.prompt_tokens,
            output_tokens: wire_response.usage.completion_tokens,
            model: wire_response.model,
            finish_reason: parse_finish_reason(choice.finish_reason.as_deref()),
        })
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        // Simple check - hit the models listing endpoint
        let url = format!("{}/models", self.endpoint.trim_end_matches('/'));

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
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
            "gpt-4o-mini",
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
    fn wire_messages_carry_system_calls_and_results() {
        let messages = vec![
            ConversationMessage::user("hello"),
            ConversationMessage::assistant_with_calls(
                "",
                vec![ToolCall {
                    id: "call_1".to_string(),
                    name: "echo".to_string(),
                    arguments: json!({ "text": "hi" }),
                }],
            ),
            ConversationMessage::tool_result("call_1", "Echoed: hi", false),
        ];

        let wire = OpenAIAdapter::build_messages(Some("be brief"), &messages);
        let value = serde_json::to_value(&wire).unwrap();

        assert_eq!(value[0]["role"], "system");
        assert_eq!(value[0]["content"], "be brief");
        assert_eq!(value[1]["role"], "user");
        assert_eq!(value[2]["role"], "assistant");
        assert_eq!(value[2]["tool_calls"][0]["id"], "call_1");
        assert_eq!(value[2]["tool_calls"][0]["type"], "function");
        assert_eq!(
            value[2]["tool_calls"][0]["function"]["arguments"],
            "{\"text\":\"hi\"}"
        );
        assert_eq!(value[3]["role"], "tool");
        assert_eq!(value[3]["tool_call_id"], "call_1");
        assert_eq!(value[3]["content"], "Echoed: hi");
    }

    #[tokio::test]
    async fn parses_tool_calls_and_usage() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "id": "chatcmpl-1",
                    "model": "gpt-4o-mini",
                    "choices": [{
                        "index": 0,
                        "message": {
                            "role": "assistant",
                            "content": null,
                            "tool_calls": [{
                                "id": "call_9",
                                "type": "function",
                                "function": { "name": "echo", "arguments": "{\"text\":\"hi\"}" }
                            }]
                        },
                        "finish_reason": "tool_calls"
                    }],
                    "usage": { "prompt_tokens": 12, "completion_tokens": 7 }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let adapter = OpenAIAdapter::new(server.url(), "test-key".to_string());
        let response = adapter.complete(request_with_tools()).await.unwrap();

        assert_eq!(response.content, "");
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].id, "call_9");
        assert_eq!(response.tool_calls[0].name, "echo");
        assert_eq!(response.tool_calls[0].arguments, json!({ "text": "hi" }));
        assert_eq!(response.input_tokens, 12);
        assert_eq!(response.output_tokens, 7);
        assert_eq!(response.finish_reason, FinishReason::ToolCalls);

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn maps_authentication_failures() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body("bad key")
            .create_async()
            .await;

        let adapter = OpenAIAdapter::new(server.url(), "bad-key".to_string());
        let error = adapter.complete(request_with_tools()).await.unwrap_err();

        assert!(matches!(error, ProviderError::Authentication(_)));
    }

    #[tokio::test]
    async fn maps_rate_limits_and_missing_models() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .create_async()
            .await;

        let adapter = OpenAIAdapter::new(server.url(), "key".to_string());
        let error = adapter.complete(request_with_tools()).await.unwrap_err();
        assert!(matches!(error, ProviderError::RateLimit));

        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(404)
            .create_async()
            .await;

        let adapter = OpenAIAdapter::new(server.url(), "key".to_string());
        let error = adapter.complete(request_with_tools()).await.unwrap_err();
        assert!(matches!(error, ProviderError::ModelNotFound(model) if model == "gpt-4o-mini"));
    }
}
