//! Anthropic API backend.

use crate::model::{
    Backend, Message, ModelError, ModelRequest, ModelResponse, Part, Role, ToolCall, ToolResult,
    ToolSpec, Usage,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

// ─────────────────────────────────────────────────────────────────────────────
// API Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool>,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: Vec<ApiContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Serialize)]
struct ApiTool {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    content: Vec<ApiResponseBlock>,
    #[serde(default)]
    usage: ApiUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Default, Deserialize)]
struct ApiUsage {
    input_tokens: u32,
    output_tokens: u32,
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend Implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for creating an Anthropic backend.
#[derive(Debug, Clone)]
pub struct AnthropicBackendBuilder {
    api_key: String,
    model: String,
    max_tokens: u32,
    system: Option<String>,
    url: String,
}

impl AnthropicBackendBuilder {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: 4096,
            system: None,
            url: ANTHROPIC_API_URL.to_string(),
        }
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Send requests somewhere other than the public messages endpoint.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn build(self) -> AnthropicBackend {
        AnthropicBackend {
            client: reqwest::Client::new(),
            api_key: self.api_key,
            model: self.model,
            max_tokens: self.max_tokens,
            system: self.system,
            url: self.url,
        }
    }
}

/// Anthropic API backend.
pub struct AnthropicBackend {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    system: Option<String>,
    url: String,
}

impl AnthropicBackend {
    pub fn builder(api_key: impl Into<String>, model: impl Into<String>) -> AnthropicBackendBuilder {
        AnthropicBackendBuilder::new(api_key, model)
    }

    /// System text from the builder followed by any system messages.
    fn system_prompt(&self, messages: &[Message]) -> Option<String> {
        let parts: Vec<String> = self
            .system
            .iter()
            .cloned()
            .chain(
                messages
                    .iter()
                    .filter(|m| m.role == Role::System)
                    .map(Message::text),
            )
            .filter(|s| !s.trim().is_empty())
            .collect();
        (!parts.is_empty()).then(|| parts.join("\n\n"))
    }

    /// Convert the conversation. Tool results go back as user turns, and
    /// consecutive results share one turn. Without tools on the request,
    /// earlier tool traffic is rendered as plain text.
    fn messages_to_api(messages: &[Message], with_tools: bool) -> Vec<ApiMessage> {
        let mut api: Vec<ApiMessage> = Vec::new();
        let mut last_was_tool = false;

        for msg in messages.iter().filter(|m| m.role != Role::System) {
            let blocks: Vec<ApiContentBlock> = msg
                .parts
                .iter()
                .filter_map(|part| Self::part_to_api(part, with_tools))
                .collect();
            if blocks.is_empty() {
                continue;
            }

            let is_tool = msg.role == Role::Tool;
            match api.last_mut() {
                Some(prev) if is_tool && last_was_tool => prev.content.extend(blocks),
                _ => api.push(ApiMessage {
                    role: match msg.role {
                        Role::Assistant => "assistant",
                        Role::User | Role::Tool | Role::System => "user",
                    },
                    content: blocks,
                }),
            }
            last_was_tool = is_tool;
        }
        api
    }

    fn part_to_api(part: &Part, with_tools: bool) -> Option<ApiContentBlock> {
        match part {
            Part::Text(text) if text.is_empty() => None,
            Part::Text(text) => Some(ApiContentBlock::Text { text: text.clone() }),
            Part::ToolCall(call) if with_tools => Some(ApiContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.name.clone(),
                input: serde_json::from_str::<Value>(&call.arguments)
                    .ok()
                    .filter(Value::is_object)
                    .unwrap_or_else(|| Value::Object(Default::default())),
            }),
            Part::ToolCall(call) => Some(ApiContentBlock::Text {
                text: format!("[called {} with {}]", call.name, call.arguments),
            }),
            Part::ToolResult(result) if with_tools => Some(ApiContentBlock::ToolResult {
                tool_use_id: result.tool_call_id.clone(),
                content: result.content.clone(),
                is_error: result.is_error,
            }),
            Part::ToolResult(ToolResult {
                tool_call_id,
                content,
                ..
            }) => Some(ApiContentBlock::Text {
                text: format!("[result of {tool_call_id}]\n{content}"),
            }),
        }
    }

    fn tool_to_api(spec: &ToolSpec) -> ApiTool {
        ApiTool {
            name: spec.name.clone(),
            description: spec.description.clone(),
            input_schema: spec.schema.clone(),
        }
    }

    fn response_to_message(blocks: Vec<ApiResponseBlock>) -> Message {
        let parts: Vec<Part> = blocks
            .into_iter()
            .filter_map(|block| match block {
                ApiResponseBlock::Text { text } => Some(Part::Text(text)),
                ApiResponseBlock::ToolUse { id, name, input } => Some(Part::ToolCall(ToolCall {
                    id,
                    name,
                    arguments: input.to_string(),
                })),
                ApiResponseBlock::Unknown => None,
            })
            .collect();

        Message {
            role: Role::Assistant,
            parts,
        }
    }
}

impl std::fmt::Display for AnthropicBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "anthropic({})", self.model)
    }
}

impl Backend for AnthropicBackend {
    async fn call(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        let with_tools = !request.tools.is_empty();
        let api_request = ApiRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            messages: Self::messages_to_api(request.messages, with_tools),
            system: self.system_prompt(request.messages),
            tools: request.tools.iter().map(Self::tool_to_api).collect(),
        };
        debug!(
            model = %self.model,
            messages = api_request.messages.len(),
            tools = api_request.tools.len(),
            "calling model"
        );

        let response = self
            .client
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .header("accept", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api { status, body });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;

        Ok(ModelResponse {
            message: Self::response_to_message(api_response.content),
            usage: Usage {
                input_tokens: api_response.usage.input_tokens,
                output_tokens: api_response.usage.output_tokens,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn conversation() -> Vec<Message> {
        vec![
            Message::system("Be brief."),
            Message::user("What time is it?"),
            Message {
                role: Role::Assistant,
                parts: vec![
                    Part::Text(String::new()),
                    Part::ToolCall(ToolCall {
                        id: "t1".into(),
                        name: "clock__get_time".into(),
                        arguments: r#"{"timezone":"UTC"}"#.into(),
                    }),
                    Part::ToolCall(ToolCall {
                        id: "t2".into(),
                        name: "clock__get_zone".into(),
                        arguments: String::new(),
                    }),
                ],
            },
            Message::tool_result(ToolResult {
                tool_call_id: "t1".into(),
                content: "noon".into(),
                is_error: false,
            }),
            Message::tool_result(ToolResult {
                tool_call_id: "t2".into(),
                content: "unknown tool".into(),
                is_error: true,
            }),
        ]
    }

    #[test]
    fn display() {
        let backend = AnthropicBackend::builder("key", "claude-test").build();
        assert_eq!(backend.to_string(), "anthropic(claude-test)");
    }

    #[test]
    fn system_messages_become_system_prompt() {
        let backend = AnthropicBackend::builder("key", "m").system("You help.").build();
        assert_eq!(
            backend.system_prompt(&conversation()).as_deref(),
            Some("You help.\n\nBe brief.")
        );
    }

    #[test]
    fn tool_results_share_one_user_turn() {
        let api = AnthropicBackend::messages_to_api(&conversation(), true);
        let json = serde_json::to_value(&api).unwrap();

        assert_eq!(api.len(), 3);
        assert_eq!(json[1]["role"], "assistant");
        assert_eq!(json[1]["content"].as_array().unwrap().len(), 2);
        assert_eq!(json[1]["content"][0]["input"], json!({"timezone": "UTC"}));
        assert_eq!(json[1]["content"][1]["input"], json!({}));
        assert_eq!(json[2]["role"], "user");
        assert_eq!(json[2]["content"][0]["tool_use_id"], "t1");
        assert_eq!(json[2]["content"][1]["is_error"], true);
    }

    #[test]
    fn tool_traffic_flattened_without_tools() {
        let api = AnthropicBackend::messages_to_api(&conversation(), false);
        let json = serde_json::to_value(&api).unwrap();
        for message in json.as_array().unwrap() {
            for block in message["content"].as_array().unwrap() {
                assert_eq!(block["type"], "text");
            }
        }
        assert_eq!(json[2]["content"][0]["text"], "[result of t1]\nnoon");
    }

    #[test]
    fn tool_use_arguments_become_text() {
        let message = AnthropicBackend::response_to_message(vec![
            ApiResponseBlock::Text {
                text: "checking".into(),
            },
            ApiResponseBlock::ToolUse {
                id: "u1".into(),
                name: "clock__get_time".into(),
                input: json!({"timezone": "UTC"}),
            },
            ApiResponseBlock::Unknown,
        ]);
        let calls = message.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments, r#"{"timezone":"UTC"}"#);
        assert_eq!(message.text(), "checking");
    }
}
