use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::llm::stream::SseDecoder;
use crate::llm::{
    ConversationRequest, Continuation, Decoded, JsonBodyDecoder, ModelMessage, ModelToolCall,
    ModelToolChoice, Reasoning, ReasoningBlock, ResponseDecoder, StatusClass, ToolInvocation,
    Vendor, merge_extra_body, non_empty,
};
use crate::transport::HttpRequest;

const DEFAULT_API_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 1024;
const OVERLOADED_STATUS: u16 = 529;

#[derive(Debug, Clone)]
/// Runtime configuration for [`AnthropicModel`].
pub struct AnthropicModelConfig {
    /// Anthropic API key.
    pub api_key: String,
    /// Model id (for example `claude-sonnet-4-5`).
    pub model: String,
    /// Anthropic API version header value.
    pub api_version: String,
    /// Optional base URL override for proxies or compatible endpoints.
    pub api_base_url: Option<String>,
    /// Maximum output tokens per call.
    pub max_tokens: u32,
    /// Optional sampling temperature.
    pub temperature: Option<f32>,
    /// Optional nucleus sampling parameter.
    pub top_p: Option<f32>,
    /// Optional budget for extended thinking tokens.
    pub thinking_budget_tokens: Option<u32>,
    /// Request an SSE stream instead of a single JSON document.
    pub stream: bool,
    /// Extra top-level request fields, applied last. A `null` value removes
    /// the field from the encoded body.
    pub extra_body: Map<String, Value>,
}

impl AnthropicModelConfig {
    /// Creates a config with streaming on and a 1024 token output cap.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
            api_base_url: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: None,
            top_p: None,
            thinking_budget_tokens: None,
            stream: true,
            extra_body: Map::new(),
        }
    }

    /// Adds one extra request field, e.g. `parameter("metadata", json!({"user_id": "u-1"}))`.
    pub fn parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra_body.insert(name.into(), value.into());
        self
    }

    /// Reads the key from `ANTHROPIC_API_KEY`.
    pub fn from_env(model: impl Into<String>) -> Result<Self, ProviderError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| {
            ProviderError::Authentication("ANTHROPIC_API_KEY is not set".to_string())
        })?;
        Ok(Self::new(api_key, model))
    }
}

#[derive(Debug, Clone)]
/// Messages API codec implementing [`Vendor`].
pub struct AnthropicModel {
    config: AnthropicModelConfig,
}

impl AnthropicModel {
    pub fn new(config: AnthropicModelConfig) -> Self {
        Self { config }
    }

    /// Creates a model using `ANTHROPIC_API_KEY` from the environment.
    pub fn from_env(model: impl Into<String>) -> Result<Self, ProviderError> {
        Ok(Self::new(AnthropicModelConfig::from_env(model)?))
    }

    pub fn config(&self) -> &AnthropicModelConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        let base = self
            .config
            .api_base_url
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE_URL)
            .trim_end_matches('/');
        format!("{base}/v1/{path}")
    }
}

impl Vendor for AnthropicModel {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn encode(&self, request: &ConversationRequest<'_>) -> Result<HttpRequest, ProviderError> {
        let mut body = serde_json::to_value(build_request(request, &self.config))
            .map_err(|err| ProviderError::Encode(err.to_string()))?;
        merge_extra_body(&mut body, &self.config.extra_body);

        Ok(HttpRequest::post(self.url("messages"), body)
            .header("x-api-key", self.config.api_key.clone())
            .header("anthropic-version", self.config.api_version.clone())
            .header("content-type", "application/json"))
    }

    fn decoder(&self) -> Box<dyn ResponseDecoder> {
        if self.config.stream {
            Box::new(SseDecoder::new())
        } else {
            Box::new(JsonBodyDecoder::new(parse_response))
        }
    }

    fn classify_status(&self, status: u16) -> StatusClass {
        match status {
            OVERLOADED_STATUS => StatusClass::RateLimited,
            other => StatusClass::from_status(other),
        }
    }

    fn connection_check(&self) -> Option<HttpRequest> {
        Some(
            HttpRequest::get(self.url("models"))
                .header("x-api-key", self.config.api_key.clone())
                .header("anthropic-version", self.config.api_version.clone()),
        )
    }
}

#[derive(Debug, Serialize)]
struct AnthropicMessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<AnthropicToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<AnthropicThinking>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: Vec<AnthropicContentBlock>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    RedactedThinking {
        data: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicToolChoice {
    Auto,
    None,
    Tool { name: String },
}

#[derive(Debug, Serialize)]
struct AnthropicThinking {
    #[serde(rename = "type")]
    type_: &'static str,
    budget_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct AnthropicMessagesResponse {
    #[serde(default)]
    content: Vec<AnthropicContentBlock>,
}

fn build_request(
    request: &ConversationRequest<'_>,
    config: &AnthropicModelConfig,
) -> AnthropicMessagesRequest {
    let (messages, system) = to_anthropic_messages(request.messages);

    let tools = if request.tools.is_empty() {
        None
    } else {
        Some(
            request
                .tools
                .iter()
                .map(|tool| AnthropicTool {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    input_schema: tool.parameters.clone(),
                })
                .collect::<Vec<_>>(),
        )
    };

    let tool_choice = if request.tools.is_empty() {
        None
    } else {
        Some(match request.tool_choice {
            ModelToolChoice::Auto => AnthropicToolChoice::Auto,
            ModelToolChoice::None => AnthropicToolChoice::None,
            ModelToolChoice::Tool(name) => AnthropicToolChoice::Tool { name: name.clone() },
        })
    };

    let forced = matches!(tool_choice, Some(AnthropicToolChoice::Tool { .. }));
    let thinking = match config.thinking_budget_tokens {
        Some(_) if forced => {
            warn!("extended thinking cannot be combined with a forced tool; omitting thinking");
            None
        }
        Some(_) if request.suppress_thinking => {
            debug!("turn began with a forced tool; keeping thinking off");
            None
        }
        Some(budget_tokens) => Some(AnthropicThinking {
            type_: "enabled",
            budget_tokens,
        }),
        None => None,
    };

    AnthropicMessagesRequest {
        model: config.model.clone(),
        max_tokens: config.max_tokens,
        messages,
        system,
        tools,
        tool_choice,
        temperature: config.temperature,
        top_p: config.top_p,
        thinking,
        stream: config.stream,
    }
}

fn to_anthropic_messages(messages: &[ModelMessage]) -> (Vec<AnthropicMessage>, Option<String>) {
    let mut system_lines = Vec::new();
    let mut anthropic_messages: Vec<AnthropicMessage> = Vec::new();
    let mut open_tool_results = false;

    for message in messages {
        let is_tool_result = matches!(message, ModelMessage::ToolResult { .. });

        match message {
            ModelMessage::System(content) => system_lines.push(content.clone()),
            ModelMessage::User(content) => {
                let block = AnthropicContentBlock::Text {
                    text: content.clone(),
                };
                // consecutive user entries share one message
                match anthropic_messages.last_mut() {
                    Some(last) if last.role == "user" => last.content.push(block),
                    _ => anthropic_messages.push(AnthropicMessage {
                        role: "user",
                        content: vec![block],
                    }),
                }
            }
            ModelMessage::Assistant {
                content,
                reasoning,
                tool_calls,
            } => {
                let mut blocks = Vec::new();
                for block in reasoning.iter().flat_map(|reasoning| &reasoning.blocks) {
                    blocks.push(match block {
                        ReasoningBlock::Thinking { text, signature } => {
                            AnthropicContentBlock::Thinking {
                                thinking: text.clone(),
                                signature: signature.clone(),
                            }
                        }
                        ReasoningBlock::Redacted { data } => {
                            AnthropicContentBlock::RedactedThinking { data: data.clone() }
                        }
                    });
                }
                if let Some(content) = content.as_ref().filter(|text| !text.is_empty()) {
                    blocks.push(AnthropicContentBlock::Text {
                        text: content.clone(),
                    });
                }
                for call in tool_calls {
                    blocks.push(AnthropicContentBlock::ToolUse {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        input: Value::Object(call.arguments.clone()),
                    });
                }
                if blocks.is_empty() {
                    // empty text blocks are rejected; the user turns around it merge
                    debug!("skipping assistant entry without content");
                    open_tool_results = false;
                    continue;
                }
                anthropic_messages.push(AnthropicMessage {
                    role: "assistant",
                    content: blocks,
                });
            }
            ModelMessage::ToolResult {
                tool_call_id,
                tool_name: _,
                content,
                is_error,
            } => {
                let block = AnthropicContentBlock::ToolResult {
                    tool_use_id: tool_call_id.clone(),
                    content: content.clone(),
                    is_error: *is_error,
                };
                // results answering one assistant turn share a user message
                match anthropic_messages.last_mut() {
                    Some(last) if open_tool_results => last.content.push(block),
                    _ => anthropic_messages.push(AnthropicMessage {
                        role: "user",
                        content: vec![block],
                    }),
                }
            }
        }

        open_tool_results = is_tool_result;
    }

    let system = if system_lines.is_empty() {
        None
    } else {
        Some(system_lines.join("\n\n"))
    };

    (anthropic_messages, system)
}

fn parse_response(body: &[u8]) -> Result<Decoded, ProviderError> {
    let response = serde_json::from_slice::<AnthropicMessagesResponse>(body)
        .map_err(|err| ProviderError::MalformedResponse(format!("anthropic response: {err}")))?;
    Ok(normalize_response(response))
}

fn normalize_response(response: AnthropicMessagesResponse) -> Decoded {
    let mut text = String::new();
    let mut reasoning = Reasoning::default();
    let mut calls = Vec::new();

    for block in response.content {
        match block {
            AnthropicContentBlock::Text { text: part } => text.push_str(&part),
            AnthropicContentBlock::Thinking {
                thinking,
                signature,
            } => reasoning.blocks.push(ReasoningBlock::Thinking {
                text: thinking,
                signature,
            }),
            AnthropicContentBlock::RedactedThinking { data } => {
                reasoning.blocks.push(ReasoningBlock::Redacted { data })
            }
            AnthropicContentBlock::ToolUse { id, name, input } => {
                let arguments = match input {
                    Value::Object(arguments) => arguments,
                    Value::Null => Default::default(),
                    other => {
                        warn!(tool = %name, input = %other, "tool_use input is not an object; using empty arguments");
                        Default::default()
                    }
                };
                calls.push(ModelToolCall {
                    id,
                    name,
                    arguments,
                });
            }
            AnthropicContentBlock::ToolResult { .. } | AnthropicContentBlock::Unsupported => {}
        }
    }

    let reasoning = (!reasoning.is_empty()).then_some(reasoning);
    if calls.is_empty() {
        Decoded::FinalText { text, reasoning }
    } else {
        Decoded::ToolInvocation(ToolInvocation {
            calls,
            continuation: Continuation {
                text: non_empty(Some(text)),
                reasoning,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Map, json};
    use tracing_test::traced_test;

    use super::*;
    use crate::llm::ModelToolDefinition;
    use crate::transport::HttpMethod;

    fn tool_definition() -> ModelToolDefinition {
        ModelToolDefinition {
            name: "get_weather".to_string(),
            description: "Current weather for a location".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {"location": {"type": "string"}},
                "required": ["location"]
            }),
        }
    }

    fn location(city: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("location".to_string(), Value::String(city.to_string()));
        map
    }

    fn encode(
        config: AnthropicModelConfig,
        messages: &[ModelMessage],
        tools: &[ModelToolDefinition],
        choice: ModelToolChoice,
    ) -> HttpRequest {
        AnthropicModel::new(config)
            .encode(&ConversationRequest {
                messages,
                tools,
                tool_choice: &choice,
                suppress_thinking: false,
            })
            .expect("encodes")
    }

    #[test]
    fn config_defaults() {
        let config = AnthropicModelConfig::new("key", "claude-sonnet-4-5");
        assert_eq!(config.api_version, "2023-06-01");
        assert_eq!(config.max_tokens, 1024);
        assert!(config.stream);
    }

    #[test]
    fn encode_sets_headers_system_and_forced_tool() {
        let messages = vec![
            ModelMessage::System("Answer briefly".to_string()),
            ModelMessage::User("What's the weather in Denver?".to_string()),
        ];

        let request = encode(
            AnthropicModelConfig::new("sk-ant", "claude-sonnet-4-5"),
            &messages,
            &[tool_definition()],
            ModelToolChoice::Tool("get_weather".to_string()),
        );

        assert_eq!(request.url, "https://api.anthropic.com/v1/messages");
        assert_eq!(request.header_value("x-api-key"), Some("sk-ant"));
        assert_eq!(request.header_value("anthropic-version"), Some("2023-06-01"));

        let body = request.body;
        assert_eq!(body["system"], "Answer briefly");
        assert_eq!(body["messages"].as_array().map(Vec::len), Some(1));
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"][0]["type"], "text");
        assert_eq!(body["tools"][0]["input_schema"]["required"][0], "location");
        assert_eq!(body["tool_choice"], json!({"type": "tool", "name": "get_weather"}));
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 1024);
    }

    #[test]
    fn assistant_blocks_keep_thinking_text_and_tool_order() {
        let messages = vec![
            ModelMessage::User("Weather in Denver and Boise?".to_string()),
            ModelMessage::Assistant {
                content: Some("Checking both.".to_string()),
                reasoning: Some(Reasoning {
                    blocks: vec![ReasoningBlock::Thinking {
                        text: "Two lookups.".to_string(),
                        signature: Some("sig==".to_string()),
                    }],
                }),
                tool_calls: vec![
                    ModelToolCall {
                        id: "toolu_1".to_string(),
                        name: "get_weather".to_string(),
                        arguments: location("Denver"),
                    },
                    ModelToolCall {
                        id: "toolu_2".to_string(),
                        name: "get_weather".to_string(),
                        arguments: location("Boise"),
                    },
                ],
            },
            ModelMessage::ToolResult {
                tool_call_id: "toolu_1".to_string(),
                tool_name: "get_weather".to_string(),
                content: "72F".to_string(),
                is_error: false,
            },
            ModelMessage::ToolResult {
                tool_call_id: "toolu_2".to_string(),
                tool_name: "get_weather".to_string(),
                content: "unknown city".to_string(),
                is_error: true,
            },
        ];

        let body = encode(
            AnthropicModelConfig::new("key", "claude-sonnet-4-5"),
            &messages,
            &[tool_definition()],
            ModelToolChoice::Auto,
        )
        .body;

        let assistant = &body["messages"][1]["content"];
        assert_eq!(assistant[0]["type"], "thinking");
        assert_eq!(assistant[0]["signature"], "sig==");
        assert_eq!(assistant[1]["type"], "text");
        assert_eq!(assistant[2]["type"], "tool_use");
        assert_eq!(assistant[2]["input"]["location"], "Denver");
        assert_eq!(assistant[3]["id"], "toolu_2");

        assert_eq!(body["messages"].as_array().map(Vec::len), Some(3));
        let results = &body["messages"][2];
        assert_eq!(results["role"], "user");
        assert_eq!(results["content"][0]["tool_use_id"], "toolu_1");
        assert!(results["content"][0].get("is_error").is_none());
        assert_eq!(results["content"][1]["is_error"], true);
        assert_eq!(body["tool_choice"]["type"], "auto");
    }

    #[test]
    #[traced_test]
    fn thinking_is_dropped_when_a_tool_is_forced() {
        let mut config = AnthropicModelConfig::new("key", "claude-sonnet-4-5");
        config.thinking_budget_tokens = Some(2048);

        let forced = encode(
            config.clone(),
            &[ModelMessage::User("hi".to_string())],
            &[tool_definition()],
            ModelToolChoice::Tool("get_weather".to_string()),
        );
        assert!(forced.body.get("thinking").is_none());
        assert!(logs_contain("omitting thinking"));

        let free = encode(
            config,
            &[ModelMessage::User("hi".to_string())],
            &[tool_definition()],
            ModelToolChoice::Auto,
        );
        assert_eq!(free.body["thinking"], json!({"type": "enabled", "budget_tokens": 2048}));
    }

    #[test]
    fn thinking_stays_off_for_the_rest_of_a_forced_turn() {
        let mut config = AnthropicModelConfig::new("key", "claude-sonnet-4-5");
        config.thinking_budget_tokens = Some(2048);
        let messages = [ModelMessage::User("hi".to_string())];
        let tools = [tool_definition()];

        let follow_up = AnthropicModel::new(config)
            .encode(&ConversationRequest {
                messages: &messages,
                tools: &tools,
                tool_choice: &ModelToolChoice::Auto,
                suppress_thinking: true,
            })
            .expect("encodes");

        assert!(follow_up.body.get("thinking").is_none());
        assert_eq!(follow_up.body["tool_choice"]["type"], "auto");
    }

    #[test]
    fn empty_replayed_response_is_left_out() {
        let messages = vec![
            ModelMessage::User("Hi".to_string()),
            ModelMessage::Assistant {
                content: Some(String::new()),
                reasoning: None,
                tool_calls: Vec::new(),
            },
            ModelMessage::User("Again".to_string()),
        ];

        let body = encode(
            AnthropicModelConfig::new("key", "claude-sonnet-4-5"),
            &messages,
            &[],
            ModelToolChoice::None,
        )
        .body;

        assert_eq!(
            body["messages"],
            json!([{
                "role": "user",
                "content": [
                    {"type": "text", "text": "Hi"},
                    {"type": "text", "text": "Again"}
                ]
            }])
        );
    }

    #[test]
    fn redacted_thinking_is_replayed_verbatim() {
        let messages = vec![
            ModelMessage::User("Weather?".to_string()),
            ModelMessage::Assistant {
                content: None,
                reasoning: Some(Reasoning {
                    blocks: vec![
                        ReasoningBlock::Thinking {
                            text: "First.".to_string(),
                            signature: Some("sig-a".to_string()),
                        },
                        ReasoningBlock::Redacted {
                            data: "EmwKAhgBEgy3va3p".to_string(),
                        },
                    ],
                }),
                tool_calls: vec![ModelToolCall {
                    id: "toolu_1".to_string(),
                    name: "get_weather".to_string(),
                    arguments: location("Denver"),
                }],
            },
        ];

        let body = encode(
            AnthropicModelConfig::new("key", "claude-sonnet-4-5"),
            &messages,
            &[tool_definition()],
            ModelToolChoice::Auto,
        )
        .body;

        let assistant = &body["messages"][1]["content"];
        assert_eq!(assistant[0], json!({"type": "thinking", "thinking": "First.", "signature": "sig-a"}));
        assert_eq!(assistant[1], json!({"type": "redacted_thinking", "data": "EmwKAhgBEgy3va3p"}));
        assert_eq!(assistant[2]["type"], "tool_use");
    }

    #[test]
    fn extra_parameters_are_merged_into_the_body() {
        let config = AnthropicModelConfig::new("key", "claude-sonnet-4-5")
            .parameter("metadata", json!({"user_id": "u-1"}))
            .parameter("max_tokens", 4096);

        let body = encode(
            config,
            &[ModelMessage::User("hi".to_string())],
            &[],
            ModelToolChoice::None,
        )
        .body;

        assert_eq!(body["metadata"]["user_id"], "u-1");
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["model"], "claude-sonnet-4-5");
    }

    #[test]
    fn connection_check_lists_models() {
        let mut config = AnthropicModelConfig::new("sk-ant", "claude-sonnet-4-5");
        config.api_base_url = Some("http://localhost:8080/".to_string());

        let request = AnthropicModel::new(config)
            .connection_check()
            .expect("has a check");
        assert_eq!(request.method, HttpMethod::Get);
        assert_eq!(request.url, "http://localhost:8080/v1/models");
        assert_eq!(request.header_value("x-api-key"), Some("sk-ant"));
    }

    #[test]
    fn overloaded_counts_as_rate_limited() {
        let model = AnthropicModel::new(AnthropicModelConfig::new("key", "claude-sonnet-4-5"));
        assert_eq!(model.classify_status(529), StatusClass::RateLimited);
        assert_eq!(model.classify_status(429), StatusClass::RateLimited);
        assert_eq!(model.classify_status(401), StatusClass::Unauthorized);
        assert_eq!(model.classify_status(500), StatusClass::Failed);
    }

    #[test]
    fn unary_response_decodes_tool_use() {
        let mut config = AnthropicModelConfig::new("key", "claude-sonnet-4-5");
        config.stream = false;
        let model = AnthropicModel::new(config);

        let body = json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "content": [
                {"type": "thinking", "thinking": "Look it up.", "signature": "abc"},
                {"type": "text", "text": "Let me check."},
                {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"location": "Denver"}}
            ],
            "stop_reason": "tool_use"
        });

        let Decoded::ToolInvocation(invocation) =
            model.decode(body.to_string().as_bytes()).expect("decodes")
        else {
            panic!("expected tool invocation");
        };
        assert_eq!(invocation.calls[0].arguments, location("Denver"));
        assert_eq!(invocation.continuation.text.as_deref(), Some("Let me check."));
        assert_eq!(
            invocation.continuation.reasoning,
            Some(Reasoning {
                blocks: vec![ReasoningBlock::Thinking {
                    text: "Look it up.".to_string(),
                    signature: Some("abc".to_string()),
                }],
            })
        );
    }

    #[test]
    fn unary_response_skips_unknown_blocks_and_keeps_redacted_thinking() {
        let mut config = AnthropicModelConfig::new("key", "claude-sonnet-4-5");
        config.stream = false;
        let model = AnthropicModel::new(config);

        let body = json!({
            "content": [
                {"type": "server_tool_use", "id": "srvtoolu_1", "name": "web_search", "input": {}},
                {"type": "redacted_thinking", "data": "opaque"},
                {"type": "text", "text": "Sunny."}
            ]
        });

        assert_eq!(
            model.decode(body.to_string().as_bytes()).expect("decodes"),
            Decoded::FinalText {
                text: "Sunny.".to_string(),
                reasoning: Some(Reasoning {
                    blocks: vec![ReasoningBlock::Redacted {
                        data: "opaque".to_string(),
                    }],
                }),
            }
        );
    }

    #[test]
    fn streaming_decoder_is_the_default() {
        let model = AnthropicModel::new(AnthropicModelConfig::new("key", "claude-sonnet-4-5"));
        let body = concat!(
            "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{}}\n\n",
            "event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Sunny.\"}}\n\n",
            "event: content_block_stop\ndata: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
            "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
        );

        assert_eq!(
            model.decode(body.as_bytes()).expect("decodes"),
            Decoded::FinalText {
                text: "Sunny.".to_string(),
                reasoning: None,
            }
        );
    }
}
