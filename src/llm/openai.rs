use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProviderError;
use crate::llm::{
    ConversationRequest, Continuation, Decoded, JsonBodyDecoder, ModelMessage, ModelToolCall,
    ModelToolChoice, Reasoning, ResponseDecoder, ToolInvocation, Vendor, merge_extra_body,
    non_empty, parse_arguments,
};
use crate::transport::HttpRequest;

const DEFAULT_API_BASE_URL: &str = "https://api.openai.com/v1";
const LM_STUDIO_API_KEY: &str = "lm-studio";
const EMPTY_USER_CONTENT_FALLBACK: &str = " ";

#[derive(Debug, Clone)]
pub struct OpenAiModelConfig {
    pub api_key: String,
    pub model: String,
    pub api_base_url: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Whether the server honors a `tool_choice` naming one function.
    pub supports_forced_tool: bool,
    /// Extra top-level request fields, applied last. Reasoning models take
    /// `max_completion_tokens` here. A `null` value removes the field.
    pub extra_body: Map<String, Value>,
}

impl OpenAiModelConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            api_base_url: None,
            temperature: None,
            top_p: None,
            max_tokens: None,
            supports_forced_tool: true,
            extra_body: Map::new(),
        }
    }

    pub fn parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra_body.insert(name.into(), value.into());
        self
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self, ProviderError> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            ProviderError::Authentication("OPENAI_API_KEY is not set".to_string())
        })?;
        Ok(Self::new(api_key, model))
    }
}

/// OpenAI chat-completions codec. Also speaks to compatible local servers.
#[derive(Debug, Clone)]
pub struct OpenAiModel {
    name: &'static str,
    config: OpenAiModelConfig,
}

impl OpenAiModel {
    pub fn new(config: OpenAiModelConfig) -> Self {
        Self {
            name: "openai",
            config,
        }
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self, ProviderError> {
        Ok(Self::new(OpenAiModelConfig::from_env(model)?))
    }

    /// An LM Studio server at `endpoint` (for example `http://localhost:1234/v1`).
    /// LM Studio does not accept forced tool choices.
    pub fn lm_studio(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        let mut config = OpenAiModelConfig::new(LM_STUDIO_API_KEY, model);
        config.api_base_url = Some(endpoint.into());
        config.supports_forced_tool = false;
        Self {
            name: "lm-studio",
            config,
        }
    }

    pub fn config(&self) -> &OpenAiModelConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        let base = self
            .config
            .api_base_url
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE_URL)
            .trim_end_matches('/');
        format!("{base}/{path}")
    }
}

impl Vendor for OpenAiModel {
    fn name(&self) -> &'static str {
        self.name
    }

    fn encode(&self, request: &ConversationRequest<'_>) -> Result<HttpRequest, ProviderError> {
        let mut body = serde_json::to_value(build_request(request, &self.config))
            .map_err(|err| ProviderError::Encode(err.to_string()))?;
        merge_extra_body(&mut body, &self.config.extra_body);

        Ok(HttpRequest::post(self.url("chat/completions"), body)
            .header("authorization", format!("Bearer {}", self.config.api_key))
            .header("content-type", "application/json"))
    }

    fn decoder(&self) -> Box<dyn ResponseDecoder> {
        Box::new(JsonBodyDecoder::new(parse_response))
    }

    fn supports_forced_tool(&self) -> bool {
        self.config.supports_forced_tool
    }

    fn connection_check(&self) -> Option<HttpRequest> {
        Some(
            HttpRequest::get(self.url("models"))
                .header("authorization", format!("Bearer {}", self.config.api_key)),
        )
    }
}

#[derive(Debug, Serialize)]
struct OpenAiChatCompletionRequest {
    model: String,
    messages: Vec<OpenAiRequestMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<OpenAiToolChoicePayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
enum OpenAiRequestMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<OpenAiToolCall>>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize)]
struct OpenAiToolDefinition {
    #[serde(rename = "type")]
    type_: String,
    function: OpenAiToolFunctionDefinition,
}

#[derive(Debug, Serialize)]
struct OpenAiToolFunctionDefinition {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum OpenAiToolChoicePayload {
    Mode(String),
    Specific {
        #[serde(rename = "type")]
        type_: String,
        function: OpenAiToolChoiceFunction,
    },
}

#[derive(Debug, Serialize)]
struct OpenAiToolChoiceFunction {
    name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct OpenAiToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    type_: String,
    function: OpenAiToolCallFunction,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct OpenAiToolCallFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Deserialize)]
struct OpenAiChatCompletionResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: Option<OpenAiAssistantMessage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiAssistantMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OpenAiToolCall>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

fn build_request(
    request: &ConversationRequest<'_>,
    config: &OpenAiModelConfig,
) -> OpenAiChatCompletionRequest {
    let messages = ensure_non_empty_messages(to_openai_messages(request.messages));

    let tools = if request.tools.is_empty() {
        None
    } else {
        Some(
            request
                .tools
                .iter()
                .map(|tool| OpenAiToolDefinition {
                    type_: "function".to_string(),
                    function: OpenAiToolFunctionDefinition {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        parameters: tool.parameters.clone(),
                    },
                })
                .collect::<Vec<_>>(),
        )
    };

    let tool_choice = if request.tools.is_empty() {
        None
    } else {
        Some(match request.tool_choice {
            ModelToolChoice::Auto => OpenAiToolChoicePayload::Mode("auto".to_string()),
            ModelToolChoice::None => OpenAiToolChoicePayload::Mode("none".to_string()),
            ModelToolChoice::Tool(name) => OpenAiToolChoicePayload::Specific {
                type_: "function".to_string(),
                function: OpenAiToolChoiceFunction { name: name.clone() },
            },
        })
    };

    OpenAiChatCompletionRequest {
        model: config.model.clone(),
        messages,
        tools,
        tool_choice,
        temperature: config.temperature,
        top_p: config.top_p,
        max_tokens: config.max_tokens,
    }
}

fn to_openai_messages(messages: &[ModelMessage]) -> Vec<OpenAiRequestMessage> {
    let mut request_messages = Vec::new();

    for message in messages {
        match message {
            ModelMessage::System(content) => {
                if content.is_empty() {
                    continue;
                }
                request_messages.push(OpenAiRequestMessage::System {
                    content: content.clone(),
                });
            }
            ModelMessage::User(content) => {
                request_messages.push(OpenAiRequestMessage::User {
                    content: content.clone(),
                });
            }
            // reasoning_content is output-only on this API
            ModelMessage::Assistant {
                content,
                reasoning: _,
                tool_calls,
            } => {
                let tool_calls = tool_calls
                    .iter()
                    .map(|call| OpenAiToolCall {
                        id: call.id.clone(),
                        type_: function_type(),
                        function: OpenAiToolCallFunction {
                            name: call.name.clone(),
                            arguments: Value::Object(call.arguments.clone()).to_string(),
                        },
                    })
                    .collect::<Vec<_>>();

                request_messages.push(OpenAiRequestMessage::Assistant {
                    content: content.clone(),
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                });
            }
            ModelMessage::ToolResult {
                tool_call_id,
                tool_name: _,
                content,
                is_error,
            } => {
                let rendered = if *is_error {
                    format!("Error: {content}")
                } else {
                    content.clone()
                };

                request_messages.push(OpenAiRequestMessage::Tool {
                    tool_call_id: tool_call_id.clone(),
                    content: rendered,
                });
            }
        }
    }

    request_messages
}

fn ensure_non_empty_messages(mut messages: Vec<OpenAiRequestMessage>) -> Vec<OpenAiRequestMessage> {
    if messages.is_empty() {
        messages.push(OpenAiRequestMessage::User {
            content: EMPTY_USER_CONTENT_FALLBACK.to_string(),
        });
    }

    messages
}

fn parse_response(body: &[u8]) -> Result<Decoded, ProviderError> {
    let response = serde_json::from_slice::<OpenAiChatCompletionResponse>(body)
        .map_err(|err| ProviderError::MalformedResponse(format!("openai response: {err}")))?;
    normalize_response(response)
}

fn normalize_response(response: OpenAiChatCompletionResponse) -> Result<Decoded, ProviderError> {
    let choice = response.choices.into_iter().next().ok_or_else(|| {
        ProviderError::MalformedResponse("openai response missing choices".to_string())
    })?;

    let message = choice.message.ok_or_else(|| {
        ProviderError::MalformedResponse("openai response missing choice message".to_string())
    })?;

    let reasoning = non_empty(message.reasoning_content).map(Reasoning::from_text);

    if message.tool_calls.is_empty() {
        return Ok(Decoded::FinalText {
            text: message.content.unwrap_or_default(),
            reasoning,
        });
    }

    let mut calls = Vec::with_capacity(message.tool_calls.len());
    for tool_call in message.tool_calls {
        let arguments = parse_arguments(&tool_call.function.name, &tool_call.function.arguments)?;
        calls.push(ModelToolCall {
            id: tool_call.id,
            name: tool_call.function.name,
            arguments,
        });
    }

    Ok(Decoded::ToolInvocation(ToolInvocation {
        calls,
        continuation: Continuation {
            text: non_empty(message.content),
            reasoning,
        },
    }))
}

#[cfg(test)]
mod tests {
    use serde_json::{Map, json};

    use super::*;
    use crate::llm::ModelToolDefinition;
    use crate::transport::HttpMethod;

    fn tool_definition() -> ModelToolDefinition {
        ModelToolDefinition {
            name: "get_weather".to_string(),
            description: "Current weather for a location".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "location": {"type": "string", "description": "City and state"}
                },
                "required": ["location"]
            }),
        }
    }

    fn arguments(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn encode(
        model: &OpenAiModel,
        messages: &[ModelMessage],
        tools: &[ModelToolDefinition],
        choice: ModelToolChoice,
    ) -> HttpRequest {
        model
            .encode(&ConversationRequest {
                messages,
                tools,
                tool_choice: &choice,
                suppress_thinking: false,
            })
            .expect("encodes")
    }

    #[test]
    fn encode_serializes_history_tools_and_forced_choice() {
        let messages = vec![
            ModelMessage::System("You are terse".to_string()),
            ModelMessage::User("What's the weather in Denver?".to_string()),
            ModelMessage::Assistant {
                content: Some("Checking".to_string()),
                reasoning: None,
                tool_calls: vec![ModelToolCall {
                    id: "call_1".to_string(),
                    name: "get_weather".to_string(),
                    arguments: arguments(json!({"location": "Denver, CO"})),
                }],
            },
            ModelMessage::ToolResult {
                tool_call_id: "call_1".to_string(),
                tool_name: "get_weather".to_string(),
                content: "72F and sunny".to_string(),
                is_error: false,
            },
        ];

        let mut config = OpenAiModelConfig::new("sk-test", "gpt-4o-mini");
        config.temperature = Some(0.2);
        config.max_tokens = Some(512);
        let model = OpenAiModel::new(config);

        let request = encode(
            &model,
            &messages,
            &[tool_definition()],
            ModelToolChoice::Tool("get_weather".to_string()),
        );
        let value = request.body;

        assert_eq!(request.url, "https://api.openai.com/v1/chat/completions");
        assert_eq!(
            request.headers.iter().find(|(name, _)| name == "authorization").map(|(_, v)| v.as_str()),
            Some("Bearer sk-test")
        );
        assert_eq!(value["model"], "gpt-4o-mini");
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["role"], "user");
        assert_eq!(value["messages"][2]["role"], "assistant");
        assert_eq!(
            value["messages"][2]["tool_calls"][0]["function"]["arguments"],
            "{\"location\":\"Denver, CO\"}"
        );
        assert_eq!(value["messages"][3]["role"], "tool");
        assert_eq!(value["messages"][3]["tool_call_id"], "call_1");
        assert_eq!(value["tools"][0]["type"], "function");
        assert_eq!(value["tools"][0]["function"]["name"], "get_weather");
        assert_eq!(value["tool_choice"]["type"], "function");
        assert_eq!(value["tool_choice"]["function"]["name"], "get_weather");
        assert_eq!(value["max_tokens"], 512);
    }

    #[test]
    fn encode_omits_tools_when_none_are_active() {
        let model = OpenAiModel::new(OpenAiModelConfig::new("key", "gpt-4o-mini"));
        let request = encode(&model, &[], &[], ModelToolChoice::None);

        assert_eq!(request.body["messages"][0]["content"], " ");
        assert!(request.body.get("tools").is_none());
        assert!(request.body.get("tool_choice").is_none());
    }

    #[test]
    fn auto_choice_and_error_results_render() {
        let model = OpenAiModel::new(OpenAiModelConfig::new("key", "gpt-4o-mini"));
        let messages = vec![ModelMessage::ToolResult {
            tool_call_id: "call_9".to_string(),
            tool_name: "get_weather".to_string(),
            content: "missing required argument".to_string(),
            is_error: true,
        }];

        let request = encode(&model, &messages, &[tool_definition()], ModelToolChoice::Auto);
        assert_eq!(request.body["tool_choice"], "auto");
        assert_eq!(request.body["messages"][0]["content"], "Error: missing required argument");
    }

    #[test]
    fn lm_studio_points_at_local_endpoint_without_forcing() {
        let model = OpenAiModel::lm_studio("http://localhost:1234/v1/", "qwen2.5-7b-instruct");
        assert_eq!(model.name(), "lm-studio");
        assert!(!model.supports_forced_tool());

        let request = encode(&model, &[ModelMessage::User("hi".to_string())], &[], ModelToolChoice::Auto);
        assert_eq!(request.url, "http://localhost:1234/v1/chat/completions");
    }

    #[test]
    fn reasoning_model_takes_max_completion_tokens() {
        let model = OpenAiModel::new(
            OpenAiModelConfig::new("key", "o1-preview").parameter("max_completion_tokens", 1024),
        );

        let request = encode(&model, &[ModelMessage::User("hi".to_string())], &[], ModelToolChoice::None);
        assert_eq!(request.body["max_completion_tokens"], 1024);
        assert!(request.body.get("max_tokens").is_none());
        assert_eq!(request.body["model"], "o1-preview");
    }

    #[test]
    fn connection_check_lists_models_on_lm_studio() {
        let model = OpenAiModel::lm_studio("http://localhost:1234/v1/", "qwen2.5-7b-instruct");
        let request = model.connection_check().expect("has a check");

        assert_eq!(request.method, HttpMethod::Get);
        assert_eq!(request.url, "http://localhost:1234/v1/models");
        assert_eq!(request.header_value("authorization"), Some("Bearer lm-studio"));
    }

    #[test]
    fn decode_final_text_with_reasoning() {
        let model = OpenAiModel::new(OpenAiModelConfig::new("key", "gpt-4o-mini"));
        let body = json!({
            "choices": [{
                "message": {"role": "assistant", "content": "It is 72F.", "reasoning_content": "Used the tool."}
            }]
        });

        let decoded = model.decode(body.to_string().as_bytes()).expect("decodes");
        assert_eq!(
            decoded,
            Decoded::FinalText {
                text: "It is 72F.".to_string(),
                reasoning: Some(Reasoning::from_text("Used the tool.")),
            }
        );
    }

    #[test]
    fn decode_tool_calls() {
        let model = OpenAiModel::new(OpenAiModelConfig::new("key", "gpt-4o-mini"));
        let body = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {"name": "get_weather", "arguments": "{\"location\":\"Denver, CO\"}"}
                    }]
                }
            }]
        });

        let Decoded::ToolInvocation(invocation) =
            model.decode(body.to_string().as_bytes()).expect("decodes")
        else {
            panic!("expected tool invocation");
        };
        assert_eq!(invocation.calls[0].id, "call_abc");
        assert_eq!(invocation.calls[0].arguments["location"], "Denver, CO");
        assert_eq!(invocation.continuation, Continuation::default());
    }

    #[test]
    fn decode_requires_choices() {
        let model = OpenAiModel::new(OpenAiModelConfig::new("key", "gpt-4o-mini"));
        let err = model.decode(br#"{"choices": []}"#).expect_err("should fail");

        match err {
            ProviderError::MalformedResponse(message) => assert!(message.contains("missing choices")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn decode_fails_on_invalid_arguments() {
        let model = OpenAiModel::new(OpenAiModelConfig::new("key", "gpt-4o-mini"));
        let body = json!({
            "choices": [{"message": {"tool_calls": [{
                "id": "call_x",
                "type": "function",
                "function": {"name": "get_weather", "arguments": "{not json}"}
            }]}}]
        });

        let err = model.decode(body.to_string().as_bytes()).expect_err("should fail");
        match err {
            ProviderError::MalformedResponse(message) => assert!(message.contains("not valid JSON")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn decode_rejects_non_json_body() {
        let model = OpenAiModel::new(OpenAiModelConfig::new("key", "gpt-4o-mini"));
        assert!(matches!(
            model.decode(b"<html>bad gateway</html>"),
            Err(ProviderError::MalformedResponse(_))
        ));
    }
}
