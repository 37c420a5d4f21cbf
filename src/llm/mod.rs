mod anthropic;
mod openai;
pub mod stream;

use serde_json::{Map, Value};

use crate::error::ProviderError;
use crate::transport::HttpRequest;

pub use anthropic::{AnthropicModel, AnthropicModelConfig};
pub use openai::{OpenAiModel, OpenAiModelConfig};

/// Vendor-neutral request revision built by the engine for each send.
#[derive(Clone, Debug, PartialEq)]
pub enum ModelMessage {
    System(String),
    User(String),
    Assistant {
        content: Option<String>,
        reasoning: Option<Reasoning>,
        tool_calls: Vec<ModelToolCall>,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        content: String,
        is_error: bool,
    },
}

/// One extended-thinking block. Signatures and redacted data are opaque and
/// must be replayed verbatim when the conversation continues.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReasoningBlock {
    Thinking {
        text: String,
        signature: Option<String>,
    },
    Redacted {
        data: String,
    },
}

/// Extended-thinking output, block by block in the order the provider sent it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Reasoning {
    pub blocks: Vec<ReasoningBlock>,
}

impl Reasoning {
    /// A single unsigned thinking block.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            blocks: vec![ReasoningBlock::Thinking {
                text: text.into(),
                signature: None,
            }],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Readable thinking text. Redacted blocks contribute nothing.
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|block| match block {
                ReasoningBlock::Thinking { text, .. } if !text.is_empty() => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModelToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModelToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelToolChoice {
    Auto,
    None,
    Tool(String),
}

#[derive(Clone, Copy, Debug)]
pub struct ConversationRequest<'a> {
    pub messages: &'a [ModelMessage],
    pub tools: &'a [ModelToolDefinition],
    pub tool_choice: &'a ModelToolChoice,
    /// Set for every request of a turn whose first request forced a tool, so
    /// a vendor keeps one thinking mode for the whole turn.
    pub suppress_thinking: bool,
}

/// Normalized result of one provider response.
#[derive(Clone, Debug, PartialEq)]
pub enum Decoded {
    FinalText {
        text: String,
        reasoning: Option<Reasoning>,
    },
    ToolInvocation(ToolInvocation),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolInvocation {
    pub calls: Vec<ModelToolCall>,
    pub continuation: Continuation,
}

/// Assistant output preceding a tool call, replayed on the next request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Continuation {
    pub text: Option<String>,
    pub reasoning: Option<Reasoning>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    Unauthorized,
    RateLimited,
    Failed,
}

impl StatusClass {
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 => Self::Success,
            401 => Self::Unauthorized,
            429 => Self::RateLimited,
            _ => Self::Failed,
        }
    }
}

/// Incremental response decoder. Fed raw body chunks in arrival order.
pub trait ResponseDecoder: Send {
    /// Returns `Some` once the response is decided; remaining chunks are not needed.
    fn feed(&mut self, chunk: &[u8]) -> Result<Option<Decoded>, ProviderError>;

    /// Called when the body ends without `feed` having produced a result.
    fn finish(&mut self) -> Result<Decoded, ProviderError>;

    /// Text accumulated so far, used when the exchange times out.
    fn partial_text(&self) -> String;
}

/// Per-vendor request/response codec.
pub trait Vendor: Send + Sync {
    fn name(&self) -> &'static str;

    fn encode(&self, request: &ConversationRequest<'_>) -> Result<HttpRequest, ProviderError>;

    fn decoder(&self) -> Box<dyn ResponseDecoder>;

    fn decode(&self, body: &[u8]) -> Result<Decoded, ProviderError> {
        let mut decoder = self.decoder();
        match decoder.feed(body)? {
            Some(decoded) => Ok(decoded),
            None => decoder.finish(),
        }
    }

    fn classify_status(&self, status: u16) -> StatusClass {
        StatusClass::from_status(status)
    }

    fn supports_forced_tool(&self) -> bool {
        true
    }

    /// A cheap request answering whether the endpoint is reachable with the
    /// configured credentials. `None` when the vendor has no such check.
    fn connection_check(&self) -> Option<HttpRequest> {
        None
    }
}

/// Buffers a unary JSON body and parses it once complete.
pub(crate) struct JsonBodyDecoder {
    buffer: Vec<u8>,
    parse: fn(&[u8]) -> Result<Decoded, ProviderError>,
}

impl JsonBodyDecoder {
    pub(crate) fn new(parse: fn(&[u8]) -> Result<Decoded, ProviderError>) -> Self {
        Self {
            buffer: Vec::new(),
            parse,
        }
    }
}

impl ResponseDecoder for JsonBodyDecoder {
    fn feed(&mut self, chunk: &[u8]) -> Result<Option<Decoded>, ProviderError> {
        self.buffer.extend_from_slice(chunk);
        Ok(None)
    }

    fn finish(&mut self) -> Result<Decoded, ProviderError> {
        (self.parse)(&self.buffer)
    }

    fn partial_text(&self) -> String {
        String::new()
    }
}

/// Applies caller-supplied body fields on top of an encoded request body.
/// A `null` value removes the field.
pub(crate) fn merge_extra_body(body: &mut Value, extra: &Map<String, Value>) {
    let Value::Object(fields) = body else {
        return;
    };
    for (name, value) in extra {
        if value.is_null() {
            fields.remove(name);
        } else {
            fields.insert(name.clone(), value.clone());
        }
    }
}

pub(crate) fn non_empty(text: Option<String>) -> Option<String> {
    text.filter(|text| !text.is_empty())
}

pub(crate) fn parse_arguments(tool: &str, raw: &str) -> Result<Map<String, Value>, ProviderError> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }

    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(arguments)) => Ok(arguments),
        Ok(other) => Err(ProviderError::MalformedResponse(format!(
            "tool call arguments for '{tool}' must be a JSON object, got {other}"
        ))),
        Err(err) => Err(ProviderError::MalformedResponse(format!(
            "tool call arguments for '{tool}' are not valid JSON: {err}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classes() {
        assert_eq!(StatusClass::from_status(200), StatusClass::Success);
        assert_eq!(StatusClass::from_status(204), StatusClass::Success);
        assert_eq!(StatusClass::from_status(401), StatusClass::Unauthorized);
        assert_eq!(StatusClass::from_status(429), StatusClass::RateLimited);
        assert_eq!(StatusClass::from_status(500), StatusClass::Failed);
    }

    #[test]
    fn extra_body_overrides_and_removes_fields() {
        let mut body = serde_json::json!({"model": "m", "max_tokens": 10, "stream": true});
        let mut extra = Map::new();
        extra.insert("max_completion_tokens".to_string(), Value::from(1024));
        extra.insert("max_tokens".to_string(), Value::Null);
        extra.insert("stream".to_string(), Value::Bool(false));

        merge_extra_body(&mut body, &extra);

        assert_eq!(
            body,
            serde_json::json!({"model": "m", "max_completion_tokens": 1024, "stream": false})
        );
    }

    #[test]
    fn reasoning_text_skips_redacted_blocks() {
        let reasoning = Reasoning {
            blocks: vec![
                ReasoningBlock::Thinking {
                    text: "First.".to_string(),
                    signature: Some("a".to_string()),
                },
                ReasoningBlock::Redacted {
                    data: "opaque".to_string(),
                },
                ReasoningBlock::Thinking {
                    text: "Second.".to_string(),
                    signature: Some("b".to_string()),
                },
            ],
        };
        assert_eq!(reasoning.text(), "First.\n\nSecond.");
        assert_eq!(Reasoning::from_text("x").text(), "x");
        assert!(Reasoning::default().is_empty());
    }

    #[test]
    fn arguments_must_be_objects() {
        assert!(parse_arguments("t", "").expect("empty is ok").is_empty());
        assert!(parse_arguments("t", "[1,2]").is_err());
        assert!(parse_arguments("t", "{nope").is_err());
        assert_eq!(
            parse_arguments("t", r#"{"location":"Denver"}"#).expect("object")["location"],
            "Denver"
        );
    }
}
