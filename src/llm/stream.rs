//! Server-sent event decoding for streamed Messages responses.
//!
//! Two layers: [`SseFramer`] turns raw body chunks into `event`/`data`
//! frames, and [`EventStreamParser`] folds those frames into content blocks.
//! The parser stops at the first completed tool block; anything after it
//! belongs to a response the engine no longer needs.

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::llm::{
    Continuation, Decoded, ModelToolCall, Reasoning, ReasoningBlock, ResponseDecoder,
    ToolInvocation, non_empty, parse_arguments,
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Splits a byte stream into SSE frames. Partial lines are buffered across
/// chunks, so a frame may arrive split at any byte.
#[derive(Debug, Default)]
pub struct SseFramer {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line = self.buffer.drain(..=newline).collect::<Vec<u8>>();
            let line = String::from_utf8_lossy(&line[..newline]);
            if let Some(frame) = self.process_line(line.trim_end_matches('\r')) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Emits whatever is pending once the body has ended.
    pub fn flush(&mut self) -> Option<SseFrame> {
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&line).into_owned();
            if let Some(frame) = self.process_line(line.trim_end_matches('\r')) {
                return Some(frame);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        if self.event.is_none() && self.data.is_empty() {
            return None;
        }
        Some(SseFrame {
            event: self.event.take(),
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}

#[derive(Debug)]
enum OpenBlock {
    Text,
    Reasoning,
    Redacted,
    Tool { id: String, name: String, json: String },
}

#[derive(Debug)]
enum ParserState {
    Idle,
    MessageStarted,
    BlockOpen { index: u64, block: OpenBlock },
    MessageFinished,
}

/// Folds Messages stream events into a [`Decoded`] response.
#[derive(Debug)]
pub struct EventStreamParser {
    state: ParserState,
    text: String,
    reasoning: Reasoning,
}

impl Default for EventStreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStreamParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::Idle,
            text: String::new(),
            reasoning: Reasoning::default(),
        }
    }

    pub fn partial_text(&self) -> &str {
        &self.text
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, ParserState::MessageFinished)
    }

    /// Applies one frame. Returns `Some` when the response is decided.
    pub fn handle(&mut self, frame: &SseFrame) -> Result<Option<Decoded>, ProviderError> {
        if self.is_finished() || frame.data.is_empty() || frame.data == "[DONE]" {
            return Ok(None);
        }

        let json = match serde_json::from_str::<Value>(&frame.data) {
            Ok(json) => json,
            Err(err) => {
                warn!(event = ?frame.event, error = %err, "skipping stream event with malformed data");
                return Ok(None);
            }
        };

        let kind = json
            .get("type")
            .and_then(Value::as_str)
            .or(frame.event.as_deref())
            .unwrap_or_default()
            .to_string();

        match kind.as_str() {
            "message_start" => {
                self.state = ParserState::MessageStarted;
                Ok(None)
            }
            "content_block_start" => {
                self.block_start(&json);
                Ok(None)
            }
            "content_block_delta" => {
                self.block_delta(&json);
                Ok(None)
            }
            "content_block_stop" => self.block_stop(),
            "message_stop" => {
                self.state = ParserState::MessageFinished;
                Ok(Some(Decoded::FinalText {
                    text: self.text.clone(),
                    reasoning: self.reasoning(),
                }))
            }
            "error" => {
                let message = json
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown streaming error");
                Err(ProviderError::Stream(message.to_string()))
            }
            "message_delta" | "ping" => Ok(None),
            other => {
                debug!(event = other, "ignoring unrecognized stream event");
                Ok(None)
            }
        }
    }

    /// Called when the body ends before `message_stop`.
    pub fn finish(&mut self) -> Result<Decoded, ProviderError> {
        if let ParserState::BlockOpen {
            block: OpenBlock::Tool { name, .. },
            ..
        } = &self.state
        {
            return Err(ProviderError::MalformedResponse(format!(
                "stream ended inside tool_use block for '{name}'"
            )));
        }

        if !self.is_finished() {
            warn!(
                text_len = self.text.len(),
                "stream ended without message_stop; returning accumulated text"
            );
        }
        Ok(Decoded::FinalText {
            text: self.text.clone(),
            reasoning: self.reasoning(),
        })
    }

    fn reasoning(&self) -> Option<Reasoning> {
        (!self.reasoning.is_empty()).then(|| self.reasoning.clone())
    }

    fn block_start(&mut self, json: &Value) {
        let index = json.get("index").and_then(Value::as_u64).unwrap_or_default();
        let Some(block) = json.get("content_block") else {
            warn!(index, "content_block_start without content_block; skipping");
            return;
        };

        let block = match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    self.text.push_str(text);
                }
                OpenBlock::Text
            }
            Some("thinking") => {
                let text = block.get("thinking").and_then(Value::as_str).unwrap_or_default();
                let signature = block
                    .get("signature")
                    .and_then(Value::as_str)
                    .filter(|signature| !signature.is_empty());
                self.reasoning.blocks.push(ReasoningBlock::Thinking {
                    text: text.to_string(),
                    signature: signature.map(str::to_string),
                });
                OpenBlock::Reasoning
            }
            Some("redacted_thinking") => {
                let Some(data) = block.get("data").and_then(Value::as_str) else {
                    warn!(index, "redacted_thinking block without data; skipping");
                    return;
                };
                self.reasoning.blocks.push(ReasoningBlock::Redacted {
                    data: data.to_string(),
                });
                OpenBlock::Redacted
            }
            Some("tool_use") => {
                let id = block.get("id").and_then(Value::as_str);
                let name = block.get("name").and_then(Value::as_str);
                let (Some(id), Some(name)) = (id, name) else {
                    warn!(index, "tool_use block without id or name; skipping");
                    return;
                };
                OpenBlock::Tool {
                    id: id.to_string(),
                    name: name.to_string(),
                    json: String::new(),
                }
            }
            other => {
                warn!(index, kind = ?other, "skipping content block of unknown kind");
                return;
            }
        };

        if let ParserState::BlockOpen { index: open, .. } = &self.state {
            warn!(open = *open, index, "content block started before previous block stopped");
        }
        self.state = ParserState::BlockOpen { index, block };
    }

    fn block_delta(&mut self, json: &Value) {
        let ParserState::BlockOpen { index, block } = &mut self.state else {
            warn!("content_block_delta without an open block; skipping");
            return;
        };
        let Some(delta) = json.get("delta") else {
            warn!(index = *index, "content_block_delta without delta; skipping");
            return;
        };
        let kind = delta.get("type").and_then(Value::as_str);

        match (kind, block) {
            (Some("text_delta"), OpenBlock::Text) => {
                if let Some(text) = delta.get("text").and_then(Value::as_str) {
                    self.text.push_str(text);
                }
            }
            (Some("thinking_delta"), OpenBlock::Reasoning) => {
                if let (Some(thinking), Some(ReasoningBlock::Thinking { text, .. })) = (
                    delta.get("thinking").and_then(Value::as_str),
                    self.reasoning.blocks.last_mut(),
                ) {
                    text.push_str(thinking);
                }
            }
            (Some("signature_delta"), OpenBlock::Reasoning) => {
                if let (Some(value), Some(ReasoningBlock::Thinking { signature, .. })) = (
                    delta.get("signature").and_then(Value::as_str),
                    self.reasoning.blocks.last_mut(),
                ) {
                    *signature = Some(value.to_string());
                }
            }
            (Some("input_json_delta"), OpenBlock::Tool { json, .. }) => {
                if let Some(fragment) = delta.get("partial_json").and_then(Value::as_str) {
                    json.push_str(fragment);
                }
            }
            (kind, _) => {
                warn!(index = *index, kind = ?kind, "delta does not match open block; skipping");
            }
        }
    }

    fn block_stop(&mut self) -> Result<Option<Decoded>, ProviderError> {
        let state = std::mem::replace(&mut self.state, ParserState::MessageStarted);
        match state {
            ParserState::BlockOpen {
                block: OpenBlock::Tool { id, name, json },
                ..
            } => {
                let arguments = parse_arguments(&name, &json)?;
                self.state = ParserState::MessageFinished;
                Ok(Some(Decoded::ToolInvocation(ToolInvocation {
                    calls: vec![ModelToolCall {
                        id,
                        name,
                        arguments,
                    }],
                    continuation: Continuation {
                        text: non_empty(Some(self.text.clone())),
                        reasoning: self.reasoning(),
                    },
                })))
            }
            ParserState::BlockOpen { .. } => Ok(None),
            other => {
                warn!("content_block_stop without an open block; skipping");
                self.state = other;
                Ok(None)
            }
        }
    }
}

/// [`ResponseDecoder`] over an SSE body.
#[derive(Debug, Default)]
pub struct SseDecoder {
    framer: SseFramer,
    parser: EventStreamParser,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResponseDecoder for SseDecoder {
    fn feed(&mut self, chunk: &[u8]) -> Result<Option<Decoded>, ProviderError> {
        for frame in self.framer.push(chunk) {
            if let Some(decoded) = self.parser.handle(&frame)? {
                return Ok(Some(decoded));
            }
        }
        Ok(None)
    }

    fn finish(&mut self) -> Result<Decoded, ProviderError> {
        if let Some(frame) = self.framer.flush() {
            if let Some(decoded) = self.parser.handle(&frame)? {
                return Ok(decoded);
            }
        }
        self.parser.finish()
    }

    fn partial_text(&self) -> String {
        self.parser.partial_text().to_string()
    }
}
