//! Tool-calling conversation engine for LLM providers.
//!
//! - `Engine` turn loop with forced tools, rate-limit retry and a dispatch cap
//! - `send`, `send_message` and `turn_stream` entry points, plus `BlockingEngine`
//! - Tool registry with typed parameter decoding
//! - OpenAI (and LM Studio) and Anthropic codecs; SSE stream parsing

pub mod blocking;
pub mod chat;
pub mod document;
pub mod engine;
pub mod error;
pub mod llm;
pub mod tools;
pub mod transport;

pub use blocking::BlockingEngine;
pub use chat::{Chat, Message};
pub use document::{Document, TextDocument};
pub use engine::{Engine, EngineBuilder, EngineConfig, PromptPosition, TurnEvent};
pub use error::{DocumentError, EngineError, ProviderError, ToolError, TransportError};
pub use llm::{
    AnthropicModel, AnthropicModelConfig, Decoded, ModelMessage, ModelToolCall, ModelToolChoice,
    ModelToolDefinition, OpenAiModel, OpenAiModelConfig, Reasoning, ReasoningBlock, Vendor,
};
pub use tools::{
    ArgumentValue, Arguments, CollisionPolicy, ForceGuard, Function, Parameter, ParameterKind,
    Tool, ToolRegistry, ToolScope,
};
pub use transport::{
    HttpMethod, HttpRequest, HttpTransport, RetryDecision, RetryHandler, RetryOnce, Transport,
};
