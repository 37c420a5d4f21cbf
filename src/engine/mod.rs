use std::sync::Arc;
use std::time::Duration;

use async_stream::try_stream;
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tracing::{debug, warn};

use crate::chat::{Chat, Message};
use crate::error::{EngineError, ProviderError, ToolError};
use crate::llm::{
    ConversationRequest, Decoded, ModelMessage, ModelToolChoice, ModelToolDefinition, StatusClass,
    Vendor,
};
use crate::tools::registry::ToolSet;
use crate::tools::{CollisionPolicy, ForceGuard, Function, Tool, ToolRegistry, ToolScope};
use crate::transport::{
    Delivery, HttpTransport, RetryHandler, Transport, TransportClient,
};

/// Where the active tools' injection prompts go relative to the new prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromptPosition {
    #[default]
    Before,
    After,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub read_timeout: Duration,
    pub rate_limit_delay: Duration,
    pub max_rate_limit_retries: u32,
    pub max_tool_iterations: u32,
    pub tool_prompt: Option<PromptPosition>,
    pub collision_policy: CollisionPolicy,
    pub system_prompt: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(30),
            rate_limit_delay: Duration::from_secs(5),
            max_rate_limit_retries: 3,
            max_tool_iterations: 16,
            tool_prompt: Some(PromptPosition::Before),
            collision_policy: CollisionPolicy::Reject,
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    Reasoning {
        content: String,
    },
    Text {
        content: String,
    },
    ToolCall {
        function: String,
        arguments: Value,
        tool_call_id: String,
    },
    ToolResult {
        function: String,
        result_text: String,
        tool_call_id: String,
        is_error: bool,
    },
    /// The read timeout elapsed; `partial` is committed as the response.
    TimedOut {
        partial: String,
    },
    FinalResponse {
        content: String,
    },
}

#[derive(Default)]
pub struct EngineBuilder {
    vendor: Option<Arc<dyn Vendor>>,
    transport: Option<Arc<dyn Transport>>,
    retry: Option<Arc<dyn RetryHandler>>,
    tools: Vec<Arc<Tool>>,
    config: EngineConfig,
}

impl EngineBuilder {
    pub fn vendor<V>(mut self, vendor: V) -> Self
    where
        V: Vendor + 'static,
    {
        self.vendor = Some(Arc::new(vendor));
        self
    }

    pub fn transport<T>(mut self, transport: T) -> Self
    where
        T: Transport + 'static,
    {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn shared_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn retry_handler<R>(mut self, handler: R) -> Self
    where
        R: RetryHandler + 'static,
    {
        self.retry = Some(Arc::new(handler));
        self
    }

    pub fn tool(mut self, tool: impl Into<Arc<Tool>>) -> Self {
        self.tools.push(tool.into());
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn read_timeout(mut self, read_timeout: Duration) -> Self {
        self.config.read_timeout = read_timeout;
        self
    }

    pub fn rate_limit_delay(mut self, rate_limit_delay: Duration) -> Self {
        self.config.rate_limit_delay = rate_limit_delay;
        self
    }

    pub fn max_rate_limit_retries(mut self, max_rate_limit_retries: u32) -> Self {
        self.config.max_rate_limit_retries = max_rate_limit_retries;
        self
    }

    pub fn max_tool_iterations(mut self, max_tool_iterations: u32) -> Self {
        self.config.max_tool_iterations = max_tool_iterations;
        self
    }

    pub fn tool_prompt(mut self, tool_prompt: Option<PromptPosition>) -> Self {
        self.config.tool_prompt = tool_prompt;
        self
    }

    pub fn collision_policy(mut self, collision_policy: CollisionPolicy) -> Self {
        self.config.collision_policy = collision_policy;
        self
    }

    pub fn build(self) -> Result<Engine, EngineError> {
        let Some(vendor) = self.vendor else {
            return Err(EngineError::Config(
                "engine vendor must be configured via EngineBuilder::vendor(...)".to_string(),
            ));
        };

        if self.config.read_timeout.is_zero() {
            return Err(EngineError::Config(
                "read_timeout must be greater than zero".to_string(),
            ));
        }

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new().map_err(ProviderError::from)?),
        };

        let mut client = TransportClient::new(transport, self.config.read_timeout);
        if let Some(retry) = self.retry {
            client = client.with_retry_handler(retry);
        }

        let registry = ToolRegistry::new(self.config.collision_policy);
        for tool in self.tools {
            registry.register(tool)?;
        }

        Ok(Engine {
            vendor,
            client,
            registry,
            config: self.config,
        })
    }
}

/// Runs conversation turns against one vendor. Shareable across chats:
/// every method takes `&self`.
pub struct Engine {
    vendor: Arc<dyn Vendor>,
    client: TransportClient,
    registry: ToolRegistry,
    config: EngineConfig,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn vendor(&self) -> &dyn Vendor {
        self.vendor.as_ref()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn register_tool(&self, tool: impl Into<Arc<Tool>>) -> Result<Arc<Tool>, ToolError> {
        let tool = tool.into();
        self.registry.register(tool.clone())?;
        Ok(tool)
    }

    pub fn remove_tool(&self, tool: &Arc<Tool>) {
        self.registry.unregister(tool);
    }

    pub fn clear_tools(&self) {
        self.registry.clear();
    }

    /// Forces the model to call a function on the next turn's first request.
    /// With several functions the last one wins.
    pub fn force_tool(&self, functions: &[Arc<Function>]) -> ForceGuard {
        self.registry.force(functions)
    }

    pub fn scoped_tools(&self, tools: &[Arc<Tool>]) -> Result<ToolScope, ToolError> {
        self.registry.scoped(tools)
    }

    /// Asks the vendor's endpoint whether it is reachable with the configured
    /// credentials. Vendors without a check always succeed.
    pub async fn check_connection(&self) -> Result<(), EngineError> {
        let Some(request) = self.vendor.connection_check() else {
            return Ok(());
        };

        match self.client.check_reachable(request).await {
            Ok(()) => {
                debug!(vendor = self.vendor.name(), "provider connection established");
                Ok(())
            }
            Err(ProviderError::Status { status, body })
                if self.vendor.classify_status(status) == StatusClass::Unauthorized =>
            {
                Err(ProviderError::Authentication(body).into())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Sends `prompt` as a new message and returns it with its response.
    pub async fn send_message(
        &self,
        chat: &mut Chat,
        prompt: impl Into<String>,
    ) -> Result<Message, EngineError> {
        let mut message = Message::new(prompt);
        self.send(chat, &mut message).await?;
        Ok(message)
    }

    /// Runs one turn for `message` and returns the committed response.
    /// On error the message is left unsent.
    pub async fn send(&self, chat: &mut Chat, message: &mut Message) -> Result<String, EngineError> {
        let stream = self.turn_stream(chat, message);
        futures_util::pin_mut!(stream);

        let mut final_response: Option<String> = None;

        while let Some(event) = stream.next().await {
            match event? {
                TurnEvent::FinalResponse { content } => final_response = Some(content),
                TurnEvent::Reasoning { .. }
                | TurnEvent::Text { .. }
                | TurnEvent::ToolCall { .. }
                | TurnEvent::ToolResult { .. }
                | TurnEvent::TimedOut { .. } => {}
            }
        }

        final_response.ok_or(EngineError::MissingFinalResponse)
    }

    /// One turn as a stream of events. The turn ends with
    /// [`TurnEvent::FinalResponse`] or an error. Dropping the stream early
    /// leaves the message unsent.
    pub fn turn_stream<'a>(
        &'a self,
        chat: &'a mut Chat,
        message: &'a mut Message,
    ) -> impl Stream<Item = Result<TurnEvent, EngineError>> + 'a {
        try_stream! {
            if message.is_complete() {
                Err::<(), EngineError>(EngineError::MessageCompleted)?;
            }

            let tools = self.registry.snapshot();
            let definitions = tools.definitions();
            let mut messages = self.request_messages(chat, message.prompt(), &tools);
            let mut tool_choice = self.initial_tool_choice(&definitions, &tools);
            let suppress_thinking = matches!(tool_choice, ModelToolChoice::Tool(_));

            let attempt = SendAttempt::new(message);
            let mut rounds = 0u32;

            loop {
                let delivery = self
                    .deliver(&messages, &definitions, &tool_choice, suppress_thinking)
                    .await?;
                // forcing applies to the first request of a turn only
                tool_choice = automatic_choice(&definitions);

                let invocation = match delivery {
                    Delivery::TimedOut { partial } => {
                        warn!(
                            vendor = self.vendor.name(),
                            partial_len = partial.len(),
                            "turn timed out; committing partial response"
                        );
                        yield TurnEvent::TimedOut { partial: partial.clone() };
                        attempt.message.commit(partial.clone(), None, true);
                        chat.add_message(attempt.message.clone());
                        yield TurnEvent::FinalResponse { content: partial };
                        return;
                    }
                    Delivery::Complete(Decoded::FinalText { text, reasoning }) => {
                        let reasoning = reasoning.map(|reasoning| reasoning.text());
                        if let Some(content) = reasoning.clone().filter(|text| !text.is_empty()) {
                            yield TurnEvent::Reasoning { content };
                        }
                        if !text.is_empty() {
                            yield TurnEvent::Text { content: text.clone() };
                        }
                        attempt.message.commit(text.clone(), reasoning, false);
                        chat.add_message(attempt.message.clone());
                        debug!(rounds, "turn completed");
                        yield TurnEvent::FinalResponse { content: text };
                        return;
                    }
                    Delivery::Complete(Decoded::ToolInvocation(invocation)) => invocation,
                };

                if rounds >= self.config.max_tool_iterations {
                    Err::<(), EngineError>(EngineError::ToolLoopExceeded {
                        max_iterations: self.config.max_tool_iterations,
                    })?;
                }
                rounds += 1;

                let continuation = invocation.continuation;
                if let Some(content) = continuation
                    .reasoning
                    .as_ref()
                    .map(|reasoning| reasoning.text())
                    .filter(|text| !text.is_empty())
                {
                    yield TurnEvent::Reasoning { content };
                }
                if let Some(text) = &continuation.text {
                    yield TurnEvent::Text { content: text.clone() };
                }

                messages.push(ModelMessage::Assistant {
                    content: continuation.text,
                    reasoning: continuation.reasoning,
                    tool_calls: invocation.calls.clone(),
                });

                for call in invocation.calls {
                    yield TurnEvent::ToolCall {
                        function: call.name.clone(),
                        arguments: Value::Object(call.arguments.clone()),
                        tool_call_id: call.id.clone(),
                    };

                    let function = tools.resolve(&call.name)?;
                    let (result_text, is_error) = match function.invoke(&call.arguments).await {
                        Ok(value) => (render_result(value), false),
                        Err(err) => {
                            warn!(
                                function = function.name(),
                                error = %err,
                                "function call failed; reporting error to model"
                            );
                            (err.to_string(), true)
                        }
                    };

                    messages.push(ModelMessage::ToolResult {
                        tool_call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        content: result_text.clone(),
                        is_error,
                    });

                    yield TurnEvent::ToolResult {
                        function: call.name,
                        result_text,
                        tool_call_id: call.id,
                        is_error,
                    };
                }
            }
        }
    }

    /// Request entries for a new turn: system prompt, replayed history as
    /// user/assistant pairs, then the decorated prompt.
    fn request_messages(&self, chat: &Chat, prompt: &str, tools: &ToolSet) -> Vec<ModelMessage> {
        let mut messages = Vec::with_capacity(chat.history().len() * 2 + 2);

        if let Some(system_prompt) = &self.config.system_prompt {
            messages.push(ModelMessage::System(system_prompt.clone()));
        }

        if chat.use_message_history() {
            for past in chat.history() {
                messages.push(ModelMessage::User(past.prompt().to_string()));
                messages.push(ModelMessage::Assistant {
                    content: past.response().map(str::to_string),
                    reasoning: None,
                    tool_calls: Vec::new(),
                });
            }
        }

        messages.push(ModelMessage::User(self.decorate_prompt(prompt, tools)));
        messages
    }

    fn decorate_prompt(&self, prompt: &str, tools: &ToolSet) -> String {
        match (self.config.tool_prompt, tools.preamble()) {
            (Some(PromptPosition::Before), Some(preamble)) => format!("{preamble}\n\n{prompt}"),
            (Some(PromptPosition::After), Some(preamble)) => format!("{prompt}\n\n{preamble}"),
            _ => prompt.to_string(),
        }
    }

    fn initial_tool_choice(
        &self,
        definitions: &[ModelToolDefinition],
        tools: &ToolSet,
    ) -> ModelToolChoice {
        if definitions.is_empty() {
            return ModelToolChoice::None;
        }

        match tools.forced() {
            Some(function) if self.vendor.supports_forced_tool() => {
                ModelToolChoice::Tool(function.name().to_string())
            }
            Some(function) => {
                warn!(
                    vendor = self.vendor.name(),
                    function = function.name(),
                    "vendor does not support forced tool choice; using automatic choice"
                );
                ModelToolChoice::Auto
            }
            None => ModelToolChoice::Auto,
        }
    }

    /// Sends one request revision, waiting out rate limits.
    async fn deliver(
        &self,
        messages: &[ModelMessage],
        definitions: &[ModelToolDefinition],
        tool_choice: &ModelToolChoice,
        suppress_thinking: bool,
    ) -> Result<Delivery, EngineError> {
        let request = self.vendor.encode(&ConversationRequest {
            messages,
            tools: definitions,
            tool_choice,
            suppress_thinking,
        })?;

        let mut retries = 0;
        loop {
            debug!(
                vendor = self.vendor.name(),
                messages = messages.len(),
                tools = definitions.len(),
                retries,
                "sending conversation request"
            );

            let (status, body) =
                match self.client.send(request.clone(), self.vendor.decoder()).await {
                    Ok(delivery) => return Ok(delivery),
                    Err(ProviderError::Status { status, body }) => (status, body),
                    Err(err) => return Err(err.into()),
                };

            match self.vendor.classify_status(status) {
                StatusClass::RateLimited if retries < self.config.max_rate_limit_retries => {
                    retries += 1;
                    warn!(
                        status,
                        retry = retries,
                        max_retries = self.config.max_rate_limit_retries,
                        delay_ms = self.config.rate_limit_delay.as_millis() as u64,
                        "rate limited; retrying after delay"
                    );
                    tokio::time::sleep(self.config.rate_limit_delay).await;
                }
                StatusClass::RateLimited => {
                    return Err(EngineError::RateLimited { attempts: retries });
                }
                StatusClass::Unauthorized => {
                    return Err(ProviderError::Authentication(body).into());
                }
                StatusClass::Success | StatusClass::Failed => {
                    return Err(ProviderError::Status { status, body }.into());
                }
            }
        }
    }
}

fn automatic_choice(definitions: &[ModelToolDefinition]) -> ModelToolChoice {
    if definitions.is_empty() {
        ModelToolChoice::None
    } else {
        ModelToolChoice::Auto
    }
}

fn render_result(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

/// Marks the message sent for the lifetime of one turn. Unless the turn
/// committed a response, dropping it marks the message unsent again.
struct SendAttempt<'m> {
    message: &'m mut Message,
}

impl<'m> SendAttempt<'m> {
    fn new(message: &'m mut Message) -> Self {
        message.mark_sent();
        Self { message }
    }
}

impl Drop for SendAttempt<'_> {
    fn drop(&mut self) {
        self.message.abandon();
    }
}
