//! Asks a provider about the weather and answers its tool calls locally.
//!
//! Provider selection:
//!   ANTHROPIC_API_KEY set  -> Anthropic (streamed)
//!   OPENAI_API_KEY set     -> OpenAI
//!   LM_STUDIO_URL set      -> LM Studio at that endpoint
//!
//! `RUST_LOG=toolchat=debug cargo run --example weather -- "Weather in Denver?"`

use std::error::Error;
use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;
use toolchat::{
    AnthropicModel, Chat, Engine, EngineBuilder, Function, Message, OpenAiModel, Parameter, Tool,
    ToolError, TurnEvent,
};
use tracing_subscriber::EnvFilter;

fn weather_tool() -> Tool {
    Tool::new("weather")
        .injection_prompt("Call get_weather whenever the user asks about current conditions.")
        .with_function(
            Function::new("get_weather", "Current weather for a location")
                .parameter(Parameter::string("location", "City and state, e.g. Denver, CO"))
                .parameter(Parameter::boolean("metric", "Report Celsius instead of Fahrenheit"))
                .with_handler(|args| async move {
                    let location = args.string("location")?;
                    if location.trim().is_empty() {
                        return Err(ToolError::Execution("location is empty".to_string()));
                    }
                    let reading = if args.boolean("metric")? { "22C" } else { "72F" };
                    Ok(Value::String(format!("{reading} and sunny in {location}")))
                }),
        )
}

fn vendor(builder: EngineBuilder) -> Result<EngineBuilder, Box<dyn Error>> {
    if std::env::var("ANTHROPIC_API_KEY").is_ok() {
        return Ok(builder.vendor(AnthropicModel::from_env("claude-sonnet-4-5")?));
    }
    if std::env::var("OPENAI_API_KEY").is_ok() {
        return Ok(builder.vendor(OpenAiModel::from_env("gpt-4o-mini")?));
    }
    if let Ok(endpoint) = std::env::var("LM_STUDIO_URL") {
        return Ok(builder.vendor(OpenAiModel::lm_studio(endpoint, "local-model")));
    }
    Err("set ANTHROPIC_API_KEY, OPENAI_API_KEY or LM_STUDIO_URL".into())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("toolchat=info")),
        )
        .init();

    let prompt = std::env::args()
        .skip(1)
        .collect::<Vec<_>>()
        .join(" ");
    let prompt = if prompt.is_empty() {
        "What's the weather in Denver?".to_string()
    } else {
        prompt
    };

    let tool = Arc::new(weather_tool());
    let engine = vendor(Engine::builder())?
        .system_prompt("Answer in one sentence.")
        .tool(tool.clone())
        .build()?;
    engine.check_connection().await?;

    let mut chat = Chat::new();
    let mut message = Message::new(prompt);
    {
        let stream = engine.turn_stream(&mut chat, &mut message);
        futures_util::pin_mut!(stream);

        while let Some(event) = stream.next().await {
            match event? {
                TurnEvent::Reasoning { content } => println!("[thinking] {content}"),
                TurnEvent::Text { content } => println!("[text] {content}"),
                TurnEvent::ToolCall {
                    function,
                    arguments,
                    ..
                } => println!("[call] {function}({arguments})"),
                TurnEvent::ToolResult {
                    result_text,
                    is_error,
                    ..
                } => println!("[result{}] {result_text}", if is_error { " error" } else { "" }),
                TurnEvent::TimedOut { .. } => println!("[timed out]"),
                TurnEvent::FinalResponse { content } => println!("\n{content}"),
            }
        }
    }

    let follow_up = engine
        .send_message(&mut chat, "And should I bring a jacket?")
        .await?;
    println!("{}", follow_up.response().unwrap_or_default());
    println!("history: {} messages", chat.history().len());

    Ok(())
}
