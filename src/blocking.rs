//! Synchronous facade over [`Engine`].
//!
//! Owns a multi-thread runtime and blocks the calling thread on each turn.
//! Tool dispatch and resends stay on the runtime, so nested waits never
//! occupy a worker. Do not call from inside another tokio runtime.

use tokio::runtime::{Builder, Runtime};

use crate::chat::{Chat, Message};
use crate::engine::Engine;
use crate::error::EngineError;

pub struct BlockingEngine {
    runtime: Runtime,
    engine: Engine,
}

impl BlockingEngine {
    pub fn new(engine: Engine) -> Result<Self, EngineError> {
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .thread_name("toolchat-worker")
            .build()
            .map_err(|err| EngineError::Config(format!("runtime could not start: {err}")))?;

        Ok(Self { runtime, engine })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn check_connection(&self) -> Result<(), EngineError> {
        self.runtime.block_on(self.engine.check_connection())
    }

    pub fn send_message(
        &self,
        chat: &mut Chat,
        prompt: impl Into<String>,
    ) -> Result<Message, EngineError> {
        self.runtime.block_on(self.engine.send_message(chat, prompt))
    }

    pub fn send(&self, chat: &mut Chat, message: &mut Message) -> Result<String, EngineError> {
        self.runtime.block_on(self.engine.send(chat, message))
    }
}
