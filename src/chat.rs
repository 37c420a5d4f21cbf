//! Conversation state owned by the caller.
//!
//! A [`Chat`] holds completed [`Message`]s in send order. The engine reads the
//! history when building a request and appends the message once the turn
//! commits a response; it never rewrites earlier entries.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::document::Document;
use crate::error::DocumentError;

#[derive(Clone, Debug)]
pub struct Chat {
    history: Vec<Message>,
    log_history: bool,
    use_message_history: bool,
}

impl Default for Chat {
    fn default() -> Self {
        Self {
            history: Vec::new(),
            log_history: true,
            use_message_history: true,
        }
    }
}

impl Chat {
    pub fn new() -> Self {
        Self::default()
    }

    /// A chat that neither records nor replays messages.
    pub fn stateless() -> Self {
        Self {
            history: Vec::new(),
            log_history: false,
            use_message_history: false,
        }
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn log_history(&self) -> bool {
        self.log_history
    }

    pub fn use_message_history(&self) -> bool {
        self.use_message_history
    }

    /// Replaying history requires recording it, so enabling this also turns
    /// on [`Chat::log_history`].
    pub fn set_use_message_history(&mut self, enabled: bool) {
        if enabled && !self.log_history {
            debug!("message history requested; enabling history logging");
            self.log_history = true;
        }
        self.use_message_history = enabled;
    }

    /// Disabling logging also disables replay.
    pub fn set_log_history(&mut self, enabled: bool) {
        if !enabled && self.use_message_history {
            debug!("history logging disabled; message history replay turned off");
            self.use_message_history = false;
        }
        self.log_history = enabled;
    }

    pub(crate) fn add_message(&mut self, message: Message) {
        if self.log_history {
            self.history.push(message);
        }
    }
}

/// One prompt and, once the turn completes, its response.
#[derive(Clone, Debug)]
pub struct Message {
    prompt: String,
    created_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
    response: Option<String>,
    reasoning: Option<String>,
    timed_out: bool,
}

impl Message {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            created_at: Utc::now(),
            sent_at: None,
            response: None,
            reasoning: None,
            timed_out: false,
        }
    }

    /// Appends text to the prompt. Ignored once the message has a response.
    pub fn include(&mut self, text: &str) -> &mut Self {
        if self.response.is_none() {
            self.prompt.push_str(text);
        }
        self
    }

    pub fn include_document(&mut self, document: &dyn Document) -> Result<&mut Self, DocumentError> {
        let text = document.extract()?;
        Ok(self.include(&text))
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.sent_at
    }

    pub fn is_sent(&self) -> bool {
        self.sent_at.is_some()
    }

    pub fn response(&self) -> Option<&str> {
        self.response.as_deref()
    }

    /// Extended-thinking text returned alongside the final answer, if any.
    pub fn reasoning(&self) -> Option<&str> {
        self.reasoning.as_deref()
    }

    /// True when the transport timed out and the response holds partial text.
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    pub fn is_complete(&self) -> bool {
        self.response.is_some()
    }

    pub(crate) fn mark_sent(&mut self) {
        self.sent_at = Some(Utc::now());
    }

    pub(crate) fn abandon(&mut self) {
        if self.response.is_none() {
            self.sent_at = None;
        }
    }

    pub(crate) fn commit(&mut self, response: String, reasoning: Option<String>, timed_out: bool) {
        if self.response.is_some() {
            return;
        }
        self.response = Some(response);
        self.reasoning = reasoning;
        self.timed_out = timed_out;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(prompt: &str, response: &str) -> Message {
        let mut message = Message::new(prompt);
        message.mark_sent();
        message.commit(response.to_string(), None, false);
        message
    }

    #[test]
    fn enabling_message_history_turns_on_logging() {
        let mut chat = Chat::stateless();
        assert!(!chat.log_history());

        chat.set_use_message_history(true);
        assert!(chat.log_history());
        assert!(chat.use_message_history());

        chat.set_use_message_history(true);
        assert!(chat.log_history());
    }

    #[test]
    fn disabling_logging_turns_off_replay() {
        let mut chat = Chat::new();
        chat.set_log_history(false);
        assert!(!chat.use_message_history());
        assert!(!chat.log_history());
    }

    #[test]
    fn messages_are_recorded_only_when_logging() {
        let mut chat = Chat::new();
        chat.add_message(completed("a", "b"));
        assert_eq!(chat.history().len(), 1);

        let mut silent = Chat::stateless();
        silent.add_message(completed("a", "b"));
        assert!(silent.history().is_empty());
    }

    #[test]
    fn committed_message_is_immutable() {
        let mut message = completed("What time is it?", "Noon.");
        message.commit("Midnight.".to_string(), None, false);
        message.include(" Ignored");
        message.abandon();

        assert_eq!(message.response(), Some("Noon."));
        assert_eq!(message.prompt(), "What time is it?");
        assert!(message.is_sent());
    }

    #[test]
    fn abandoned_message_is_unsent() {
        let mut message = Message::new("hi");
        message.mark_sent();
        message.abandon();
        assert!(!message.is_sent());
        assert!(message.response().is_none());
    }
}
