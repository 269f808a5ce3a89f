use std::sync::Arc;

use crate::events::ChatMessage;

/// Append-only chat history for the current session, system notices included.
#[derive(Debug, Clone, Default)]
pub struct ChatLog {
    messages: Arc<Vec<ChatMessage>>,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ChatMessage) -> ChatMessage {
        let mut next = self.messages.as_ref().clone();
        next.push(message.clone());
        self.messages = Arc::new(next);
        message
    }

    /// Append a notice from the client itself.
    pub fn notice(&mut self, text: impl Into<String>) -> ChatMessage {
        self.push(ChatMessage::system(text))
    }

    pub fn messages(&self) -> Arc<Vec<ChatMessage>> {
        self.messages.clone()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    /// Clear all messages (on leave).
    pub fn clear(&mut self) {
        self.messages = Arc::new(Vec::new());
    }
}
