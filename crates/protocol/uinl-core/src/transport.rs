//! Outbound side of the protocol.

use serde_json::Value as JsonValue;

/// Sink for outbound messages. Sending is fire-and-forget; delivery problems
/// belong to the implementation.
pub trait Transport {
    fn send(&mut self, message: JsonValue);

    /// Called once the session can no longer continue (failed `require`).
    fn close(&mut self) {}
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, message: JsonValue) {
        (**self).send(message);
    }

    fn close(&mut self) {
        (**self).close();
    }
}

/// Recording transport: keeps every outbound message in order.
#[derive(Clone, Debug, Default)]
pub struct Outbox {
    messages: Vec<JsonValue>,
    closed: bool,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[JsonValue] {
        &self.messages
    }

    /// Take everything recorded so far.
    pub fn drain(&mut self) -> Vec<JsonValue> {
        std::mem::take(&mut self.messages)
    }

    pub fn last(&self) -> Option<&JsonValue> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Transport for Outbox {
    fn send(&mut self, message: JsonValue) {
        self.messages.push(message);
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
