use chrono::Utc;
use serde::{ Serialize, Deserialize };
use serde_json::Value as JsonValue;
use uuid::Uuid;

pub const SESSION_COMPLETE_TEXT: &str = "Agent session complete.";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Tag for assistant messages whose payload is not plain reply text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "statusResponse")]
    Status,
    #[serde(rename = "awaitingFeedback")]
    AwaitingFeedback,
    #[serde(rename = "rechartVisualize")]
    Visualization,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default = "new_message_id")]
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub pending: bool,
    #[serde(default)]
    pub animate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_user_text: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub event_kind: Option<EventKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub sources: Vec<JsonValue>,
    #[serde(default)]
    pub closed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,
    #[serde(default = "now")]
    pub created_at: i64,
}

fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

fn now() -> i64 {
    Utc::now().timestamp()
}

impl ChatMessage {
    fn base(role: Role, content: String) -> Self {
        Self {
            id: new_message_id(),
            role,
            content,
            pending: false,
            animate: false,
            source_user_text: None,
            event_kind: None,
            error: None,
            sources: Vec::new(),
            closed: false,
            chat_id: None,
            created_at: now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::base(Role::User, text.into())
    }

    /// Empty assistant entry that streamed content will fill in.
    pub fn pending_reply(prompt: impl Into<String>) -> Self {
        let mut msg = Self::base(Role::Assistant, String::new());
        msg.pending = true;
        msg.animate = true;
        msg.source_user_text = Some(prompt.into());
        msg
    }

    /// A finished assistant entry, as appended for side-channel frames.
    pub fn settled(kind: Option<EventKind>, content: String, error: Option<String>) -> Self {
        let mut msg = Self::base(Role::Assistant, content);
        msg.event_kind = kind;
        msg.error = error;
        msg.closed = true;
        msg
    }

    pub fn session_complete() -> Self {
        Self::settled(Some(EventKind::Status), SESSION_COMPLETE_TEXT.to_string(), None)
    }

    pub fn is_pending_reply(&self) -> bool {
        self.pending && self.role == Role::Assistant
    }

    pub fn settle(&mut self) {
        self.pending = false;
        self.animate = false;
    }
}

/// Ordered chat history. Insertion order is display order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_history(messages: Vec<ChatMessage>) -> Self {
        Self { messages }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
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

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// The trailing pending assistant placeholder, if one is unresolved.
    pub fn pending_reply_mut(&mut self) -> Option<&mut ChatMessage> {
        self.messages.last_mut().filter(|m| m.is_pending_reply())
    }

    pub fn pending_reply(&self) -> Option<&ChatMessage> {
        self.messages.last().filter(|m| m.is_pending_reply())
    }

    pub fn pending_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_pending_reply()).count()
    }

    /// Drops every message with empty content, stale placeholders included.
    pub fn prune_empty(&mut self) {
        self.messages.retain(|m| !m.content.is_empty());
    }

    pub fn settle_all(&mut self) {
        for msg in self.messages.iter_mut().filter(|m| m.pending) {
            msg.settle();
        }
    }

    /// Messages worth rendering: empty entries survive only while pending or
    /// when they carry an error.
    pub fn visible(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages
            .iter()
            .filter(|m| !m.content.is_empty() || m.pending || m.error.is_some())
    }
}
