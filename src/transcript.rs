//! Transcript state: a pure reducer over [`TranscriptEvent`]s plus the
//! controller that owns the input buffer and the in-flight flag.

use crate::models::chat::{ ChatMessage, EventKind, Transcript };
use log::debug;
use serde_json::Value as JsonValue;

pub const STREAM_ERROR_TEXT: &str = "An error occurred while streaming response.";

/// Normalized transcript mutation produced by the stream adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptEvent {
    Submitted {
        text: String,
    },
    /// Append streamed text to the pending reply.
    Chunk {
        content: String,
        sources: Vec<JsonValue>,
        close: bool,
    },
    /// Replace the pending reply's text wholesale.
    Replace {
        content: String,
        sources: Vec<JsonValue>,
        close: bool,
    },
    Settle,
    Failed {
        error: String,
    },
    /// A finished message from the side channel.
    Append {
        kind: Option<EventKind>,
        content: String,
        error: Option<String>,
    },
    SessionComplete,
}

impl TranscriptEvent {
    /// Whether the reply is resolved once this event is applied.
    fn ends_reply(&self) -> bool {
        match self {
            TranscriptEvent::Submitted { .. } => false,
            TranscriptEvent::Chunk { close, .. } | TranscriptEvent::Replace { close, .. } => *close,
            TranscriptEvent::Settle
            | TranscriptEvent::Failed { .. }
            | TranscriptEvent::Append { .. }
            | TranscriptEvent::SessionComplete => true,
        }
    }
}

pub fn reduce(mut transcript: Transcript, event: TranscriptEvent) -> Transcript {
    match event {
        TranscriptEvent::Submitted { text } => {
            transcript.settle_all();
            transcript.push(ChatMessage::user(text.clone()));
            transcript.push(ChatMessage::pending_reply(text));
        }
        TranscriptEvent::Chunk { content, sources, close } => {
            match transcript.pending_reply_mut() {
                Some(reply) => {
                    reply.content.push_str(&content);
                    reply.sources.extend(sources);
                    if close {
                        reply.closed = true;
                        reply.settle();
                    }
                }
                None => push_stray(&mut transcript, content, sources),
            }
        }
        TranscriptEvent::Replace { content, sources, close } => {
            match transcript.pending_reply_mut() {
                Some(reply) => {
                    reply.content = content;
                    reply.sources = sources;
                    if close {
                        reply.closed = true;
                        reply.settle();
                    }
                }
                None => push_stray(&mut transcript, content, sources),
            }
        }
        TranscriptEvent::Settle => {
            if let Some(reply) = transcript.pending_reply_mut() {
                reply.closed = true;
                reply.settle();
            }
        }
        TranscriptEvent::Failed { error } => {
            match transcript.pending_reply_mut() {
                Some(reply) => {
                    reply.content.clear();
                    reply.error = Some(error);
                    reply.closed = true;
                    reply.settle();
                }
                None => transcript.push(ChatMessage::settled(None, String::new(), Some(error))),
            }
        }
        TranscriptEvent::Append { kind, content, error } => {
            transcript.prune_empty();
            transcript.settle_all();
            transcript.push(ChatMessage::settled(kind, content, error));
        }
        TranscriptEvent::SessionComplete => {
            transcript.prune_empty();
            transcript.settle_all();
            transcript.push(ChatMessage::session_complete());
        }
    }
    transcript
}

fn push_stray(transcript: &mut Transcript, content: String, sources: Vec<JsonValue>) {
    if content.is_empty() {
        return;
    }
    debug!("Fragment arrived with no pending reply; appending as a settled message");
    let mut msg = ChatMessage::settled(None, content, None);
    msg.sources = sources;
    transcript.push(msg);
}

#[derive(Debug, Default)]
pub struct TranscriptController {
    transcript: Transcript,
    input: String,
    in_flight: bool,
}

impl TranscriptController {
    pub fn new(history: Vec<ChatMessage>) -> Self {
        let mut transcript = Transcript::from_history(history);
        // Seeded history has no live stream behind it.
        transcript.settle_all();
        Self {
            transcript,
            input: String::new(),
            in_flight: false,
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.input = text.into();
    }

    /// Appends the user turn and a pending reply. Blank text is ignored and
    /// returns `None`.
    pub fn submit(&mut self, text: &str) -> Option<String> {
        if text.trim().is_empty() {
            return None;
        }
        let text = text.to_string();
        self.react_to_stream_event(TranscriptEvent::Submitted { text: text.clone() });
        self.input.clear();
        Some(text)
    }

    pub fn submit_input(&mut self) -> Option<String> {
        let text = std::mem::take(&mut self.input);
        let submitted = self.submit(&text);
        if submitted.is_none() {
            self.input = text;
        }
        submitted
    }

    pub fn react_to_stream_event(&mut self, event: TranscriptEvent) {
        self.in_flight = !event.ends_reply();
        let transcript = std::mem::take(&mut self.transcript);
        self.transcript = reduce(transcript, event);
    }

    /// Flags a reply as outstanding without touching the transcript.
    pub fn mark_awaiting_reply(&mut self) {
        self.in_flight = true;
    }

    /// Stops waiting and settles the pending reply in place.
    pub fn halt(&mut self) {
        self.transcript.settle_all();
        self.in_flight = false;
    }

    pub fn pending_prompt(&self) -> Option<&str> {
        self.transcript.pending_reply().and_then(|m| m.source_user_text.as_deref())
    }
}
