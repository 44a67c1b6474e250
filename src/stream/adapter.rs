use log::{ debug, info, warn };

use crate::models::chat::EventKind;
use crate::models::websocket::{ AgentFrame, FileDownload, FragmentKind, StreamFragment };
use crate::transcript::{ TranscriptEvent, STREAM_ERROR_TEXT };

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterState {
    Idle,
    Streaming,
    Session {
        session_id: String,
    },
}

/// Which transport the next submission goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Stream,
    Session,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FragmentOutcome {
    Event(TranscriptEvent),
    OpenSession(String),
    Ignored,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Event {
        event: TranscriptEvent,
        awaiting_input: bool,
    },
    Download(FileDownload),
    Ignored,
}

/// Turns HTTP fragments and side-channel frames into transcript events and
/// tracks which transport is live.
#[derive(Debug)]
pub struct StreamAdapter {
    state: AdapterState,
}

impl Default for StreamAdapter {
    fn default() -> Self {
        Self { state: AdapterState::Idle }
    }
}

impl StreamAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &AdapterState {
        &self.state
    }

    pub fn mode(&self) -> Mode {
        match self.state {
            AdapterState::Session { .. } => Mode::Session,
            _ => Mode::Stream,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match &self.state {
            AdapterState::Session { session_id } => Some(session_id),
            _ => None,
        }
    }

    pub fn begin_stream(&mut self) {
        self.state = AdapterState::Streaming;
    }

    pub fn on_fragment(&mut self, fragment: StreamFragment) -> FragmentOutcome {
        if let Some(error) = fragment.error_text() {
            if fragment.kind() != FragmentKind::Abort {
                return FragmentOutcome::Event(TranscriptEvent::Failed { error });
            }
        }

        let sources = fragment.sources();
        let close = fragment.is_closing();
        match fragment.kind() {
            FragmentKind::Untagged | FragmentKind::TextChunk =>
                FragmentOutcome::Event(TranscriptEvent::Chunk {
                    content: fragment.content.unwrap_or_default(),
                    sources,
                    close,
                }),
            FragmentKind::TextResponse =>
                FragmentOutcome::Event(TranscriptEvent::Replace {
                    content: fragment.content.unwrap_or_default(),
                    sources,
                    close,
                }),
            FragmentKind::Abort => {
                let error = fragment.error_text().unwrap_or_else(|| STREAM_ERROR_TEXT.to_string());
                FragmentOutcome::Event(TranscriptEvent::Failed { error })
            }
            FragmentKind::StopGeneration | FragmentKind::Finalize =>
                FragmentOutcome::Event(TranscriptEvent::Settle),
            FragmentKind::AgentSession => {
                match fragment.websocket_uuid.filter(|id| !id.is_empty()) {
                    Some(session_id) => {
                        info!("Agent session requested: {}", session_id);
                        self.state = AdapterState::Session { session_id: session_id.clone() };
                        FragmentOutcome::OpenSession(session_id)
                    }
                    None => {
                        warn!("Agent session fragment without a session id");
                        FragmentOutcome::Ignored
                    }
                }
            }
            FragmentKind::Unknown(kind) => {
                debug!("Ignoring fragment of unknown type '{}'", kind);
                FragmentOutcome::Ignored
            }
        }
    }

    /// Closes out a finished HTTP stream. Returns the settling event unless a
    /// side channel took over the reply.
    pub fn on_stream_end(&mut self) -> Option<TranscriptEvent> {
        match self.state {
            AdapterState::Session { .. } => None,
            _ => {
                self.state = AdapterState::Idle;
                Some(TranscriptEvent::Settle)
            }
        }
    }

    pub fn on_stream_error(&mut self, error: impl ToString) -> TranscriptEvent {
        if !matches!(self.state, AdapterState::Session { .. }) {
            self.state = AdapterState::Idle;
        }
        TranscriptEvent::Failed { error: error.to_string() }
    }

    /// Decodes one raw side-channel frame.
    pub fn on_frame(&self, raw: &str) -> Result<FrameOutcome, serde_json::Error> {
        let outcome = match AgentFrame::decode(raw)? {
            AgentFrame::Text(content) => append(None, content, None, false),
            AgentFrame::Status(content) => append(Some(EventKind::Status), content, None, false),
            AgentFrame::AwaitingFeedback(content) =>
                append(Some(EventKind::AwaitingFeedback), content, None, true),
            AgentFrame::Failure(content) => {
                let error = Some(content.clone());
                append(None, content, error, false)
            }
            AgentFrame::Visualization(content) =>
                append(Some(EventKind::Visualization), content, None, false),
            AgentFrame::FileDownload(download) => FrameOutcome::Download(download),
            AgentFrame::Ignored => FrameOutcome::Ignored,
        };
        Ok(outcome)
    }

    /// Leaves session mode. Only the first close after a session yields the
    /// completion notice.
    pub fn on_channel_closed(&mut self) -> Option<TranscriptEvent> {
        match std::mem::replace(&mut self.state, AdapterState::Idle) {
            AdapterState::Session { session_id } => {
                info!("Agent session {} closed", session_id);
                Some(TranscriptEvent::SessionComplete)
            }
            _ => None,
        }
    }

    pub fn on_abort(&mut self) {
        self.state = AdapterState::Idle;
    }
}

fn append(
    kind: Option<EventKind>,
    content: String,
    error: Option<String>,
    awaiting_input: bool
) -> FrameOutcome {
    FrameOutcome::Event {
        event: TranscriptEvent::Append { kind, content, error },
        awaiting_input,
    }
}
