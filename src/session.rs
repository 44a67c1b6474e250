use crate::download::FileSink;
use crate::error::{ ChatError, ChatResult };
use crate::models::chat::{ ChatMessage, Transcript };
use crate::models::websocket::ClientFrame;
use crate::stream::{ ChatTarget, FragmentOutcome, FrameOutcome, Mode, PromptStreamer, StreamAdapter };
use crate::transcript::{ TranscriptController, TranscriptEvent };
use crate::websocket::{ ChannelConnector, SideChannel };

use futures::{ FutureExt, StreamExt };
use log::{ info, warn, error, debug };
use std::sync::Arc;
use tokio::sync::watch;

/// External services a session talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub streamer: Arc<dyn PromptStreamer>,
    pub connector: Arc<dyn ChannelConnector>,
    pub files: Arc<dyn FileSink>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Blank input; nothing happened.
    Ignored,
    /// The HTTP reply finished.
    Completed,
    /// The agent session asked for the next user message.
    AwaitingInput,
    /// The agent session ended and the client is back in stream mode.
    SessionClosed,
    Aborted,
}

/// Cancels whatever turn is in progress on the owning session.
#[derive(Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<u64>>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.tx.send_modify(|generation| {
            *generation += 1;
        });
    }
}

pub struct ChatSession {
    target: ChatTarget,
    controller: TranscriptController,
    adapter: StreamAdapter,
    collaborators: Collaborators,
    channel: Option<Box<dyn SideChannel>>,
    abort_tx: Arc<watch::Sender<u64>>,
    abort_rx: watch::Receiver<u64>,
}

impl ChatSession {
    pub fn new(target: ChatTarget, collaborators: Collaborators, history: Vec<ChatMessage>) -> Self {
        let (abort_tx, abort_rx) = watch::channel(0);
        Self {
            target,
            controller: TranscriptController::new(history),
            adapter: StreamAdapter::new(),
            collaborators,
            channel: None,
            abort_tx: Arc::new(abort_tx),
            abort_rx,
        }
    }

    pub fn transcript(&self) -> &Transcript {
        self.controller.transcript()
    }

    pub fn in_flight(&self) -> bool {
        self.controller.in_flight()
    }

    pub fn mode(&self) -> Mode {
        self.adapter.mode()
    }

    pub fn has_open_channel(&self) -> bool {
        self.channel.is_some()
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle { tx: self.abort_tx.clone() }
    }

    /// Sends `text` and drives the reply until the turn settles. With an agent
    /// session open the text goes out as feedback instead of a new prompt.
    pub async fn submit(&mut self, text: &str) -> TurnOutcome {
        if text.trim().is_empty() {
            return TurnOutcome::Ignored;
        }
        self.abort_rx.borrow_and_update();
        self.drain_ready_frames().await;

        if self.channel.is_some() {
            return match self.send_feedback(text).await {
                Ok(()) => self.pump_channel().await,
                Err(e) => {
                    error!("Failed to forward feedback: {}", e);
                    self.close_channel().await;
                    TurnOutcome::SessionClosed
                }
            };
        }

        match self.controller.submit(text) {
            Some(prompt) => self.fetch_reply(&prompt).await,
            None => TurnOutcome::Ignored,
        }
    }

    /// Forwards `text` over the open agent session. The transcript is left
    /// untouched; replies arrive as frames.
    pub async fn send_feedback(&mut self, text: &str) -> ChatResult<()> {
        let channel = self.channel.as_mut().ok_or(ChatError::ChannelClosed)?;
        channel.send(&ClientFrame::feedback(text)).await?;
        self.controller.mark_awaiting_reply();
        Ok(())
    }

    async fn fetch_reply(&mut self, prompt: &str) -> TurnOutcome {
        self.adapter.begin_stream();
        let streamer = self.collaborators.streamer.clone();
        let mut stream = match streamer.stream_chat(&self.target, prompt).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to start chat stream: {}", e);
                let event = self.adapter.on_stream_error(e);
                self.controller.react_to_stream_event(event);
                return TurnOutcome::Completed;
            }
        };

        let mut failed = false;
        loop {
            let next = tokio::select! {
                next = stream.next() => Some(next),
                _ = wait_for_abort(&mut self.abort_rx) => None,
            };
            let Some(next) = next else {
                return self.abort().await;
            };
            match next {
                Some(Ok(fragment)) => {
                    match self.adapter.on_fragment(fragment) {
                        FragmentOutcome::Event(event) => self.controller.react_to_stream_event(event),
                        FragmentOutcome::OpenSession(session_id) => {
                            debug!("Stream handed off to agent session {}", session_id);
                        }
                        FragmentOutcome::Ignored => {}
                    }
                }
                Some(Err(e)) => {
                    warn!("Chat stream failed: {}", e);
                    let event = self.adapter.on_stream_error(e);
                    self.controller.react_to_stream_event(event);
                    failed = true;
                    break;
                }
                None => {
                    break;
                }
            }
        }
        drop(stream);

        if let Some(event) = self.adapter.on_stream_end() {
            if !failed {
                self.controller.react_to_stream_event(event);
            }
        }

        match self.adapter.session_id().map(str::to_string) {
            Some(session_id) => self.open_channel(&session_id).await,
            None => TurnOutcome::Completed,
        }
    }

    async fn open_channel(&mut self, session_id: &str) -> TurnOutcome {
        let connector = self.collaborators.connector.clone();
        match connector.connect(session_id).await {
            Ok(channel) => {
                info!("Agent session {} connected", session_id);
                self.channel = Some(channel);
                self.pump_channel().await
            }
            Err(e) => {
                error!("Failed to open agent session {}: {}", session_id, e);
                self.adapter.on_abort();
                let message = format!("Failed to open agent session: {}", e);
                self.controller.react_to_stream_event(TranscriptEvent::Append {
                    kind: None,
                    content: message.clone(),
                    error: Some(message),
                });
                TurnOutcome::Completed
            }
        }
    }

    /// Applies side-channel frames until the agent waits for input, the
    /// channel closes, or the turn is aborted.
    pub async fn pump_channel(&mut self) -> TurnOutcome {
        loop {
            let Some(channel) = self.channel.as_mut() else {
                return TurnOutcome::SessionClosed;
            };
            let next = tokio::select! {
                frame = channel.next_frame() => Some(frame),
                _ = wait_for_abort(&mut self.abort_rx) => None,
            };
            let Some(frame) = next else {
                return self.abort().await;
            };
            if let Some(outcome) = self.apply_frame(frame).await {
                return outcome;
            }
        }
    }

    /// Waits for one frame while no turn is running. Returns `None` when the
    /// frame was handled and the session is still open with nothing to report.
    pub async fn poll_channel(&mut self) -> Option<TurnOutcome> {
        let channel = self.channel.as_mut()?;
        let frame = channel.next_frame().await;
        self.apply_frame(frame).await
    }

    /// Applies frames that already arrived without waiting for more, so a
    /// session the server closed between turns is noticed before routing.
    async fn drain_ready_frames(&mut self) {
        loop {
            let Some(channel) = self.channel.as_mut() else {
                return;
            };
            let Some(frame) = channel.next_frame().now_or_never() else {
                return;
            };
            self.apply_frame(frame).await;
        }
    }

    async fn apply_frame(&mut self, frame: Option<ChatResult<String>>) -> Option<TurnOutcome> {
        let raw = match frame {
            Some(Ok(raw)) => raw,
            Some(Err(e)) => {
                error!("Agent session transport error: {}", e);
                self.close_channel().await;
                return Some(TurnOutcome::SessionClosed);
            }
            None => {
                self.close_channel().await;
                return Some(TurnOutcome::SessionClosed);
            }
        };

        match self.adapter.on_frame(&raw) {
            Ok(FrameOutcome::Event { event, awaiting_input }) => {
                self.controller.react_to_stream_event(event);
                if awaiting_input {
                    return Some(TurnOutcome::AwaitingInput);
                }
            }
            Ok(FrameOutcome::Download(download)) => {
                let files = self.collaborators.files.clone();
                match files.save(&download).await {
                    Ok(path) => info!("Agent file saved to {}", path.display()),
                    Err(e) => error!("Failed to save {}: {}", download.filename_or_default(), e),
                }
            }
            Ok(FrameOutcome::Ignored) => {
                debug!("Dropped agent frame: {}", raw);
            }
            Err(e) => {
                error!("Failed to parse agent frame: {}", e);
                self.close_channel().await;
                return Some(TurnOutcome::SessionClosed);
            }
        }
        None
    }

    /// Closes the agent session, if any, and appends the completion notice.
    /// Safe to call repeatedly.
    pub async fn close_channel(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close().await;
        }
        if let Some(event) = self.adapter.on_channel_closed() {
            self.controller.react_to_stream_event(event);
        }
    }

    async fn abort(&mut self) -> TurnOutcome {
        warn!("Turn aborted");
        if let Some(mut channel) = self.channel.take() {
            channel.close().await;
        }
        self.adapter.on_abort();
        self.controller.halt();
        TurnOutcome::Aborted
    }
}

async fn wait_for_abort(rx: &mut watch::Receiver<u64>) {
    if rx.changed().await.is_err() {
        std::future::pending::<()>().await;
    }
}
