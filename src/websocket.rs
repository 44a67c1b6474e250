use crate::error::{ ChatError, ChatResult };
use crate::models::websocket::ClientFrame;
use async_trait::async_trait;
use futures::{ SinkExt, StreamExt };
use futures_util::stream::{ SplitSink, SplitStream };
use log::{ info, warn, error, debug };
use tokio::net::TcpStream;
use tokio_tungstenite::{ connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream };
use tokio_tungstenite::tungstenite::Error as WsError;
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Duplex connection to a running agent session.
#[async_trait]
pub trait SideChannel: Send {
    async fn send(&mut self, frame: &ClientFrame) -> ChatResult<()>;

    /// Next raw text frame. `None` once the peer closed or the channel was
    /// closed locally.
    async fn next_frame(&mut self) -> Option<ChatResult<String>>;

    /// Closes the channel. Calling it again is a no-op.
    async fn close(&mut self);
}

#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(&self, session_id: &str) -> ChatResult<Box<dyn SideChannel>>;
}

/// Opens `{base_url}/{session_id}` agent invocation sockets.
pub struct WsConnector {
    base_url: String,
}

impl WsConnector {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into() }
    }

    pub fn endpoint(&self, session_id: &str) -> ChatResult<Url> {
        let url = Url::parse(&format!("{}/{}", self.base_url.trim_end_matches('/'), session_id))?;
        Ok(url)
    }
}

#[async_trait]
impl ChannelConnector for WsConnector {
    async fn connect(&self, session_id: &str) -> ChatResult<Box<dyn SideChannel>> {
        let url = self.endpoint(session_id)?;
        info!("Opening agent session socket: {}", url);
        let (websocket, _response) = connect_async(url.as_str()).await?;
        let (tx, rx) = websocket.split();
        Ok(
            Box::new(WsChannel {
                tx,
                rx,
                session_id: session_id.to_string(),
                closed: false,
            })
        )
    }
}

pub struct WsChannel {
    tx: SplitSink<WsStream, Message>,
    rx: SplitStream<WsStream>,
    session_id: String,
    closed: bool,
}

#[async_trait]
impl SideChannel for WsChannel {
    async fn send(&mut self, frame: &ClientFrame) -> ChatResult<()> {
        if self.closed {
            return Err(ChatError::ChannelClosed);
        }
        let json = serde_json::to_string(frame)?;
        debug!("Sending to session {}: {}", self.session_id, json);
        self.tx.send(Message::Text(json)).await?;
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<ChatResult<String>> {
        if self.closed {
            return None;
        }
        while let Some(msg) = self.rx.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    return Some(Ok(text));
                }
                Ok(Message::Binary(bytes)) => {
                    match String::from_utf8(bytes) {
                        Ok(text) => {
                            return Some(Ok(text));
                        }
                        Err(_) => warn!("Ignoring non UTF-8 binary frame on session {}", self.session_id),
                    }
                }
                Ok(Message::Ping(ping_data)) => {
                    if let Err(e) = self.tx.send(Message::Pong(ping_data)).await {
                        error!("Failed to send pong on session {}: {}", self.session_id, e);
                        return Some(Err(e.into()));
                    }
                }
                Ok(Message::Pong(_)) => {/* Usually ignore pongs */}
                Ok(Message::Frame(_)) => {/* Usually ignore raw frames */}
                Ok(Message::Close(_)) => {
                    info!("Received close frame on session {}", self.session_id);
                    self.closed = true;
                    return None;
                }
                Err(e) => {
                    self.closed = true;
                    match e {
                        | WsError::ConnectionClosed
                        | WsError::AlreadyClosed
                        | WsError::Protocol(_)
                        | WsError::Utf8 => {
                            info!("Session {} socket closed or protocol error: {}", self.session_id, e);
                            return None;
                        }
                        _ => {
                            error!("Error receiving on session {}: {}", self.session_id, e);
                            return Some(Err(e.into()));
                        }
                    }
                }
            }
        }
        self.closed = true;
        None
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.tx.send(Message::Close(None)).await {
            debug!("Close frame not delivered on session {}: {}", self.session_id, e);
        }
        let _ = self.tx.close().await;
        info!("Closed agent session socket {}", self.session_id);
    }
}
