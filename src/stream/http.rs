use async_trait::async_trait;
use futures::StreamExt;
use log::{ debug, info, warn };
use reqwest::Client as HttpClient;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{ ChatTarget, FragmentStream, PromptStreamer };
use crate::error::{ ChatError, ChatResult };
use crate::models::websocket::StreamFragment;

#[derive(Serialize)]
struct StreamChatRequest<'a> {
    message: &'a str,
}

/// Streams replies from the workspace `stream-chat` endpoints, which answer
/// with server-sent events carrying one JSON fragment per `data:` line.
pub struct HttpPromptStreamer {
    http: HttpClient,
    api_base_url: String,
}

impl HttpPromptStreamer {
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            http: HttpClient::new(),
            api_base_url: api_base_url.into(),
        }
    }

    pub fn endpoint(&self, target: &ChatTarget) -> String {
        let base = self.api_base_url.trim_end_matches('/');
        match &target.thread_slug {
            Some(thread) =>
                format!("{}/workspace/{}/thread/{}/stream-chat", base, target.workspace_slug, thread),
            None => format!("{}/workspace/{}/stream-chat", base, target.workspace_slug),
        }
    }
}

#[async_trait]
impl PromptStreamer for HttpPromptStreamer {
    async fn stream_chat(&self, target: &ChatTarget, prompt: &str) -> ChatResult<FragmentStream> {
        let url = self.endpoint(target);
        info!("Streaming chat from {}", url);

        let resp = self.http
            .post(&url)
            .json(&(StreamChatRequest { message: prompt }))
            .send().await?
            .error_for_status()?;

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let mut bytes = resp.bytes_stream();
            let mut lines = SseLineBuffer::default();
            loop {
                let chunk = tokio::select! {
                    chunk = bytes.next() => chunk,
                    _ = tx.closed() => {
                        debug!("Chat stream receiver dropped, closing response body");
                        return;
                    }
                };
                let Some(chunk) = chunk else {
                    break;
                };
                match chunk {
                    Ok(buf) => {
                        for data in lines.push(&buf) {
                            if let Some(fragment) = parse_event_data(&data) {
                                if tx.send(Ok(fragment)).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(ChatError::Http(e))).await;
                        return;
                    }
                }
            }
            if let Some(data) = lines.finish() {
                if let Some(fragment) = parse_event_data(&data) {
                    let _ = tx.send(Ok(fragment)).await;
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// Splits a byte stream into SSE `data:` payloads, holding partial lines
/// until the rest arrives.
#[derive(Default)]
pub(crate) struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(data) = data_payload(&line) {
                out.push(data);
            }
        }
        out
    }

    pub(crate) fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        data_payload(&rest)
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim_end_matches(['\r', '\n']);
    let data = text.strip_prefix("data:")?.trim_start();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    Some(data.to_string())
}

fn parse_event_data(data: &str) -> Option<StreamFragment> {
    match serde_json::from_str::<StreamFragment>(data) {
        Ok(fragment) => {
            debug!("Fragment: {:?}", fragment.kind);
            Some(fragment)
        }
        Err(e) => {
            warn!("Skipping unparseable stream data ({}): {}", e, data);
            None
        }
    }
}
