pub mod adapter;
pub mod http;

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::error::ChatResult;
use crate::models::websocket::StreamFragment;

pub use adapter::{ AdapterState, FragmentOutcome, FrameOutcome, Mode, StreamAdapter };
pub use http::HttpPromptStreamer;

pub type FragmentStream = Pin<Box<dyn Stream<Item = ChatResult<StreamFragment>> + Send>>;

/// Workspace (and optional thread) a conversation belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTarget {
    pub workspace_slug: String,
    pub thread_slug: Option<String>,
}

impl ChatTarget {
    pub fn workspace(slug: impl Into<String>) -> Self {
        Self { workspace_slug: slug.into(), thread_slug: None }
    }

    pub fn with_thread(mut self, slug: Option<String>) -> Self {
        self.thread_slug = slug.filter(|s| !s.is_empty());
        self
    }
}

/// External streaming chat call. The returned stream is finite and cannot be
/// restarted.
#[async_trait]
pub trait PromptStreamer: Send + Sync {
    async fn stream_chat(&self, target: &ChatTarget, prompt: &str) -> ChatResult<FragmentStream>;
}
