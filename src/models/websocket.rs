use serde::{ Serialize, Deserialize };
use serde_json::{ Map as JsonMap, Value as JsonValue };

pub const DEFAULT_DOWNLOAD_NAME: &str = "unknown.txt";

/// Frames this client sends over the agent side channel.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "FEEDBACK")] Feedback {
        feedback: String,
    },
}

impl ClientFrame {
    pub fn feedback(text: impl Into<String>) -> Self {
        ClientFrame::Feedback { feedback: text.into() }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileDownload {
    pub b64_content: String,
    #[serde(default)]
    pub filename: Option<String>,
}

impl FileDownload {
    pub fn filename_or_default(&self) -> &str {
        match self.filename.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => DEFAULT_DOWNLOAD_NAME,
        }
    }
}

/// One decoded unit received over the agent side channel.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentFrame {
    Text(String),
    Status(String),
    FileDownload(FileDownload),
    AwaitingFeedback(String),
    Failure(String),
    Visualization(String),
    /// Unknown tag, falsy content or an unusable payload.
    Ignored,
}

impl AgentFrame {
    /// Decodes a text frame. Only input that is not a JSON object is an
    /// error; everything else maps to a variant, `Ignored` included.
    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        let mut object: JsonMap<String, JsonValue> = serde_json::from_str(raw)?;
        let content = object.remove("content").unwrap_or(JsonValue::Null);
        if is_falsy(&content) {
            return Ok(AgentFrame::Ignored);
        }

        let kind = match object.remove("type") {
            None => return Ok(AgentFrame::Text(content_text(content))),
            Some(JsonValue::String(kind)) => kind,
            Some(_) => return Ok(AgentFrame::Ignored),
        };

        let decoded = match kind.as_str() {
            "statusResponse" => AgentFrame::Status(content_text(content)),
            "awaitingFeedback" => AgentFrame::AwaitingFeedback(content_text(content)),
            "wssFailure" => AgentFrame::Failure(content_text(content)),
            "rechartVisualize" => AgentFrame::Visualization(content_text(content)),
            "fileDownload" =>
                match serde_json::from_value::<FileDownload>(content) {
                    Ok(download) => AgentFrame::FileDownload(download),
                    Err(_) => AgentFrame::Ignored,
                }
            _ => AgentFrame::Ignored,
        };
        Ok(decoded)
    }
}

/// One decoded unit of an HTTP streaming chat response.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StreamFragment {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default, alias = "textResponse")]
    pub content: Option<String>,
    #[serde(default)]
    pub sources: Option<Vec<JsonValue>>,
    #[serde(default)]
    pub close: Option<bool>,
    #[serde(default)]
    pub error: Option<JsonValue>,
    #[serde(rename = "websocketUUID", default)]
    pub websocket_uuid: Option<String>,
    #[serde(default)]
    pub chat_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentKind {
    /// No `type` tag: a bare content fragment.
    Untagged,
    TextChunk,
    TextResponse,
    Abort,
    StopGeneration,
    Finalize,
    AgentSession,
    Unknown(String),
}

impl StreamFragment {
    pub fn kind(&self) -> FragmentKind {
        match self.kind.as_deref() {
            None => FragmentKind::Untagged,
            Some("textResponseChunk") => FragmentKind::TextChunk,
            Some("textResponse") => FragmentKind::TextResponse,
            Some("abort") => FragmentKind::Abort,
            Some("stopGeneration") => FragmentKind::StopGeneration,
            Some("finalizeResponseStream") => FragmentKind::Finalize,
            Some("agentInitWebsocketConnection") => FragmentKind::AgentSession,
            Some(other) => FragmentKind::Unknown(other.to_string()),
        }
    }

    pub fn is_closing(&self) -> bool {
        self.close.unwrap_or(false)
    }

    /// The error text, if the backend flagged this fragment as failed.
    pub fn error_text(&self) -> Option<String> {
        match &self.error {
            Some(JsonValue::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(JsonValue::Bool(true)) => Some("Unknown error".to_string()),
            Some(JsonValue::Object(_)) | Some(JsonValue::Array(_)) =>
                self.error.as_ref().map(|v| v.to_string()),
            _ => None,
        }
    }

    pub fn sources(&self) -> Vec<JsonValue> {
        self.sources.clone().unwrap_or_default()
    }
}

fn is_falsy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => true,
        JsonValue::Bool(b) => !b,
        JsonValue::Number(n) => n.as_f64() == Some(0.0),
        JsonValue::String(s) => s.is_empty(),
        JsonValue::Array(_) | JsonValue::Object(_) => false,
    }
}

fn content_text(value: JsonValue) -> String {
    match value {
        JsonValue::String(s) => s,
        other => other.to_string(),
    }
}
