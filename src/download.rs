use async_trait::async_trait;
use base64::{ engine::general_purpose::STANDARD, Engine as _ };
use log::info;
use std::path::{ Path, PathBuf };

use crate::error::ChatResult;
use crate::models::websocket::{ FileDownload, DEFAULT_DOWNLOAD_NAME };

/// Receives files pushed by an agent session.
#[async_trait]
pub trait FileSink: Send + Sync {
    async fn save(&self, download: &FileDownload) -> ChatResult<PathBuf>;
}

/// Writes downloads into a local directory.
pub struct DiskFileSink {
    dir: PathBuf,
}

impl DiskFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Target path for `filename`, keeping only its final component.
    pub fn target_path(&self, filename: &str) -> PathBuf {
        let name = Path::new(filename)
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_DOWNLOAD_NAME);
        self.dir.join(name)
    }
}

#[async_trait]
impl FileSink for DiskFileSink {
    async fn save(&self, download: &FileDownload) -> ChatResult<PathBuf> {
        let bytes = decode_payload(&download.b64_content)?;
        let path = self.target_path(download.filename_or_default());
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&path, &bytes).await?;
        info!("Saved {} bytes to {}", bytes.len(), path.display());
        Ok(path)
    }
}

/// Decodes plain base64 or a `data:<mime>;base64,` URI.
pub fn decode_payload(payload: &str) -> ChatResult<Vec<u8>> {
    let encoded = match payload.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, data)| data).unwrap_or(rest),
        None => payload,
    };
    Ok(STANDARD.decode(encoded.trim())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_plain_and_data_uri() {
        assert_eq!(decode_payload("aGVsbG8=").unwrap(), b"hello");
        assert_eq!(decode_payload("data:text/plain;base64,aGVsbG8=").unwrap(), b"hello");
        assert!(decode_payload("***").is_err());
    }

    #[test]
    fn target_path_strips_directories() {
        let sink = DiskFileSink::new("/tmp/out");
        assert_eq!(sink.target_path("../../etc/passwd"), PathBuf::from("/tmp/out/passwd"));
        assert_eq!(sink.target_path(".."), PathBuf::from("/tmp/out/unknown.txt"));
    }

    #[tokio::test]
    async fn save_writes_file() {
        let dir = std::env::temp_dir().join(format!("workspace-chat-{}", uuid::Uuid::new_v4()));
        let sink = DiskFileSink::new(&dir);
        let path = sink
            .save(&FileDownload { b64_content: "aGk=".into(), filename: None }).await
            .unwrap();
        assert_eq!(path, dir.join("unknown.txt"));
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"hi");
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
