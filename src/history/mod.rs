use log::info;
use std::fs;

use crate::error::ChatResult;
use crate::models::chat::ChatMessage;

/// Reads previously known messages from a JSON array file.
pub fn load_history(path: &str) -> ChatResult<Vec<ChatMessage>> {
    let json_str = fs::read_to_string(path)?;
    let messages: Vec<ChatMessage> = serde_json::from_str(&json_str)?;
    info!("Loaded {} history messages from {}", messages.len(), path);
    Ok(messages)
}

pub fn initialize_history(path: Option<&str>) -> ChatResult<Vec<ChatMessage>> {
    match path {
        Some(path) if !path.is_empty() => load_history(path),
        _ => Ok(Vec::new()),
    }
}
