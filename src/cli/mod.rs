pub mod repl;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Backend Args ---
    /// Base URL of the workspace chat API (e.g., http://localhost:3001/api)
    #[arg(long, env = "API_BASE_URL", default_value = "http://localhost:3001/api")]
    pub api_base_url: String,

    /// Base URL for agent invocation sockets. The session id is appended as the last path segment.
    #[arg(long, env = "AGENT_WS_URL", default_value = "ws://localhost:3001/api/agent-invocation")]
    pub agent_ws_url: String,

    // --- Conversation Args ---
    /// Slug of the workspace to chat with.
    #[arg(short = 'w', long, env = "WORKSPACE_SLUG")]
    pub workspace: String,

    /// Optional thread slug inside the workspace.
    #[arg(long, env = "THREAD_SLUG")]
    pub thread: Option<String>,

    /// JSON file with earlier messages to seed the transcript with.
    #[arg(long, env = "HISTORY_PATH")]
    pub history_path: Option<String>,

    // --- General App Args ---
    /// Directory where files pushed by agent sessions are written.
    #[arg(long, env = "DOWNLOAD_DIR", default_value = ".")]
    pub download_dir: String,

    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,
}
