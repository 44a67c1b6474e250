pub mod cli;
pub mod download;
pub mod error;
pub mod history;
pub mod models;
pub mod session;
pub mod stream;
pub mod transcript;
pub mod websocket;

use cli::Args;
use download::DiskFileSink;
use log::info;
use session::{ ChatSession, Collaborators };
use std::error::Error;
use std::sync::Arc;
use stream::{ ChatTarget, HttpPromptStreamer };
use websocket::WsConnector;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Chat Configuration ---");
    info!("API Base URL: {}", args.api_base_url);
    info!("Agent WS URL: {}", args.agent_ws_url);
    info!("Workspace: {}", args.workspace);
    info!("Thread: {}", args.thread.as_deref().unwrap_or("-"));
    info!("Download Dir: {}", args.download_dir);
    info!("-------------------------");

    let history = history::initialize_history(args.history_path.as_deref())?;
    let target = ChatTarget::workspace(args.workspace.clone()).with_thread(args.thread.clone());
    let collaborators = Collaborators {
        streamer: Arc::new(HttpPromptStreamer::new(args.api_base_url.clone())),
        connector: Arc::new(WsConnector::new(args.agent_ws_url.clone())),
        files: Arc::new(DiskFileSink::new(args.download_dir.clone())),
    };

    let session = ChatSession::new(target, collaborators, history);
    cli::repl::run_repl(session).await
}
