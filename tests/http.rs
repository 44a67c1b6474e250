use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{ AsyncReadExt, AsyncWriteExt };
use tokio::net::{ TcpListener, TcpStream };
use tokio::task::JoinHandle;

use workspace_chat::download::DiskFileSink;
use workspace_chat::error::ChatError;
use workspace_chat::models::websocket::FragmentKind;
use workspace_chat::session::{ ChatSession, Collaborators, TurnOutcome };
use workspace_chat::stream::{ ChatTarget, HttpPromptStreamer, PromptStreamer };
use workspace_chat::websocket::WsConnector;

const SSE_HEAD: &str =
    "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nTransfer-Encoding: chunked\r\n\r\n";

/// One data line split across two chunks, as proxies tend to deliver it.
static HELLO_WORLD: [&str; 4] = [
    "data: {\"uuid\":\"u1\",\"type\":\"textResponseChunk\",\"textResponse\":\"Hello\",\"close\":false}\n\n",
    "data: {\"uuid\":\"u1\",\"type\":\"textResponseChunk\",\"textRes",
    "ponse\":\" world\",\"close\":false}\n\n",
    "data: {\"uuid\":\"u1\",\"type\":\"finalizeResponseStream\",\"close\":true}\n\n",
];

enum Reply {
    Events(&'static [&'static str]),
    ServerError,
    /// Sends one chunk, then goes quiet without ending the body.
    Stall(&'static str),
}

struct Served {
    head: String,
    body: String,
    client_hung_up: bool,
}

async fn read_request(socket: &mut TcpStream) -> (String, String) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        let n = socket.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed before the request head");
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.eq_ignore_ascii_case("content-length") {
                value.trim().parse::<usize>().ok()
            } else {
                None
            }
        })
        .unwrap_or(0);
    while buf.len() < head_end + length {
        let n = socket.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed before the request body");
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buf[head_end..head_end + length]).to_string();
    (head, body)
}

async fn write_chunk(socket: &mut TcpStream, data: &str) {
    let framed = format!("{:x}\r\n{}\r\n", data.len(), data);
    socket.write_all(framed.as_bytes()).await.unwrap();
    socket.flush().await.unwrap();
}

/// Answers a single request on a local port and reports what it saw.
async fn spawn_server(reply: Reply) -> (String, JoinHandle<Served>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let (head, body) = read_request(&mut socket).await;
        let mut client_hung_up = false;

        match reply {
            Reply::Events(chunks) => {
                socket.write_all(SSE_HEAD.as_bytes()).await.unwrap();
                for data in chunks {
                    write_chunk(&mut socket, data).await;
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                socket.write_all(b"0\r\n\r\n").await.unwrap();
                socket.flush().await.unwrap();
            }
            Reply::ServerError => {
                socket
                    .write_all(
                        b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                    ).await
                    .unwrap();
                socket.flush().await.unwrap();
            }
            Reply::Stall(data) => {
                socket.write_all(SSE_HEAD.as_bytes()).await.unwrap();
                write_chunk(&mut socket, data).await;
                let mut rest = [0u8; 64];
                let read = tokio::time::timeout(Duration::from_secs(5), socket.read(&mut rest)).await;
                client_hung_up = matches!(read, Ok(Ok(0)) | Ok(Err(_)));
            }
        }

        Served { head, body, client_hung_up }
    });

    (format!("http://{}/api", addr), server)
}

fn session_against(api_base_url: &str) -> ChatSession {
    let download_dir = std::env::temp_dir().join(format!("workspace-chat-{}", uuid::Uuid::new_v4()));
    ChatSession::new(
        ChatTarget::workspace("docs"),
        Collaborators {
            streamer: Arc::new(HttpPromptStreamer::new(api_base_url)),
            connector: Arc::new(WsConnector::new("ws://127.0.0.1:1/api/agent-invocation")),
            files: Arc::new(DiskFileSink::new(download_dir)),
        },
        Vec::new()
    )
}

#[tokio::test]
async fn chunked_event_stream_yields_fragments_in_order() {
    let (base_url, server) = spawn_server(Reply::Events(&HELLO_WORLD)).await;
    let streamer = HttpPromptStreamer::new(base_url);

    let stream = streamer.stream_chat(&ChatTarget::workspace("docs"), "hello").await.unwrap();
    let fragments: Vec<_> = stream
        .collect::<Vec<_>>().await
        .into_iter()
        .map(|fragment| fragment.unwrap())
        .collect();

    let contents: Vec<Option<&str>> = fragments
        .iter()
        .map(|f| f.content.as_deref())
        .collect();
    assert_eq!(contents, vec![Some("Hello"), Some(" world"), None]);
    assert_eq!(fragments[0].kind(), FragmentKind::TextChunk);
    assert_eq!(fragments[2].kind(), FragmentKind::Finalize);
    assert!(fragments[2].is_closing());

    let served = server.await.unwrap();
    assert!(served.head.starts_with("POST /api/workspace/docs/stream-chat HTTP/1.1\r\n"));
    let body: serde_json::Value = serde_json::from_str(&served.body).unwrap();
    assert_eq!(body, serde_json::json!({ "message": "hello" }));
}

#[tokio::test]
async fn thread_target_posts_to_thread_endpoint() {
    let (base_url, server) = spawn_server(Reply::Events(&HELLO_WORLD[3..])).await;
    let streamer = HttpPromptStreamer::new(base_url);
    let target = ChatTarget::workspace("docs").with_thread(Some("t-1".to_string()));

    let stream = streamer.stream_chat(&target, "hi").await.unwrap();
    assert_eq!(stream.collect::<Vec<_>>().await.len(), 1);

    let served = server.await.unwrap();
    assert!(served.head.starts_with("POST /api/workspace/docs/thread/t-1/stream-chat HTTP/1.1\r\n"));
}

#[tokio::test]
async fn server_error_status_is_an_http_error() {
    let (base_url, server) = spawn_server(Reply::ServerError).await;
    let streamer = HttpPromptStreamer::new(base_url);

    let result = streamer.stream_chat(&ChatTarget::workspace("docs"), "hello").await.map(|_| ());
    match result {
        Err(ChatError::Http(e)) => {
            assert_eq!(e.status(), Some(reqwest::StatusCode::INTERNAL_SERVER_ERROR));
        }
        other => panic!("expected an HTTP error, got {:?}", other),
    }
    server.await.unwrap();
}

#[tokio::test]
async fn server_error_settles_reply_with_error() {
    let (base_url, server) = spawn_server(Reply::ServerError).await;
    let mut session = session_against(&base_url);

    assert_eq!(session.submit("hello").await, TurnOutcome::Completed);
    server.await.unwrap();

    let msgs = session.transcript().messages();
    assert_eq!(msgs.len(), 2);
    assert_eq!(msgs[0].content, "hello");
    assert!(msgs[1].error.is_some());
    assert!(!msgs[1].pending);
    assert!(!session.in_flight());
}

#[tokio::test]
async fn streamed_reply_over_http_settles() {
    let (base_url, server) = spawn_server(Reply::Events(&HELLO_WORLD)).await;
    let mut session = session_against(&base_url);

    assert_eq!(session.submit("hello").await, TurnOutcome::Completed);
    server.await.unwrap();

    let last = session.transcript().last().unwrap();
    assert_eq!(last.content, "Hello world");
    assert!(last.error.is_none());
    assert!(!last.pending);
    assert_eq!(session.transcript().pending_count(), 0);
}

#[tokio::test]
async fn dropping_the_stream_releases_the_connection() {
    let (base_url, server) = spawn_server(Reply::Stall(HELLO_WORLD[0])).await;
    let streamer = HttpPromptStreamer::new(base_url);

    let mut stream = streamer.stream_chat(&ChatTarget::workspace("docs"), "hello").await.unwrap();
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.content.as_deref(), Some("Hello"));
    drop(stream);

    let served = server.await.unwrap();
    assert!(served.client_hung_up);
}
