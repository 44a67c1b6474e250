use futures::{ SinkExt, StreamExt };
use tokio::net::TcpListener;
use tokio_tungstenite::{ accept_async, tungstenite::protocol::Message };

use workspace_chat::models::websocket::ClientFrame;
use workspace_chat::websocket::{ ChannelConnector, WsConnector };

/// Plays one scripted agent session and returns the text frames the client sent.
async fn spawn_agent_server() -> (String, tokio::task::JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        ws.send(Message::Ping(vec![1, 2, 3])).await.unwrap();
        ws.send(Message::Text(r#"{"type":"statusResponse","content":"booting"}"#.into())).await.unwrap();
        ws.send(Message::Text(r#"{"type":"awaitingFeedback","content":"Continue?"}"#.into())).await.unwrap();

        let mut received = Vec::new();
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                received.push(text);
                break;
            }
        }

        ws.send(Message::Text(r#"{"content":"done"}"#.into())).await.unwrap();
        ws.close(None).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
        received
    });

    (format!("ws://{}/api/agent-invocation", addr), server)
}

#[tokio::test]
async fn feedback_round_trip_over_real_socket() {
    let (base_url, server) = spawn_agent_server().await;
    let connector = WsConnector::new(base_url);
    let mut channel = connector.connect("sess-9").await.unwrap();

    let first = channel.next_frame().await.unwrap().unwrap();
    assert!(first.contains("booting"));
    let second = channel.next_frame().await.unwrap().unwrap();
    assert!(second.contains("awaitingFeedback"));

    channel.send(&ClientFrame::feedback("more info")).await.unwrap();

    let third = channel.next_frame().await.unwrap().unwrap();
    assert_eq!(third, r#"{"content":"done"}"#);
    assert!(channel.next_frame().await.is_none());

    channel.close().await;
    channel.close().await;
    assert!(channel.next_frame().await.is_none());
    assert!(channel.send(&ClientFrame::feedback("late")).await.is_err());
    drop(channel);

    let received = server.await.unwrap();
    assert_eq!(received, vec![r#"{"type":"FEEDBACK","feedback":"more info"}"#.to_string()]);
}

#[tokio::test]
async fn connect_failure_is_reported() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let connector = WsConnector::new(format!("ws://{}/api/agent-invocation", addr));
    assert!(connector.connect("nobody").await.is_err());
}
