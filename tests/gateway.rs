#[path = "common.rs"]
mod common;

use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use hybridchat::config::MessageMode;
use hybridchat::core::session::{GOODBYE_NOTICE, WELCOME_NOTICE};
use hybridchat::gateway::serve_listener;
use hybridchat::core::shutdown::Shutdown;
use hybridchat::{ChatServer, Collaborators};

async fn send(stream: &mut TcpStream, payload: &[u8]) {
    stream
        .write_all(&(payload.len() as u32).to_be_bytes())
        .await
        .unwrap();
    stream.write_all(payload).await.unwrap();
}

async fn recv(stream: &mut TcpStream) -> Vec<u8> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.unwrap();
    let mut buf = vec![0u8; u32::from_be_bytes(len_buf) as usize];
    stream.read_exact(&mut buf).await.unwrap();
    buf
}

#[tokio::test]
async fn clients_chat_over_tcp() {
    common::init_logging();
    let server = Arc::new(ChatServer::new(
        common::config(MessageMode::Channel),
        Collaborators::in_memory(),
    ));
    server.start().unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let stop = Shutdown::new();
    let gateway = tokio::spawn(serve_listener(listener, server.clone(), stop.subscribe()));

    let mut alice = TcpStream::connect(addr).await.unwrap();
    let mut bob = TcpStream::connect(addr).await.unwrap();
    send(&mut alice, b"U1").await;
    send(&mut bob, b"U2").await;
    assert_eq!(recv(&mut alice).await, WELCOME_NOTICE.as_bytes());
    assert_eq!(recv(&mut bob).await, WELCOME_NOTICE.as_bytes());

    send(&mut alice, &common::text("U1", "U2", "over the wire")).await;
    let to_bob: Value = serde_json::from_slice(&recv(&mut bob).await).unwrap();
    assert_eq!(to_bob["content"], "over the wire");
    let echo: Value = serde_json::from_slice(&recv(&mut alice).await).unwrap();
    assert_eq!(echo["receive_id"], "U2");

    // Channel mode answers reads on the same connection.
    let read = json!({"task_type": "load_message_list",
        "parameters": {"user_one_id": "U2", "user_two_id": "U1"}});
    send(&mut bob, read.to_string().as_bytes()).await;
    let history: Value = serde_json::from_slice(&recv(&mut bob).await).unwrap();
    assert_eq!(history[0]["content"], "over the wire");

    drop(alice);
    assert!(common::wait_until(|| !server.registry().is_registered("U1")).await);

    stop.trigger();
    gateway.await.unwrap().unwrap();
    server.stop().await;
}

async fn running_gateway() -> (Arc<ChatServer>, SocketAddr, Shutdown) {
    common::init_logging();
    let server = Arc::new(ChatServer::new(
        common::config(MessageMode::Channel),
        Collaborators::in_memory(),
    ));
    server.start().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let stop = Shutdown::new();
    tokio::spawn(serve_listener(listener, server.clone(), stop.subscribe()));
    (server, addr, stop)
}

#[tokio::test]
async fn reset_connection_logs_the_session_out() {
    let (server, addr, stop) = running_gateway().await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    send(&mut client, b"U1").await;
    assert!(common::wait_until(|| server.registry().is_registered("U1")).await);
    // Closing with the welcome still unread resets the connection.
    common::settle().await;
    drop(client);

    assert!(common::wait_until(|| !server.registry().is_registered("U1")).await);
    stop.trigger();
    server.stop().await;
}

#[tokio::test]
async fn closing_an_older_device_keeps_the_newer_one() {
    let (server, addr, stop) = running_gateway().await;

    let mut old = TcpStream::connect(addr).await.unwrap();
    send(&mut old, b"U1").await;
    assert_eq!(recv(&mut old).await, WELCOME_NOTICE.as_bytes());
    let mut new = TcpStream::connect(addr).await.unwrap();
    send(&mut new, b"U1").await;
    assert_eq!(recv(&mut new).await, WELCOME_NOTICE.as_bytes());

    drop(old);
    common::settle().await;
    assert!(server.registry().is_registered("U1"));

    let mut peer = TcpStream::connect(addr).await.unwrap();
    send(&mut peer, b"U2").await;
    assert_eq!(recv(&mut peer).await, WELCOME_NOTICE.as_bytes());
    send(&mut peer, &common::text("U2", "U1", "to the new device")).await;

    let next = recv(&mut new).await;
    assert_ne!(next, GOODBYE_NOTICE.as_bytes());
    let message: Value = serde_json::from_slice(&next).unwrap();
    assert_eq!(message["content"], "to the new device");

    stop.trigger();
    server.stop().await;
}
