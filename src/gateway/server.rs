//! TCP front end for [`ChatServer`].
//!
//! Every frame is a 4-byte big-endian length followed by the payload. The first
//! frame a client sends is its session id; after that each frame is either a
//! chat envelope or a read request (`{"task_type": ..., "parameters": {...}}`).
//! Closing or losing the socket logs the session out, unless a newer login
//! has taken the id over.

use bytes::{Bytes, BytesMut};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task;
use tracing::{debug, error, info, warn};

use crate::adapters::connection::{Connection, FramedConnection};
use crate::core::offload::{TaskParams, TaskType};
use crate::core::session::SessionId;
use crate::core::shutdown::stopped;
use crate::server::ChatServer;

const INBUF_INIT: usize = 16 * 1024;

#[derive(Debug, Deserialize)]
struct ReadRequest {
    task_type: String,
    #[serde(default)]
    parameters: Value,
}

/// Binds `server.bind_addr` from the server's config and serves until shutdown.
pub async fn serve(server: Arc<ChatServer>, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let bind_addr = server.config().server.bind_addr.clone();
    let listener = TcpListener::bind(&bind_addr).await?;
    info!("hybridchat gateway listening on {}", bind_addr);
    serve_listener(listener, server, shutdown).await
}

/// Accept loop over an already bound listener.
pub async fn serve_listener(
    listener: TcpListener,
    server: Arc<ChatServer>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let max_frame_len = server.config().server.max_frame_len;
    loop {
        tokio::select! {
            _ = stopped(&mut shutdown) => {
                info!("gateway stopped accepting connections");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (socket, peer) = accepted?;
                socket.set_nodelay(true)?;
                let server = Arc::clone(&server);
                debug!("client connected: {}", peer);
                task::spawn(async move {
                    if let Err(e) = handle_client(socket, peer, server, max_frame_len).await {
                        error!("error handling {}: {:?}", peer, e);
                    }
                });
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    peer: SocketAddr,
    server: Arc<ChatServer>,
    max_frame_len: usize,
) -> anyhow::Result<()> {
    let (reader_half, writer_half) = stream.into_split();
    let mut reader = BufReader::new(reader_half);
    let connection: Arc<dyn Connection> = Arc::new(FramedConnection::new(writer_half));

    let mut inbuf = BytesMut::with_capacity(INBUF_INIT);
    let mut session: Option<SessionId> = None;

    'io: loop {
        match reader.read_buf(&mut inbuf).await {
            Ok(0) => break 'io,
            Ok(_) => {}
            Err(e) => {
                debug!(%peer, error = %e, "client read failed; treating as disconnect");
                break 'io;
            }
        }

        while inbuf.len() >= 4 {
            let len = u32::from_be_bytes([inbuf[0], inbuf[1], inbuf[2], inbuf[3]]) as usize;
            if len > max_frame_len {
                warn!("client {} sent oversized frame ({} > {})", peer, len, max_frame_len);
                break 'io;
            }
            if inbuf.len() < 4 + len {
                break;
            }
            let mut frame = inbuf.split_to(4 + len);
            let payload = frame.split_off(4).freeze();

            match &session {
                None => {
                    let id = String::from_utf8_lossy(&payload).trim().to_string();
                    if id.is_empty() {
                        warn!("client {} sent an empty session id", peer);
                        break 'io;
                    }
                    let id = SessionId::from(id);
                    server.on_login(id.clone(), Arc::clone(&connection)).await?;
                    info!(session = %id, %peer, "client logged in");
                    session = Some(id);
                }
                Some(id) => handle_frame(&server, id, &connection, payload).await,
            }
        }
    }

    if let Some(id) = session {
        if let Err(e) = server.on_disconnect(id.clone(), connection).await {
            debug!(session = %id, error = %e, "logout not delivered");
        }
        info!(session = %id, %peer, "client disconnected");
    }
    Ok(())
}

async fn handle_frame(
    server: &ChatServer,
    session: &SessionId,
    connection: &Arc<dyn Connection>,
    payload: Bytes,
) {
    if let Ok(request) = serde_json::from_slice::<ReadRequest>(&payload) {
        let reply = match read(server, session, request).await {
            Ok(reply) => reply,
            Err(e) => json!({ "error": e.to_string() }),
        };
        let encoded = match serde_json::to_vec(&reply) {
            Ok(encoded) => encoded,
            Err(e) => {
                error!(session = %session, error = %e, "read reply not encodable");
                return;
            }
        };
        if let Err(e) = connection.write_frame(Bytes::from(encoded)).await {
            warn!(session = %session, error = %e, "read reply not written");
        }
        return;
    }

    if let Err(e) = server.on_inbound_message(payload).await {
        warn!(session = %session, error = %e, "inbound message rejected");
    }
}

async fn read(server: &ChatServer, session: &SessionId, request: ReadRequest) -> anyhow::Result<Value> {
    let task_type: TaskType = request.task_type.parse()?;
    let params = TaskParams::decode(task_type, request.parameters)?;
    let reply = server.send_async(params, session).await?;
    Ok(serde_json::to_value(reply)?)
}
