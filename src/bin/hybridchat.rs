//! hybridchat – one binary that can start the chat server *or* act as an
//! interactive client shell.
//
//  $ hybridchat start --config hybridchat.toml --group G1=U1,U2
//  $ hybridchat connect 127.0.0.1:8000 --session U1
//  > msg U2 hello
//  > history U2
use hybridchat::adapters::{GroupInfo, MemoryCache, MemoryLog, MemoryStore};
use hybridchat::core::envelope::{ChatEnvelope, FileMeta, MessageType};
use hybridchat::core::shutdown::{wait_for_signal, Shutdown};
use hybridchat::logging::init_logging;
use hybridchat::{serve, ChatServer, Collaborators, Config};

use anyhow::Context;
use clap::{Parser, Subcommand};
use rustyline::history::DefaultHistory;
use rustyline::{DefaultEditor, Editor};
use serde_json::json;

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "hybridchat", version, about = "Hybrid queue/broker chat server & CLI")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the chat server with in-process collaborators.
    Start {
        /// Path to config TOML (env HYBRIDCHAT_CONFIG is used when omitted)
        #[arg(short, long)]
        config: Option<String>,
        /// Seed a group, e.g. `G1=U1,U2,U3`. Repeatable.
        #[arg(long = "group", value_name = "ID=MEMBERS")]
        groups: Vec<String>,
    },
    /// Connect to a running server in interactive mode.
    Connect {
        /// Server address (host:port)
        addr: SocketAddr,
        /// User id to log in as
        #[arg(short, long)]
        session: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.cmd {
        Command::Start { config, groups } => start(config, groups).await?,
        Command::Connect { addr, session } => repl(addr, session).await?,
    }
    Ok(())
}

fn parse_group(arg: &str) -> anyhow::Result<GroupInfo> {
    let (id, members) = arg
        .split_once('=')
        .with_context(|| format!("group '{arg}' is not of the form ID=MEMBERS"))?;
    let members: Vec<String> = members
        .split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect();
    Ok(GroupInfo {
        uuid: id.trim().to_string(),
        name: id.trim().to_string(),
        owner_id: members.first().cloned().unwrap_or_default(),
        avatar: String::new(),
        members,
    })
}

async fn start(config: Option<String>, groups: Vec<String>) -> anyhow::Result<()> {
    init_logging();
    let cfg = Config::load(config.as_deref())?;

    let store = Arc::new(MemoryStore::new());
    for arg in &groups {
        let group = parse_group(arg)?;
        info!(group = %group.uuid, members = group.members.len(), "group seeded");
        store.add_group(group);
    }
    let collaborators = Collaborators {
        log: Arc::new(MemoryLog::new()),
        cache: Arc::new(MemoryCache::new()),
        persistence: store,
    };

    let server = Arc::new(ChatServer::new(cfg, collaborators));
    server.start()?;

    let gateway_stop = Shutdown::new();
    let mut gateway = tokio::spawn(serve(Arc::clone(&server), gateway_stop.subscribe()));

    tokio::select! {
        _ = wait_for_signal() => {}
        res = &mut gateway => match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "gateway failed"),
            Err(e) => error!(error = %e, "gateway task failed"),
        },
    }

    gateway_stop.trigger();
    server.stop().await;
    Ok(())
}

// ───────────────────────────────────────────────────────────
// Interactive REPL shell
// ───────────────────────────────────────────────────────────
async fn write_frame(w: &mut OwnedWriteHalf, payload: &[u8]) -> anyhow::Result<()> {
    let len = (payload.len() as u32).to_be_bytes();
    w.write_all(&len).await?;
    w.write_all(payload).await?;
    w.flush().await?;
    Ok(())
}

async fn repl(addr: SocketAddr, session: String) -> anyhow::Result<()> {
    let mut rl: Editor<(), DefaultHistory> = DefaultEditor::new()?;

    let stream = TcpStream::connect(addr).await?;
    let (r, mut w) = stream.into_split();
    let mut reader = BufReader::new(r);

    write_frame(&mut w, session.as_bytes()).await?;
    println!("Connected to {addr} as {session}. Type `help` for commands.");

    // Background task printing every frame the server pushes.
    let printer: JoinHandle<()> = tokio::spawn(async move {
        loop {
            let mut len_buf = [0u8; 4];
            if reader.read_exact(&mut len_buf).await.is_err() {
                break;
            }
            let len = u32::from_be_bytes(len_buf) as usize;
            let mut buf = vec![0u8; len];
            if reader.read_exact(&mut buf).await.is_err() {
                break;
            }
            println!("< {}", String::from_utf8_lossy(&buf));
        }
    });

    loop {
        let Ok(line) = rl.readline("> ") else { break };
        let _ = rl.add_history_entry(line.as_str());

        let frame = match line.split_whitespace().collect::<Vec<_>>().as_slice() {
            ["help"] => {
                println!("msg <to> <text> | history <user> | group-history <group> | groups | exit");
                continue;
            }
            ["exit" | "quit"] => break,

            ["msg", to, rest @ ..] if !rest.is_empty() => {
                let envelope = ChatEnvelope {
                    kind: MessageType::Text,
                    session_id: String::new(),
                    send_id: session.clone(),
                    send_name: session.clone(),
                    send_avatar: String::new(),
                    receive_id: (*to).to_string(),
                    content: rest.join(" "),
                    url: String::new(),
                    file: FileMeta::default(),
                    av_data: String::new(),
                };
                envelope.encode()?
            }
            ["history", other] => serde_json::to_vec(&json!({
                "task_type": "load_message_list",
                "parameters": { "user_one_id": session, "user_two_id": other },
            }))?,
            ["group-history", group] => serde_json::to_vec(&json!({
                "task_type": "load_group_message_list",
                "parameters": { "group_id": group },
            }))?,
            ["groups"] => serde_json::to_vec(&json!({
                "task_type": "load_joined_group_list",
                "parameters": { "owner_id": session },
            }))?,

            _ => {
                println!("Unknown cmd. Type `help`.");
                continue;
            }
        };
        write_frame(&mut w, &frame).await?;
    }

    drop(w);
    let _ = printer.await;
    Ok(())
}
