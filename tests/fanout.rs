#[path = "common.rs"]
mod common;

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

use common::{call, text, RecordingConnection};
use hybridchat::adapters::{Cache, GroupInfo, MemoryCache, MemoryStore};
use hybridchat::core::history::{group_key, pair_key, MessageHistory};
use hybridchat::core::message::{MessageResponse, MessageStatus};
use hybridchat::core::pipeline::{Delivery, FanOut};
use hybridchat::core::session::{SessionId, SessionRegistry};
use hybridchat::ChatError;

struct Fixture {
    registry: Arc<SessionRegistry>,
    store: Arc<MemoryStore>,
    cache: Arc<MemoryCache>,
    fanout: FanOut,
}

fn fixture() -> Fixture {
    common::init_logging();
    let registry = Arc::new(SessionRegistry::new(32));
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(MemoryCache::new());
    let history = Arc::new(MessageHistory::new(
        store.clone(),
        cache.clone(),
        Duration::from_secs(60),
    ));
    let fanout = FanOut::new(registry.clone(), store.clone(), history);
    Fixture {
        registry,
        store,
        cache,
        fanout,
    }
}

fn login(f: &Fixture, id: &str) -> Arc<RecordingConnection> {
    let conn = RecordingConnection::new();
    f.registry.register(SessionId::from(id), conn.clone());
    conn
}

#[tokio::test]
async fn direct_text_is_stored_then_delivered_to_both_ends() {
    let f = fixture();
    let a = login(&f, "U1");
    let b = login(&f, "U2");

    let delivery = f.fanout.process(&text("U1", "U2", "hi bob")).await.unwrap();
    assert_eq!(delivery, Delivery::User { delivered: 2 });

    let rows = f.store.messages();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, MessageStatus::Unsent);
    assert_eq!(rows[0].send_avatar, "/static/avatars/default.png");

    a.wait_for(2).await;
    b.wait_for(2).await;
    let to_b = b.messages();
    assert_eq!(to_b.len(), 1);
    assert_eq!(to_b[0].content, "hi bob");
    assert_eq!(to_b[0].file_size, "0B");
    assert_eq!(a.messages(), to_b);
}

#[tokio::test]
async fn offline_recipient_still_gets_the_row_and_sender_echo() {
    let f = fixture();
    let a = login(&f, "U1");

    let delivery = f.fanout.process(&text("U1", "U9", "anyone?")).await.unwrap();
    assert_eq!(delivery, Delivery::User { delivered: 1 });
    assert_eq!(f.store.messages().len(), 1);

    a.wait_for(2).await;
    assert_eq!(a.messages().len(), 1);
}

#[tokio::test]
async fn persistence_failure_aborts_before_fanout() {
    let f = fixture();
    let b = login(&f, "U2");
    f.store.set_available(false);

    let err = f.fanout.process(&text("U1", "U2", "lost")).await;
    assert!(matches!(err, Err(ChatError::Persistence(_))));

    common::settle().await;
    assert!(b.messages().is_empty());
}

#[tokio::test]
async fn group_message_reaches_every_registered_member_once() {
    let f = fixture();
    f.store.add_group(GroupInfo {
        uuid: "G1".into(),
        name: "crew".into(),
        owner_id: "U1".into(),
        avatar: String::new(),
        members: vec!["U1".into(), "U2".into(), "U3".into()],
    });
    let u1 = login(&f, "U1");
    let u2 = login(&f, "U2");
    let outsider = login(&f, "U4");

    let delivery = f.fanout.process(&text("U1", "G1", "standup")).await.unwrap();
    assert_eq!(
        delivery,
        Delivery::Group {
            delivered: 2,
            members: 3
        }
    );

    u1.wait_for(2).await;
    u2.wait_for(2).await;
    common::settle().await;
    assert_eq!(u1.messages().len(), 1);
    assert_eq!(u2.messages().len(), 1);
    assert!(outsider.messages().is_empty());
}

#[tokio::test]
async fn cache_is_extended_on_hit_and_left_alone_on_miss() {
    let f = fixture();
    login(&f, "U1");
    login(&f, "U2");

    // Miss: nothing is written.
    f.fanout.process(&text("U1", "U2", "first")).await.unwrap();
    assert!(!f.cache.contains(&pair_key("U1", "U2")));

    // Seed the list, then the next message is appended under the canonical key.
    f.cache
        .set_ex(
            &pair_key("U2", "U1"),
            Bytes::from_static(b"[]"),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    f.fanout.process(&text("U2", "U1", "second")).await.unwrap();

    let raw = f.cache.get(&pair_key("U1", "U2")).await.unwrap().unwrap();
    let cached: Vec<MessageResponse> = serde_json::from_slice(&raw).unwrap();
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].content, "second");
    // Expiry refreshed to the configured TTL.
    assert!(f.cache.ttl(&pair_key("U1", "U2")).unwrap() > Duration::from_secs(30));
    assert!(!f.cache.contains(&group_key("G1")));
}

#[tokio::test]
async fn call_signals_go_to_callee_only_and_only_handshakes_are_stored() {
    let f = fixture();
    let caller = login(&f, "U1");
    let callee = login(&f, "U2");

    let start = f.fanout.process(&call("U1", "U2", "PROXY", "start_call")).await.unwrap();
    assert_eq!(
        start,
        Delivery::Call {
            delivered: true,
            persisted: true
        }
    );
    let ice = f.fanout.process(&call("U1", "U2", "PROXY", "candidate")).await.unwrap();
    assert_eq!(
        ice,
        Delivery::Call {
            delivered: true,
            persisted: false
        }
    );
    assert_eq!(f.store.messages().len(), 1);

    callee.wait_for(3).await;
    common::settle().await;
    let frames = callee.json();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0]["type"], 3);
    assert!(frames[0]["av_data"].as_str().unwrap().contains("start_call"));
    // No echo to the caller: only the welcome notice.
    assert_eq!(caller.frames().len(), 1);
}

#[tokio::test]
async fn malformed_envelopes_are_rejected() {
    let f = fixture();
    assert!(matches!(
        f.fanout.process(b"not json").await,
        Err(ChatError::Codec(_))
    ));
    assert!(matches!(
        f.fanout.process(&text("U1", "X2", "nowhere")).await,
        Err(ChatError::InvalidEnvelope(_))
    ));
    assert!(f.store.messages().is_empty());
}
