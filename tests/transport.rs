#[path = "common.rs"]
mod common;

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

use hybridchat::adapters::{DurableLog, LogStream, MemoryLog};
use hybridchat::config::{BrokerConfig, MessageMode};
use hybridchat::core::load_monitor::LoadSignal;
use hybridchat::core::queue::LocalQueue;
use hybridchat::core::transport::{Route, TransportMode, TransportSwitch};
use hybridchat::ChatError;

fn switch(policy: MessageMode, capacity: usize) -> (Arc<TransportSwitch>, Arc<MemoryLog>) {
    common::init_logging();
    let log = Arc::new(MemoryLog::new());
    let transport = Arc::new(TransportSwitch::new(
        policy,
        LocalQueue::new(capacity),
        log.clone(),
        &BrokerConfig::default(),
        Duration::from_millis(200),
    ));
    (transport, log)
}

fn item(n: usize) -> Bytes {
    Bytes::from(format!("envelope-{n}"))
}

#[tokio::test]
async fn queue_mode_enqueues_and_drops_when_full() {
    let (t, log) = switch(MessageMode::Hybrid, 2);
    assert_eq!(t.mode(), TransportMode::Queue);

    assert_eq!(t.send(item(1)).await.unwrap(), Route::Queue);
    assert_eq!(t.send(item(2)).await.unwrap(), Route::Queue);
    assert!(matches!(t.send(item(3)).await, Err(ChatError::QueueFull)));

    let stats = t.stats();
    assert_eq!(stats.queued, 2);
    assert_eq!(stats.dropped, 1);
    assert!(log.records("chat_message").is_empty());
}

#[tokio::test]
async fn switching_to_broker_drains_backlog_in_order() {
    let (t, log) = switch(MessageMode::Hybrid, 10);
    for n in 0..4 {
        t.send(item(n)).await.unwrap();
    }

    let drain = t.switch_to_broker().expect("switch happens");
    assert_eq!(drain.await.unwrap(), 4);
    assert!(t.switch_to_broker().is_none(), "second switch is a no-op");
    assert_eq!(t.mode(), TransportMode::Broker);
    assert!(t.queue().is_empty());

    assert_eq!(t.send(item(4)).await.unwrap(), Route::Broker);
    let values: Vec<Bytes> = log
        .records("chat_message")
        .into_iter()
        .map(|r| r.value)
        .collect();
    assert_eq!(values, (0..5).map(item).collect::<Vec<_>>());
    assert_eq!(t.stats().drained, 4);
    assert_eq!(t.stats().published, 1);
}

#[tokio::test]
async fn broker_failure_falls_back_to_local_queue() {
    let (t, log) = switch(MessageMode::Broker, 10);
    assert_eq!(t.mode(), TransportMode::Broker);
    log.set_available(false);

    assert_eq!(t.send(item(1)).await.unwrap(), Route::Fallback);
    assert_eq!(t.queue().len(), 1);
    assert_eq!(t.stats().fallbacks, 1);

    log.set_available(true);
    assert_eq!(t.send(item(2)).await.unwrap(), Route::Broker);
}

#[tokio::test]
async fn failed_drain_requeues_and_stops() {
    let (t, log) = switch(MessageMode::Hybrid, 10);
    for n in 0..3 {
        t.send(item(n)).await.unwrap();
    }
    log.set_available(false);

    let drain = t.switch_to_broker().unwrap();
    assert_eq!(drain.await.unwrap(), 0);
    // The failed item went to the back; nothing was lost.
    assert_eq!(t.queue().len(), 3);
    assert_eq!(t.stats().lost, 0);
    assert_eq!(t.queue().try_pop().unwrap(), item(1));
}

/// Broker that lets local traffic refill the queue and then refuses the publish.
#[derive(Debug)]
struct RefillingLog {
    queue: LocalQueue,
}

#[async_trait]
impl DurableLog for RefillingLog {
    async fn publish(&self, topic: &str, _key: &[u8], _value: Bytes) -> hybridchat::Result<()> {
        while self.queue.try_push(Bytes::from_static(b"late arrival")).is_ok() {}
        Err(ChatError::publish(topic, "broker unavailable"))
    }

    async fn consume(&self, topic: &str, _group: &str) -> hybridchat::Result<LogStream> {
        Err(ChatError::Consume {
            topic: topic.to_string(),
            reason: "not supported".into(),
        })
    }

    async fn close(&self) -> hybridchat::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn failed_drain_into_a_full_queue_counts_the_item_lost() {
    common::init_logging();
    let queue = LocalQueue::new(3);
    let t = Arc::new(TransportSwitch::new(
        MessageMode::Hybrid,
        queue.clone(),
        Arc::new(RefillingLog {
            queue: queue.clone(),
        }),
        &BrokerConfig::default(),
        Duration::from_millis(200),
    ));
    for n in 0..3 {
        t.send(item(n)).await.unwrap();
    }

    let drain = t.switch_to_broker().unwrap();
    assert_eq!(drain.await.unwrap(), 0);
    assert_eq!(t.stats().lost, 1);
    assert_eq!(t.stats().drained, 0);
    assert_eq!(t.queue().len(), t.queue().capacity());
    // The popped item is the one that went missing.
    assert_eq!(t.queue().try_pop().unwrap(), item(1));
}

#[tokio::test]
async fn policies_pin_the_mode() {
    let (channel, _) = switch(MessageMode::Channel, 4);
    assert_eq!(channel.apply(LoadSignal::Sustained).map(|(m, _)| m), None);
    assert_eq!(channel.mode(), TransportMode::Queue);

    let (broker, _) = switch(MessageMode::Broker, 4);
    assert_eq!(broker.apply(LoadSignal::Recovered).map(|(m, _)| m), None);
    assert_eq!(broker.mode(), TransportMode::Broker);

    let (hybrid, _) = switch(MessageMode::Hybrid, 4);
    assert_eq!(
        hybrid.apply(LoadSignal::Sustained).map(|(m, _)| m),
        Some(TransportMode::Broker)
    );
    assert_eq!(hybrid.apply(LoadSignal::Sustained).map(|(m, _)| m), None);
    assert_eq!(
        hybrid.apply(LoadSignal::Recovered).map(|(m, _)| m),
        Some(TransportMode::Queue)
    );
    assert_eq!(hybrid.apply(LoadSignal::Recovered).map(|(m, _)| m), None);
}

#[tokio::test]
async fn published_records_are_consumable_by_the_chat_group() {
    use futures::StreamExt;

    let (t, log) = switch(MessageMode::Broker, 4);
    t.send(item(7)).await.unwrap();
    let mut records = log.consume("chat_message", "chat").await.unwrap();
    let record = records.next().await.unwrap().unwrap();
    assert_eq!(record.value, item(7));
    assert_eq!(record.key, "0");
}
