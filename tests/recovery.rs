//! Startup recovery: refcount rebuild, the queue_init fast path, and
//! lock-contended opens.

mod common;

use std::time::{Duration, Instant};

use common::{config_at, message, subscriber, test_config};
use magnetite::{FindMode, MessageStore, MsgRef, StoreError};
use tempfile::TempDir;

#[tokio::test(flavor = "multi_thread")]
async fn restart_preloads_queue_init() {
    let dir = TempDir::new().unwrap();
    let sub = subscriber("restarter");
    let refs: Vec<MsgRef> = (0u8..8).map(|i| MsgRef::new(vec![b'p', i])).collect();

    let store = MessageStore::open(config_at(dir.path(), 4)).await.unwrap();
    for msg_ref in &refs {
        store.write(&sub, &message(msg_ref, b"payload")).await.unwrap();
    }
    store.close();

    let store = MessageStore::open(config_at(dir.path(), 4)).await.unwrap();

    // refcounts were rebuilt from disk
    for msg_ref in &refs {
        assert_eq!(store.refcount(msg_ref).await.unwrap(), 1);
    }
    let stats = store.stats().await.unwrap();
    assert_eq!(
        stats.buckets.iter().map(|b| b.total_references).sum::<u64>(),
        refs.len() as u64
    );

    // first reconnect drains what recovery staged, in write order
    let found = store.find(&sub, FindMode::QueueInit).await.unwrap();
    assert_eq!(found, refs);

    // second queue_init finds the init staging empty and falls back to a
    // full fan-out, which must agree with a plain find
    let second = store.find(&sub, FindMode::QueueInit).await.unwrap();
    let plain = store.find(&sub, FindMode::Other).await.unwrap();
    assert_eq!(second, refs);
    assert_eq!(plain, refs);
}

#[tokio::test(flavor = "multi_thread")]
async fn recovered_messages_read_back_whole() {
    let dir = TempDir::new().unwrap();
    let sub = subscriber("durable");
    let msg_ref = MsgRef::new(b"durable-ref".to_vec());

    let store = MessageStore::open(config_at(dir.path(), 2)).await.unwrap();
    let mut msg = message(&msg_ref, b"survives restarts");
    msg.dup = true;
    msg.qos = 2;
    store.write(&sub, &msg).await.unwrap();
    store.close();

    let store = MessageStore::open(config_at(dir.path(), 2)).await.unwrap();
    let restored = store.read(&sub, &msg_ref).await.unwrap();
    assert!(restored.persisted);
    assert_eq!(restored.dup, msg.dup);
    assert_eq!(restored.qos, msg.qos);
    assert_eq!(restored.routing_key, msg.routing_key);
    assert_eq!(restored.payload, msg.payload);
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_recovery_stages_nothing() {
    let (_dir, cfg) = test_config(3);
    let store = MessageStore::open(cfg).await.unwrap();
    let stats = store.stats().await.unwrap();
    assert_eq!(stats.staged_entries, 0);
    assert!(stats.buckets.iter().all(|b| b.refcount_rows == 0));
}

#[tokio::test(flavor = "multi_thread")]
async fn deleted_refs_do_not_resurface_after_restart() {
    let dir = TempDir::new().unwrap();
    let sub = subscriber("acker");
    let kept = MsgRef::new(b"kept".to_vec());
    let acked = MsgRef::new(b"acked".to_vec());

    let store = MessageStore::open(config_at(dir.path(), 2)).await.unwrap();
    store.write(&sub, &message(&kept, b"k")).await.unwrap();
    store.write(&sub, &message(&acked, b"a")).await.unwrap();
    store.delete(&sub, &acked).await.unwrap();
    store.close();

    let store = MessageStore::open(config_at(dir.path(), 2)).await.unwrap();
    assert_eq!(
        store.find(&sub, FindMode::QueueInit).await.unwrap(),
        vec![kept.clone()]
    );
    assert_eq!(store.refcount(&acked).await.unwrap(), 0);
    assert_eq!(store.refcount(&kept).await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn open_retries_until_lock_holder_leaves() {
    let dir = TempDir::new().unwrap();
    let mut holder_cfg = config_at(dir.path(), 1);
    holder_cfg.open_retries = 1;
    let holder = MessageStore::open(holder_cfg).await.unwrap();

    let mut waiter_cfg = config_at(dir.path(), 1);
    waiter_cfg.open_retries = 100;
    waiter_cfg.open_retry_delay_ms = 20;
    let waiter = tokio::spawn(MessageStore::open(waiter_cfg));

    tokio::time::sleep(Duration::from_millis(150)).await;
    holder.close();

    let started = Instant::now();
    let store = waiter.await.unwrap().expect("waiter opens after lock release");
    assert!(started.elapsed() < Duration::from_secs(5));
    store.close();
}

#[tokio::test(flavor = "multi_thread")]
async fn open_fails_once_retries_are_exhausted() {
    let dir = TempDir::new().unwrap();
    let mut holder_cfg = config_at(dir.path(), 1);
    holder_cfg.open_retries = 1;
    let _holder = MessageStore::open(holder_cfg).await.unwrap();

    let mut contender_cfg = config_at(dir.path(), 1);
    contender_cfg.open_retries = 2;
    contender_cfg.open_retry_delay_ms = 10;
    let err = MessageStore::open(contender_cfg).await.unwrap_err();
    match err {
        StoreError::Backend(backend) => assert!(backend.is_lock_contention()),
        other => panic!("expected lock contention, got {other}"),
    }
}
