mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use pipes_engine::{
    DrainStats, EnvelopeCodec, PipesConfig, PoolSettings, TaskResult, Worker, WorkerPool,
};
use pipes_store::{MemoryStore, MemoryTaskQueue, TaskQueue};
use serde_json::json;
use tokio::sync::watch;

fn settings() -> PoolSettings {
    PoolSettings {
        concurrency: 2,
        poll_interval: Duration::from_millis(10),
        batch_size: 4,
        lease: Duration::from_secs(30),
        max_attempts: 3,
        retry_base: Duration::ZERO,
    }
}

fn pool_over(
    h: &Harness,
    settings: PoolSettings,
) -> WorkerPool<Arc<MemoryStore>, Arc<MemoryTaskQueue>> {
    let worker = Worker::new(registry(), h.store.clone(), EnvelopeCodec::new());
    WorkerPool::new(worker, h.queue.clone(), settings)
}

#[tokio::test]
async fn drain_applies_everything_queued() {
    let h = Harness::new();
    for id in 1..=10 {
        h.dispatcher
            .propagate_add(&CounterPipe, &PipedObject::new(id, "group-a"))
            .await
            .unwrap();
    }
    let pool = pool_over(&h, settings());

    let stats = pool.drain().await.unwrap();

    assert_eq!(
        stats,
        DrainStats {
            applied: 10,
            ..DrainStats::default()
        }
    );
    assert!(h.queue.is_empty());
    assert_eq!(h.counter(1).await, PipedObjectCounter::of(10, 10, 0));
}

#[tokio::test]
async fn tags_containing_slashes_get_their_own_sinks() {
    let h = Harness::new();
    let article = Article {
        id: 1,
        tags: vec!["c/c++".into(), "c".into(), "rust".into()],
        words: 250,
    };
    h.dispatcher
        .propagate_add(&TagStatsPipe, &article)
        .await
        .unwrap();
    let pool = pool_over(&h, settings());

    let stats = pool.drain().await.unwrap();

    assert_eq!(
        stats,
        DrainStats {
            applied: 3,
            ..DrainStats::default()
        }
    );
    let one = TagStats {
        articles: 1,
        words: 250,
    };
    assert_eq!(h.tag("c/c++").await, one);
    assert_eq!(h.tag("c").await, one);
    assert_eq!(h.tag("rust").await, one);

    h.dispatcher
        .propagate_remove(&TagStatsPipe, &article)
        .await
        .unwrap();
    pool.drain().await.unwrap();
    assert_eq!(h.tag("c/c++").await, TagStats::default());
    assert!(h.queue.dead_letters().await.unwrap().is_empty());
}

#[tokio::test]
async fn redelivered_tasks_are_completed_as_duplicates() {
    let h = Harness::new();
    h.dispatcher
        .propagate_add(&CounterPipe, &PipedObject::new(1, "group-b"))
        .await
        .unwrap();
    let payload = h.queue.payloads().remove(0);
    h.queue.enqueue(payload).await.unwrap();
    let pool = pool_over(&h, settings());

    let stats = pool.drain().await.unwrap();

    assert_eq!(stats.applied, 1);
    assert_eq!(stats.duplicates, 1);
    assert_eq!(h.counter(1).await, PipedObjectCounter::of(1, 0, 1));
}

#[tokio::test]
async fn malformed_payload_is_dead_lettered_on_first_sight() {
    let h = Harness::new();
    let id = h.queue.enqueue(json!({"format": 1, "garbage": true})).await.unwrap();
    let pool = pool_over(&h, settings());

    let stats = pool.drain().await.unwrap();

    assert_eq!(stats.dead_lettered, 1);
    let dead = h.queue.dead_letters().await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id, id);
    assert_eq!(dead[0].attempts, 1);
    assert!(dead[0].last_error.as_deref().unwrap().contains("malformed"));
}

#[tokio::test]
async fn transient_failure_is_retried_then_applied() {
    let h = Harness::new();
    h.dispatcher
        .propagate_add(&CounterPipe, &PipedObject::new(1, "group-a"))
        .await
        .unwrap();

    let store = Arc::new(FlakyStore::new(h.store.clone()));
    store.failing_commits.store(1, Ordering::SeqCst);
    let worker = Worker::new(registry(), store, EnvelopeCodec::new());
    let pool = WorkerPool::new(worker, h.queue.clone(), settings());

    let stats = pool.drain().await.unwrap();

    assert_eq!(stats.retried, 1);
    assert_eq!(stats.applied, 1);
    assert!(h.queue.is_empty());
    assert_eq!(h.counter(1).await, PipedObjectCounter::of(1, 1, 0));
}

#[tokio::test]
async fn exhausted_retries_are_dead_lettered() {
    let h = Harness::new();
    h.dispatcher
        .propagate_add(&CounterPipe, &PipedObject::new(1, "group-a"))
        .await
        .unwrap();

    let store = Arc::new(FlakyStore::new(h.store.clone()));
    store.failing_commits.store(usize::MAX, Ordering::SeqCst);
    let worker = Worker::new(registry(), store, EnvelopeCodec::new());
    let pool = WorkerPool::new(worker, h.queue.clone(), settings());

    let stats = pool.drain().await.unwrap();

    assert_eq!(stats.retried, 2);
    assert_eq!(stats.dead_lettered, 1);
    let dead = h.queue.dead_letters().await.unwrap();
    assert_eq!(dead[0].attempts, 3);
    assert_eq!(h.counter(1).await, PipedObjectCounter::default());
}

#[tokio::test]
async fn process_settles_a_single_task() {
    let h = Harness::new();
    h.dispatcher
        .propagate_add(&CounterPipe, &PipedObject::new(1, "group-a"))
        .await
        .unwrap();
    let pool = pool_over(&h, settings());

    let task = h
        .queue
        .reserve(1, Duration::from_secs(30))
        .await
        .unwrap()
        .remove(0);

    assert_eq!(pool.process(task).await.unwrap(), TaskResult::Applied);
    assert_eq!(h.queue.pending().await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn run_processes_until_shutdown() {
    let h = Harness::new();
    let pool = pool_over(&h, settings());
    let (stop, shutdown) = watch::channel(false);

    let running = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.run(shutdown).await })
    };

    for id in 1..=6 {
        let group = if id % 2 == 0 { "group-a" } else { "group-b" };
        h.dispatcher
            .propagate_add(&CounterPipe, &PipedObject::new(id, group))
            .await
            .unwrap();
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !h.queue.is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "queue never drained");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    stop.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("pool did not stop")
        .unwrap()
        .unwrap();

    assert_eq!(h.counter(1).await, PipedObjectCounter::of(6, 3, 3));
}

#[test]
fn settings_follow_config() {
    let config = PipesConfig {
        worker_concurrency: 9,
        batch_size: 32,
        max_attempts: 5,
        ..PipesConfig::default()
    };

    let settings = PoolSettings::from(&config);

    assert_eq!(settings.concurrency, 9);
    assert_eq!(settings.batch_size, 32);
    assert_eq!(settings.max_attempts, 5);
    assert_eq!(settings.lease, config.lease);
}
