//! Shared test domain: a counter pipe, a tag fan-out pipe, and store/queue
//! wrappers that fail on demand.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pipes_engine::{Dispatcher, Entity, EnvelopeCodec, Pipe, PipeRegistry, Worker};
use pipes_store::{
    AppliedRecord, IdRef, MemoryStore, MemoryTaskQueue, ObjectStore, QueuedTask, SinkCommit,
    SinkState, SourceMarker, StoreError, TaskId, TaskQueue,
};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Counter domain
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipedObject {
    pub id: i64,
    pub group: Option<String>,
    pub counter_id: Option<i64>,
}

impl PipedObject {
    pub fn new(id: i64, group: &str) -> Self {
        Self {
            id,
            group: Some(group.to_string()),
            counter_id: None,
        }
    }

    pub fn in_counter(mut self, counter_id: i64) -> Self {
        self.counter_id = Some(counter_id);
        self
    }
}

impl Entity for PipedObject {
    fn id_ref(&self) -> IdRef {
        IdRef::new("piped_objects", self.id)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipedObjectCounter {
    pub count: i64,
    pub count_group_a: i64,
    pub count_group_b: i64,
}

impl PipedObjectCounter {
    pub fn of(count: i64, count_group_a: i64, count_group_b: i64) -> Self {
        Self {
            count,
            count_group_a,
            count_group_b,
        }
    }
}

pub struct CounterPipe;

impl CounterPipe {
    fn delta(source: &PipedObject, sink: &mut PipedObjectCounter, by: i64) {
        sink.count += by;
        match source.group.as_deref() {
            Some("group-a") => sink.count_group_a += by,
            Some("group-b") => sink.count_group_b += by,
            _ => {}
        }
    }
}

impl Pipe for CounterPipe {
    type Source = PipedObject;
    type Sink = PipedObjectCounter;

    fn name(&self) -> &'static str {
        "counter"
    }

    fn configure(&self, source: &PipedObject) -> BTreeSet<IdRef> {
        BTreeSet::from([counter_id(source.counter_id.unwrap_or(1))])
    }

    fn clear(&self, sink: &mut PipedObjectCounter) {
        *sink = PipedObjectCounter::default();
    }

    fn flux(&self, source: &PipedObject, sink: &mut PipedObjectCounter) {
        Self::delta(source, sink, 1);
    }

    fn reflux(&self, source: &PipedObject, sink: &mut PipedObjectCounter) {
        Self::delta(source, sink, -1);
    }
}

pub fn counter_id(id: i64) -> IdRef {
    IdRef::new("piped_object_counters", id)
}

// ---------------------------------------------------------------------------
// Tag fan-out domain: one article feeds one sink per tag
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub tags: Vec<String>,
    pub words: i64,
}

impl Entity for Article {
    fn id_ref(&self) -> IdRef {
        IdRef::new("articles", self.id)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagStats {
    pub articles: i64,
    pub words: i64,
}

pub struct TagStatsPipe;

impl Pipe for TagStatsPipe {
    type Source = Article;
    type Sink = TagStats;

    fn name(&self) -> &'static str {
        "tag_stats"
    }

    fn configure(&self, source: &Article) -> BTreeSet<IdRef> {
        source.tags.iter().map(|tag| tag_id(tag)).collect()
    }

    fn clear(&self, sink: &mut TagStats) {
        *sink = TagStats::default();
    }

    fn flux(&self, source: &Article, sink: &mut TagStats) {
        sink.articles += 1;
        sink.words += source.words;
    }

    fn reflux(&self, source: &Article, sink: &mut TagStats) {
        sink.articles -= 1;
        sink.words -= source.words;
    }
}

pub fn tag_id(tag: &str) -> IdRef {
    IdRef::new("tag_stats", tag)
}

pub fn registry() -> PipeRegistry {
    PipeRegistry::builder()
        .register(CounterPipe)
        .register(TagStatsPipe)
        .build()
        .expect("test pipes have distinct names")
}

// ---------------------------------------------------------------------------
// Harness over the in-memory store and queue
// ---------------------------------------------------------------------------

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub queue: Arc<MemoryTaskQueue>,
    pub dispatcher: Dispatcher<Arc<MemoryStore>, Arc<MemoryTaskQueue>>,
    pub worker: Worker<Arc<MemoryStore>>,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryTaskQueue::new());
        let codec = EnvelopeCodec::new();
        let dispatcher = Dispatcher::new(registry(), store.clone(), queue.clone(), codec.clone());
        let worker = Worker::new(registry(), store.clone(), codec);
        Self {
            store,
            queue,
            dispatcher,
            worker,
        }
    }

    /// Payloads queued since the last call, in enqueue order. Leaves the
    /// queue empty so each call sees only new envelopes.
    pub async fn take_payloads(&self) -> Vec<serde_json::Value> {
        let tasks = self
            .queue
            .reserve(usize::MAX, Duration::from_secs(60))
            .await
            .unwrap();
        for task in &tasks {
            self.queue.complete(task.id).await.unwrap();
        }
        tasks.into_iter().map(|t| t.payload).collect()
    }

    pub async fn counter(&self, id: i64) -> PipedObjectCounter {
        read_sink(&*self.store, &counter_id(id)).await
    }

    pub async fn tag(&self, tag: &str) -> TagStats {
        read_sink(&*self.store, &tag_id(tag)).await
    }
}

pub async fn read_sink<T: Default + serde::de::DeserializeOwned>(
    store: &impl ObjectStore,
    id: &IdRef,
) -> T {
    match store.get(id).await.unwrap() {
        Some(body) => serde_json::from_value(body).unwrap(),
        None => T::default(),
    }
}

// ---------------------------------------------------------------------------
// Failure injection
// ---------------------------------------------------------------------------

/// What an unreachable database looks like to callers.
pub fn outage() -> StoreError {
    StoreError::Database(sqlx::Error::PoolTimedOut)
}

/// Delegates to a MemoryStore, failing marker writes or sink commits on demand.
pub struct FlakyStore {
    pub inner: Arc<MemoryStore>,
    pub fail_markers: AtomicBool,
    pub failing_commits: AtomicUsize,
    pub conflicting_commits: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            fail_markers: AtomicBool::new(false),
            failing_commits: AtomicUsize::new(0),
            conflicting_commits: AtomicUsize::new(0),
        }
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn get(&self, id: &IdRef) -> pipes_store::Result<Option<serde_json::Value>> {
        self.inner.get(id).await
    }

    async fn put(&self, id: &IdRef, body: serde_json::Value) -> pipes_store::Result<()> {
        self.inner.put(id, body).await
    }

    async fn delete(&self, id: &IdRef) -> pipes_store::Result<bool> {
        self.inner.delete(id).await
    }

    async fn advance_marker(
        &self,
        marker_id: &IdRef,
        parent_id: &IdRef,
    ) -> pipes_store::Result<SourceMarker> {
        if self.fail_markers.load(Ordering::SeqCst) {
            return Err(outage());
        }
        self.inner.advance_marker(marker_id, parent_id).await
    }

    async fn read_marker(&self, marker_id: &IdRef) -> pipes_store::Result<Option<SourceMarker>> {
        self.inner.read_marker(marker_id).await
    }

    async fn load_sink(
        &self,
        sink_id: &IdRef,
        source_id: &IdRef,
    ) -> pipes_store::Result<SinkState> {
        self.inner.load_sink(sink_id, source_id).await
    }

    async fn commit_sink(&self, commit: SinkCommit) -> pipes_store::Result<()> {
        if Self::take(&self.failing_commits) {
            return Err(outage());
        }
        if Self::take(&self.conflicting_commits) {
            return Err(StoreError::Conflict(commit.sink_id.uri()));
        }
        self.inner.commit_sink(commit).await
    }

    async fn replace_sink(
        &self,
        sink_id: &IdRef,
        body: serde_json::Value,
        ledger: Vec<AppliedRecord>,
    ) -> pipes_store::Result<()> {
        self.inner.replace_sink(sink_id, body, ledger).await
    }
}

/// Delegates to a MemoryTaskQueue, failing the enqueue calls listed in
/// `fail_calls` (1-based).
pub struct FlakyQueue {
    pub inner: Arc<MemoryTaskQueue>,
    pub fail_calls: Vec<usize>,
    calls: AtomicUsize,
}

impl FlakyQueue {
    pub fn new(inner: Arc<MemoryTaskQueue>, fail_calls: Vec<usize>) -> Self {
        Self {
            inner,
            fail_calls,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TaskQueue for FlakyQueue {
    async fn enqueue(&self, payload: serde_json::Value) -> pipes_store::Result<TaskId> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_calls.contains(&call) {
            return Err(outage());
        }
        self.inner.enqueue(payload).await
    }

    async fn reserve(&self, limit: usize, lease: Duration) -> pipes_store::Result<Vec<QueuedTask>> {
        self.inner.reserve(limit, lease).await
    }

    async fn complete(&self, id: TaskId) -> pipes_store::Result<()> {
        self.inner.complete(id).await
    }

    async fn retry(&self, id: TaskId, delay: Duration, error: &str) -> pipes_store::Result<()> {
        self.inner.retry(id, delay, error).await
    }

    async fn dead_letter(&self, id: TaskId, error: &str) -> pipes_store::Result<()> {
        self.inner.dead_letter(id, error).await
    }

    async fn pending(&self) -> pipes_store::Result<usize> {
        self.inner.pending().await
    }

    async fn dead_letters(&self) -> pipes_store::Result<Vec<QueuedTask>> {
        self.inner.dead_letters().await
    }
}
