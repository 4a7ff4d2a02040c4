//! Store and queue boundaries consumed by the engine.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::id::IdRef;
use crate::types::{AppliedRecord, QueuedTask, SinkCommit, SinkState, SourceMarker, TaskId};

/// Key-value object store with per-key atomic writes.
///
/// Implemented by `PgStore` (postgres) and `MemoryStore` (tests).
/// Also implemented for `Arc<S>` so one store can be shared between the
/// dispatcher, workers, and test assertions.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, id: &IdRef) -> Result<Option<serde_json::Value>>;

    async fn put(&self, id: &IdRef, body: serde_json::Value) -> Result<()>;

    /// Returns true if an object was removed.
    async fn delete(&self, id: &IdRef) -> Result<bool>;

    /// Atomically create the marker at version 1, or bump it by exactly 1.
    async fn advance_marker(&self, marker_id: &IdRef, parent_id: &IdRef) -> Result<SourceMarker>;

    async fn read_marker(&self, marker_id: &IdRef) -> Result<Option<SourceMarker>>;

    /// Read a sink body, its revision, and the applied record for one source.
    async fn load_sink(&self, sink_id: &IdRef, source_id: &IdRef) -> Result<SinkState>;

    /// Write the sink body and applied record in one transaction.
    /// Fails with `StoreError::Conflict` if the revision moved.
    async fn commit_sink(&self, commit: SinkCommit) -> Result<()>;

    /// Overwrite a sink and its whole applied ledger in one transaction.
    async fn replace_sink(
        &self,
        sink_id: &IdRef,
        body: serde_json::Value,
        ledger: Vec<AppliedRecord>,
    ) -> Result<()>;
}

/// At-least-once work queue. No ordering guarantee.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, payload: serde_json::Value) -> Result<TaskId>;

    /// Lease up to `limit` available tasks. A leased task that is neither
    /// completed nor retried before `lease` runs out becomes available again.
    async fn reserve(&self, limit: usize, lease: Duration) -> Result<Vec<QueuedTask>>;

    async fn complete(&self, id: TaskId) -> Result<()>;

    /// Release the lease and make the task available again after `delay`.
    async fn retry(&self, id: TaskId, delay: Duration, error: &str) -> Result<()>;

    /// Park the task permanently. It is never reserved again.
    async fn dead_letter(&self, id: TaskId, error: &str) -> Result<()>;

    /// Tasks not yet completed or dead-lettered, leased ones included.
    async fn pending(&self) -> Result<usize>;

    async fn dead_letters(&self) -> Result<Vec<QueuedTask>>;
}

// ---------------------------------------------------------------------------
// Arc<T> blankets so tests can share the store/queue for assertions
// ---------------------------------------------------------------------------

#[async_trait]
impl<S: ObjectStore + ?Sized> ObjectStore for Arc<S> {
    async fn get(&self, id: &IdRef) -> Result<Option<serde_json::Value>> {
        (**self).get(id).await
    }

    async fn put(&self, id: &IdRef, body: serde_json::Value) -> Result<()> {
        (**self).put(id, body).await
    }

    async fn delete(&self, id: &IdRef) -> Result<bool> {
        (**self).delete(id).await
    }

    async fn advance_marker(&self, marker_id: &IdRef, parent_id: &IdRef) -> Result<SourceMarker> {
        (**self).advance_marker(marker_id, parent_id).await
    }

    async fn read_marker(&self, marker_id: &IdRef) -> Result<Option<SourceMarker>> {
        (**self).read_marker(marker_id).await
    }

    async fn load_sink(&self, sink_id: &IdRef, source_id: &IdRef) -> Result<SinkState> {
        (**self).load_sink(sink_id, source_id).await
    }

    async fn commit_sink(&self, commit: SinkCommit) -> Result<()> {
        (**self).commit_sink(commit).await
    }

    async fn replace_sink(
        &self,
        sink_id: &IdRef,
        body: serde_json::Value,
        ledger: Vec<AppliedRecord>,
    ) -> Result<()> {
        (**self).replace_sink(sink_id, body, ledger).await
    }
}

#[async_trait]
impl<Q: TaskQueue + ?Sized> TaskQueue for Arc<Q> {
    async fn enqueue(&self, payload: serde_json::Value) -> Result<TaskId> {
        (**self).enqueue(payload).await
    }

    async fn reserve(&self, limit: usize, lease: Duration) -> Result<Vec<QueuedTask>> {
        (**self).reserve(limit, lease).await
    }

    async fn complete(&self, id: TaskId) -> Result<()> {
        (**self).complete(id).await
    }

    async fn retry(&self, id: TaskId, delay: Duration, error: &str) -> Result<()> {
        (**self).retry(id, delay, error).await
    }

    async fn dead_letter(&self, id: TaskId, error: &str) -> Result<()> {
        (**self).dead_letter(id, error).await
    }

    async fn pending(&self) -> Result<usize> {
        (**self).pending().await
    }

    async fn dead_letters(&self) -> Result<Vec<QueuedTask>> {
        (**self).dead_letters().await
    }
}
