//! In-memory store and queue for tests. No database required.
//!
//! Same atomicity as the Postgres implementations: every trait call holds
//! one mutex for its whole read-modify-write.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{Result, StoreError};
use crate::id::IdRef;
use crate::traits::{ObjectStore, TaskQueue};
use crate::types::{AppliedRecord, QueuedTask, SinkCommit, SinkState, SourceMarker, TaskId};

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreState {
    objects: HashMap<IdRef, (serde_json::Value, i64)>,
    markers: HashMap<IdRef, SourceMarker>,
    applied: HashMap<(IdRef, IdRef), AppliedRecord>,
}

/// In-memory object store. Thread-safe.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current revision of an object, 0 if absent (for test assertions).
    pub fn revision(&self, id: &IdRef) -> i64 {
        let state = self.state.lock().unwrap();
        state.objects.get(id).map(|(_, rev)| *rev).unwrap_or(0)
    }

    /// Every applied record for a sink, ordered by source key.
    pub fn ledger(&self, sink_id: &IdRef) -> Vec<AppliedRecord> {
        let state = self.state.lock().unwrap();
        let mut records: Vec<AppliedRecord> = state
            .applied
            .values()
            .filter(|r| &r.sink_id == sink_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        records
    }

    pub fn marker_count(&self) -> usize {
        self.state.lock().unwrap().markers.len()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, id: &IdRef) -> Result<Option<serde_json::Value>> {
        let state = self.state.lock().unwrap();
        Ok(state.objects.get(id).map(|(body, _)| body.clone()))
    }

    async fn put(&self, id: &IdRef, body: serde_json::Value) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let revision = state.objects.get(id).map(|(_, rev)| *rev).unwrap_or(0) + 1;
        state.objects.insert(id.clone(), (body, revision));
        Ok(())
    }

    async fn delete(&self, id: &IdRef) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        Ok(state.objects.remove(id).is_some())
    }

    async fn advance_marker(&self, marker_id: &IdRef, parent_id: &IdRef) -> Result<SourceMarker> {
        let mut state = self.state.lock().unwrap();
        let marker = state
            .markers
            .entry(marker_id.clone())
            .and_modify(|m| m.version += 1)
            .or_insert_with(|| SourceMarker {
                id: marker_id.clone(),
                parent_id: parent_id.clone(),
                version: 1,
            });
        Ok(marker.clone())
    }

    async fn read_marker(&self, marker_id: &IdRef) -> Result<Option<SourceMarker>> {
        let state = self.state.lock().unwrap();
        Ok(state.markers.get(marker_id).cloned())
    }

    async fn load_sink(&self, sink_id: &IdRef, source_id: &IdRef) -> Result<SinkState> {
        let state = self.state.lock().unwrap();
        let (body, revision) = match state.objects.get(sink_id) {
            Some((body, rev)) => (Some(body.clone()), *rev),
            None => (None, 0),
        };
        let applied = state
            .applied
            .get(&(sink_id.clone(), source_id.clone()))
            .cloned();

        Ok(SinkState {
            sink_id: sink_id.clone(),
            body,
            revision,
            applied,
        })
    }

    async fn commit_sink(&self, commit: SinkCommit) -> Result<()> {
        let mut state = self.state.lock().unwrap();

        let current = state
            .objects
            .get(&commit.sink_id)
            .map(|(_, rev)| *rev)
            .unwrap_or(0);
        if current != commit.expected_revision {
            return Err(StoreError::Conflict(commit.sink_id.uri()));
        }

        let key = (commit.sink_id.clone(), commit.applied.source_id.clone());
        if let Some(existing) = state.applied.get(&key) {
            if existing.version >= commit.applied.version {
                return Err(StoreError::Conflict(commit.sink_id.uri()));
            }
        }

        state
            .objects
            .insert(commit.sink_id.clone(), (commit.body, current + 1));
        state.applied.insert(key, commit.applied);
        Ok(())
    }

    async fn replace_sink(
        &self,
        sink_id: &IdRef,
        body: serde_json::Value,
        ledger: Vec<AppliedRecord>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let revision = state.objects.get(sink_id).map(|(_, rev)| *rev).unwrap_or(0) + 1;
        state.objects.insert(sink_id.clone(), (body, revision));
        state.applied.retain(|(sink, _), _| sink != sink_id);
        for record in ledger {
            state
                .applied
                .insert((sink_id.clone(), record.source_id.clone()), record);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryTaskQueue
// ---------------------------------------------------------------------------

struct MemoryTask {
    task: QueuedTask,
    available_at: Instant,
    locked_until: Option<Instant>,
    dead: bool,
}

#[derive(Default)]
struct QueueState {
    next_id: TaskId,
    tasks: BTreeMap<TaskId, MemoryTask>,
}

/// In-memory task queue with lease semantics. Thread-safe.
#[derive(Default)]
pub struct MemoryTaskQueue {
    state: Mutex<QueueState>,
}

impl MemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payloads of every live (not dead-lettered) task, in enqueue order.
    pub fn payloads(&self) -> Vec<serde_json::Value> {
        let state = self.state.lock().unwrap();
        state
            .tasks
            .values()
            .filter(|t| !t.dead)
            .map(|t| t.task.payload.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().tasks.values().filter(|t| !t.dead).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn enqueue(&self, payload: serde_json::Value) -> Result<TaskId> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        state.tasks.insert(
            id,
            MemoryTask {
                task: QueuedTask {
                    id,
                    payload,
                    attempts: 0,
                    last_error: None,
                    created_at: Utc::now(),
                },
                available_at: Instant::now(),
                locked_until: None,
                dead: false,
            },
        );
        Ok(id)
    }

    async fn reserve(&self, limit: usize, lease: Duration) -> Result<Vec<QueuedTask>> {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();
        let mut reserved = Vec::new();

        for entry in state.tasks.values_mut() {
            if reserved.len() >= limit {
                break;
            }
            let leased = entry.locked_until.is_some_and(|until| until > now);
            if entry.dead || leased || entry.available_at > now {
                continue;
            }
            entry.task.attempts += 1;
            entry.locked_until = Some(now + lease);
            reserved.push(entry.task.clone());
        }

        Ok(reserved)
    }

    async fn complete(&self, id: TaskId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .tasks
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::UnknownTask(id))
    }

    async fn retry(&self, id: TaskId, delay: Duration, error: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let entry = state.tasks.get_mut(&id).ok_or(StoreError::UnknownTask(id))?;
        entry.available_at = Instant::now() + delay;
        entry.locked_until = None;
        entry.task.last_error = Some(error.to_string());
        Ok(())
    }

    async fn dead_letter(&self, id: TaskId, error: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let entry = state.tasks.get_mut(&id).ok_or(StoreError::UnknownTask(id))?;
        entry.dead = true;
        entry.locked_until = None;
        entry.task.last_error = Some(error.to_string());
        Ok(())
    }

    async fn pending(&self) -> Result<usize> {
        Ok(self.len())
    }

    async fn dead_letters(&self) -> Result<Vec<QueuedTask>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .tasks
            .values()
            .filter(|t| t.dead)
            .map(|t| t.task.clone())
            .collect())
    }
}
