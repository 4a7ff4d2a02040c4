//! Core record types for the pipes store. Domain-agnostic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::IdRef;

/// Queue-assigned task identifier.
pub type TaskId = i64;

/// Per-source change counter. One row per source object, keyed by a child
/// key derived from the source key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMarker {
    pub id: IdRef,
    pub parent_id: IdRef,
    pub version: i64,
}

/// The last change of one source that has been applied to one sink.
///
/// `contribution` is the source snapshot currently folded into the sink, or
/// `None` when the last applied change removed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedRecord {
    pub sink_id: IdRef,
    pub source_id: IdRef,
    pub version: i64,
    pub contribution: Option<serde_json::Value>,
}

/// Everything a worker needs to decide on and apply one envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkState {
    pub sink_id: IdRef,
    /// Current sink body, `None` if the sink has never been written.
    pub body: Option<serde_json::Value>,
    /// Optimistic concurrency token. 0 when the sink does not exist yet.
    pub revision: i64,
    pub applied: Option<AppliedRecord>,
}

impl SinkState {
    /// Version of the source last applied to this sink, 0 if never.
    pub fn applied_version(&self) -> i64 {
        self.applied.as_ref().map(|a| a.version).unwrap_or(0)
    }
}

/// Sink body plus applied record, written together or not at all.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkCommit {
    pub sink_id: IdRef,
    /// Revision the body was computed from. The write fails with
    /// `StoreError::Conflict` if the stored revision has moved on.
    pub expected_revision: i64,
    pub body: serde_json::Value,
    pub applied: AppliedRecord,
}

/// A unit of work handed out by a `TaskQueue`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedTask {
    pub id: TaskId,
    pub payload: serde_json::Value,
    /// Number of times the task has been reserved, including this one.
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}
