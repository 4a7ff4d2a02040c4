//! Generic, domain-agnostic persistence for the pipes engine.
//!
//! Stores opaque JSONB objects keyed by hierarchical [`IdRef`]s, per-source
//! change markers, the per-(sink, source) applied ledger, and the fan-out
//! task queue. Zero knowledge of any pipe, source, or sink type.
//!
//! Production wires in [`PgStore`] / [`PgTaskQueue`]; tests use
//! [`MemoryStore`] / [`MemoryTaskQueue`].

pub mod error;
pub mod id;
pub mod memory;
pub mod queue;
pub mod store;
pub mod traits;
pub mod types;

pub use error::{Result, StoreError};
pub use id::{IdRef, IdRefParseError};
pub use memory::{MemoryStore, MemoryTaskQueue};
pub use queue::PgTaskQueue;
pub use store::PgStore;
pub use traits::{ObjectStore, TaskQueue};
pub use types::{AppliedRecord, QueuedTask, SinkCommit, SinkState, SourceMarker, TaskId};
