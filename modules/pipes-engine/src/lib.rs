//! Pipes: keep derived aggregate objects in step with their sources.
//!
//! Domain code declares a [`Pipe`] from a source type to a sink type and
//! calls [`Dispatcher::propagate_add`] / [`Dispatcher::propagate_remove`]
//! after each source write. The dispatcher advances the source's change
//! marker and queues one envelope per affected sink. [`Worker`]s (usually
//! inside a [`WorkerPool`]) apply the envelopes with `flux` / `reflux`,
//! tolerating duplicate and out-of-order delivery.

pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod marker;
pub mod pool;
pub mod rebuild;
pub mod registry;
pub mod traits;
pub mod worker;

pub use codec::EnvelopeCodec;
pub use config::PipesConfig;
pub use dispatcher::{DispatchReport, Dispatcher};
pub use envelope::Envelope;
pub use error::{PipesError, Result};
pub use marker::{marker_id, MarkerService};
pub use pool::{DrainStats, PoolSettings, TaskResult, WorkerPool};
pub use rebuild::{RebuildReport, Rebuilder};
pub use registry::{ErasedPipe, PipeRegistry};
pub use traits::{Entity, Pipe};
pub use worker::{Outcome, Worker};
