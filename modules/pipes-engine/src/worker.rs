//! Envelope → sink update.
//!
//! Each (source, sink) pair carries an applied record: the last source
//! version folded into the sink and the snapshot that version contributed.
//! An envelope is applied only if its version is strictly newer, and it
//! moves the sink to the state that version describes: the previously held
//! contribution is withdrawn, then the new snapshot is added if present.
//! Redelivery and reordering therefore converge on the latest version.

use pipes_store::{AppliedRecord, IdRef, ObjectStore, SinkCommit, StoreError};
use tracing::debug;

use crate::codec::EnvelopeCodec;
use crate::envelope::Envelope;
use crate::error::{PipesError, Result};
use crate::registry::PipeRegistry;

pub const DEFAULT_COMMIT_ATTEMPTS: u32 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The envelope changed the sink (or recorded a removal it had nothing to undo).
    Applied {
        sink: IdRef,
        version: i64,
        present: bool,
    },
    /// This version, or a newer one, was already applied to the sink.
    Duplicate {
        sink: IdRef,
        version: i64,
        applied_version: i64,
    },
}

impl Outcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied { .. })
    }
}

pub struct Worker<S: ObjectStore> {
    registry: PipeRegistry,
    store: S,
    codec: EnvelopeCodec,
    commit_attempts: u32,
}

impl<S: ObjectStore> Worker<S> {
    pub fn new(registry: PipeRegistry, store: S, codec: EnvelopeCodec) -> Self {
        Self {
            registry,
            store,
            codec,
            commit_attempts: DEFAULT_COMMIT_ATTEMPTS,
        }
    }

    /// How many optimistic read-modify-write rounds to try against a busy
    /// sink before giving the envelope back to the queue.
    pub fn with_commit_attempts(mut self, attempts: u32) -> Self {
        self.commit_attempts = attempts.max(1);
        self
    }

    /// Queue delivery callback: decode the payload and apply it.
    pub async fn handle(&self, payload: &serde_json::Value) -> Result<Outcome> {
        let envelope = self.codec.decode(payload)?;
        self.apply(&envelope).await
    }

    #[tracing::instrument(
        skip_all,
        fields(pipe = %envelope.pipe, sink = %envelope.sink, version = envelope.version())
    )]
    pub async fn apply(&self, envelope: &Envelope) -> Result<Outcome> {
        let pipe = self.registry.get(&envelope.pipe)?;

        let source_id = pipe.source_id(&envelope.source)?;
        if &source_id != envelope.source_id() {
            return Err(PipesError::Deserialization(format!(
                "marker belongs to {} but snapshot is {source_id}",
                envelope.source_id()
            )));
        }

        let sink_write = |cause: StoreError| PipesError::SinkWrite {
            sink: envelope.sink.clone(),
            cause,
        };

        for attempt in 1..=self.commit_attempts {
            let state = self
                .store
                .load_sink(&envelope.sink, &source_id)
                .await
                .map_err(sink_write)?;

            let applied_version = state.applied_version();
            if envelope.version() <= applied_version {
                debug!(applied_version, "Envelope already applied, skipping");
                return Ok(Outcome::Duplicate {
                    sink: envelope.sink.clone(),
                    version: envelope.version(),
                    applied_version,
                });
            }

            let held = state.applied.and_then(|a| a.contribution);
            let mut body = match state.body {
                Some(body) => body,
                None => pipe.empty_sink()?,
            };

            if let Some(previous) = &held {
                body = pipe.reflux(previous, body)?;
            }
            let contribution = if envelope.present {
                body = pipe.flux(&envelope.source, body)?;
                Some(envelope.source.clone())
            } else {
                None
            };

            let commit = SinkCommit {
                sink_id: envelope.sink.clone(),
                expected_revision: state.revision,
                body,
                applied: AppliedRecord {
                    sink_id: envelope.sink.clone(),
                    source_id: source_id.clone(),
                    version: envelope.version(),
                    contribution,
                },
            };

            match self.store.commit_sink(commit).await {
                Ok(()) => {
                    debug!(attempt, present = envelope.present, "Applied envelope");
                    return Ok(Outcome::Applied {
                        sink: envelope.sink.clone(),
                        version: envelope.version(),
                        present: envelope.present,
                    });
                }
                Err(e) if e.is_conflict() => {
                    debug!(attempt, "Sink moved underneath us, re-reading");
                    continue;
                }
                Err(cause) => return Err(sink_write(cause)),
            }
        }

        Err(sink_write(StoreError::Conflict(envelope.sink.uri())))
    }
}
