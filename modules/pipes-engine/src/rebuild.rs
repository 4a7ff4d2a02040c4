//! Out-of-band sink rebuild: `clear` the sink and replay every source.
//!
//! An administrative operation, never triggered by the flux/reflux path.
//! The caller supplies the full set of sources (typically from a query over
//! the source kind); sources that do not configure the sink are ignored.
//! Run it while no envelopes for the sink are in flight, or let them land
//! afterwards: each ledger entry is stamped with the source's current
//! marker version, so older in-flight envelopes are skipped and newer ones
//! apply on top.

use pipes_store::{AppliedRecord, IdRef, ObjectStore};
use tracing::info;

use crate::codec::EnvelopeCodec;
use crate::error::{PipesError, Result};
use crate::marker::MarkerService;
use crate::traits::{Entity, Pipe};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildReport {
    pub sink: IdRef,
    /// Sources folded into the rebuilt sink.
    pub contributors: usize,
    /// Sources supplied but not configured for this sink.
    pub skipped: usize,
}

pub struct Rebuilder<S: ObjectStore> {
    markers: MarkerService<S>,
    codec: EnvelopeCodec,
}

impl<S: ObjectStore> Rebuilder<S> {
    pub fn new(store: S, codec: EnvelopeCodec) -> Self {
        Self {
            markers: MarkerService::new(store),
            codec,
        }
    }

    #[tracing::instrument(skip_all, fields(pipe = pipe.name(), sink = %sink_id))]
    pub async fn rebuild_sink<'a, P, I>(
        &self,
        pipe: &P,
        sink_id: &IdRef,
        sources: I,
    ) -> Result<RebuildReport>
    where
        P: Pipe,
        I: IntoIterator<Item = &'a P::Source>,
        P::Source: 'a,
    {
        let mut sink = P::Sink::default();
        pipe.clear(&mut sink);

        let mut ledger = Vec::new();
        let mut skipped = 0;

        for source in sources {
            if !pipe.configure(source).contains(sink_id) {
                skipped += 1;
                continue;
            }

            let source_id = source.id_ref();
            let version = self
                .markers
                .current(&source_id)
                .await?
                .map(|m| m.version)
                .unwrap_or(0);

            pipe.flux(source, &mut sink);
            ledger.push(AppliedRecord {
                sink_id: sink_id.clone(),
                source_id,
                version,
                contribution: Some(self.codec.snapshot(source)?),
            });
        }

        let body = serde_json::to_value(&sink).map_err(|cause| PipesError::Serialization {
            what: "sink body",
            cause,
        })?;

        let contributors = ledger.len();
        self.markers
            .store()
            .replace_sink(sink_id, body, ledger)
            .await
            .map_err(|cause| PipesError::SinkWrite {
                sink: sink_id.clone(),
                cause,
            })?;

        info!(contributors, skipped, "Rebuilt sink");

        Ok(RebuildReport {
            sink: sink_id.clone(),
            contributors,
            skipped,
        })
    }
}
