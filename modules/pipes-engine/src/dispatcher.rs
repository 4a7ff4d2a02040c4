//! Source change → one envelope per affected sink.

use pipes_store::{IdRef, ObjectStore, SourceMarker, TaskId, TaskQueue};
use tracing::{info, warn};

use crate::codec::EnvelopeCodec;
use crate::envelope::Envelope;
use crate::error::{PipesError, Result};
use crate::marker::MarkerService;
use crate::registry::PipeRegistry;
use crate::traits::{Entity, Pipe};

/// What one dispatch did. Per-sink enqueue failures land in `failed`; the
/// envelopes in `queued` are unaffected by them.
#[derive(Debug)]
pub struct DispatchReport {
    pub pipe: &'static str,
    pub source_id: IdRef,
    pub marker: SourceMarker,
    pub present: bool,
    pub queued: Vec<(IdRef, TaskId)>,
    pub failed: Vec<PipesError>,
}

impl DispatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn sink_count(&self) -> usize {
        self.queued.len() + self.failed.len()
    }

    /// Turn a partial dispatch into its first per-sink error.
    pub fn into_result(mut self) -> Result<Self> {
        if self.failed.is_empty() {
            Ok(self)
        } else {
            Err(self.failed.remove(0))
        }
    }
}

/// Called by domain code right after a source write completes.
pub struct Dispatcher<S: ObjectStore, Q: TaskQueue> {
    registry: PipeRegistry,
    markers: MarkerService<S>,
    queue: Q,
    codec: EnvelopeCodec,
}

impl<S: ObjectStore, Q: TaskQueue> Dispatcher<S, Q> {
    pub fn new(registry: PipeRegistry, store: S, queue: Q, codec: EnvelopeCodec) -> Self {
        Self {
            registry,
            markers: MarkerService::new(store),
            queue,
            codec,
        }
    }

    /// The source now exists or contributes.
    pub async fn propagate_add<P: Pipe>(
        &self,
        pipe: &P,
        source: &P::Source,
    ) -> Result<DispatchReport> {
        self.propagate(pipe, source, true).await
    }

    /// The source no longer contributes.
    pub async fn propagate_remove<P: Pipe>(
        &self,
        pipe: &P,
        source: &P::Source,
    ) -> Result<DispatchReport> {
        self.propagate(pipe, source, false).await
    }

    /// The source changed from `before` to `after`: withdraw the old
    /// contribution, then add the new one. Sinks that only the old state
    /// configured lose it; sinks the new state configures gain it.
    pub async fn propagate_update<P: Pipe>(
        &self,
        pipe: &P,
        before: &P::Source,
        after: &P::Source,
    ) -> Result<(DispatchReport, DispatchReport)> {
        let removed = self.propagate(pipe, before, false).await?;
        let added = self.propagate(pipe, after, true).await?;
        Ok((removed, added))
    }

    #[tracing::instrument(skip_all, fields(pipe = pipe.name(), present = present))]
    async fn propagate<P: Pipe>(
        &self,
        pipe: &P,
        source: &P::Source,
        present: bool,
    ) -> Result<DispatchReport> {
        let name = pipe.name();
        if !self.registry.contains(name) {
            return Err(PipesError::UnknownPipe(name.to_string()));
        }

        let source_id = source.id_ref();
        source_id.validate()?;
        let snapshot = self.codec.snapshot(source)?;

        // Sink set from dispatch-time state. Checked up front so a key no
        // worker could decode never costs a marker version.
        let sinks = pipe.configure(source);
        for sink in &sinks {
            sink.validate()?;
        }

        // Marker before any envelope: no envelope may reference a version
        // that does not exist yet.
        let marker = self.markers.get_or_create(&source_id).await?;

        let mut report = DispatchReport {
            pipe: name,
            source_id: source_id.clone(),
            marker: marker.clone(),
            present,
            queued: Vec::with_capacity(sinks.len()),
            failed: Vec::new(),
        };

        // One independent envelope per sink
        for sink in sinks {
            let envelope = Envelope {
                pipe: name.to_string(),
                source: snapshot.clone(),
                sink: sink.clone(),
                marker: marker.clone(),
                present,
            };
            let payload = self.codec.encode(&envelope)?;

            match self.queue.enqueue(payload).await {
                Ok(task_id) => report.queued.push((sink, task_id)),
                Err(cause) => {
                    warn!(sink = %sink, error = %cause, "Failed to enqueue envelope");
                    report.failed.push(PipesError::EnvelopeSubmit { sink, cause });
                }
            }
        }

        info!(
            source = %source_id,
            version = marker.version,
            queued = report.queued.len(),
            failed = report.failed.len(),
            "Dispatched source change"
        );

        Ok(report)
    }
}
