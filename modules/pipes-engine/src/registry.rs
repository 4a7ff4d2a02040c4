//! Name → pipe lookup for workers that only see JSON payloads.
//!
//! Each registered [`Pipe`] is wrapped in a [`PipeAdapter`] that decodes
//! source and sink snapshots into the pipe's own types, runs the operation,
//! and encodes the sink back. The registry is built once and never mutated.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use pipes_store::IdRef;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{PipesError, Result};
use crate::traits::{Entity, Pipe};

/// Object-safe view of a [`Pipe`] over JSON snapshots.
pub trait ErasedPipe: Send + Sync {
    fn name(&self) -> &'static str;

    fn source_id(&self, source: &serde_json::Value) -> Result<IdRef>;

    fn configure(&self, source: &serde_json::Value) -> Result<BTreeSet<IdRef>>;

    /// Zero-value sink for a sink that has never been written.
    fn empty_sink(&self) -> Result<serde_json::Value>;

    fn clear(&self, sink: serde_json::Value) -> Result<serde_json::Value>;

    fn flux(
        &self,
        source: &serde_json::Value,
        sink: serde_json::Value,
    ) -> Result<serde_json::Value>;

    fn reflux(
        &self,
        source: &serde_json::Value,
        sink: serde_json::Value,
    ) -> Result<serde_json::Value>;
}

pub struct PipeAdapter<P: Pipe> {
    pipe: P,
}

impl<P: Pipe> PipeAdapter<P> {
    pub fn new(pipe: P) -> Self {
        Self { pipe }
    }

    fn source(&self, source: &serde_json::Value) -> Result<P::Source> {
        decode(source, "source snapshot")
    }

    fn sink(&self, sink: serde_json::Value) -> Result<P::Sink> {
        serde_json::from_value(sink).map_err(|e| PipesError::decode("sink body", e))
    }

    fn apply(
        &self,
        sink: serde_json::Value,
        op: impl FnOnce(&P, &mut P::Sink),
    ) -> Result<serde_json::Value> {
        let mut sink = self.sink(sink)?;
        op(&self.pipe, &mut sink);
        encode(&sink, "sink body")
    }
}

impl<P: Pipe> ErasedPipe for PipeAdapter<P> {
    fn name(&self) -> &'static str {
        self.pipe.name()
    }

    fn source_id(&self, source: &serde_json::Value) -> Result<IdRef> {
        Ok(self.source(source)?.id_ref())
    }

    fn configure(&self, source: &serde_json::Value) -> Result<BTreeSet<IdRef>> {
        Ok(self.pipe.configure(&self.source(source)?))
    }

    fn empty_sink(&self) -> Result<serde_json::Value> {
        encode(&P::Sink::default(), "sink body")
    }

    fn clear(&self, sink: serde_json::Value) -> Result<serde_json::Value> {
        self.apply(sink, |pipe, sink| pipe.clear(sink))
    }

    fn flux(
        &self,
        source: &serde_json::Value,
        sink: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let source = self.source(source)?;
        self.apply(sink, |pipe, sink| pipe.flux(&source, sink))
    }

    fn reflux(
        &self,
        source: &serde_json::Value,
        sink: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let source = self.source(source)?;
        self.apply(sink, |pipe, sink| pipe.reflux(&source, sink))
    }
}

fn decode<T: DeserializeOwned>(value: &serde_json::Value, what: &str) -> Result<T> {
    T::deserialize(value).map_err(|e| PipesError::decode(what, e))
}

fn encode<T: Serialize>(value: &T, what: &'static str) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|cause| PipesError::Serialization { what, cause })
}

// ---------------------------------------------------------------------------
// PipeRegistry
// ---------------------------------------------------------------------------

/// Immutable set of pipes, shared by dispatchers, workers and rebuilds.
#[derive(Clone, Default)]
pub struct PipeRegistry {
    pipes: Arc<HashMap<&'static str, Arc<dyn ErasedPipe>>>,
}

impl PipeRegistry {
    pub fn builder() -> PipeRegistryBuilder {
        PipeRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ErasedPipe>> {
        self.pipes
            .get(name)
            .cloned()
            .ok_or_else(|| PipesError::UnknownPipe(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pipes.contains_key(name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.pipes.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.pipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipes.is_empty()
    }
}

#[derive(Default)]
pub struct PipeRegistryBuilder {
    pipes: HashMap<&'static str, Arc<dyn ErasedPipe>>,
    duplicate: Option<&'static str>,
}

impl PipeRegistryBuilder {
    pub fn register<P: Pipe>(mut self, pipe: P) -> Self {
        let name = pipe.name();
        if self.pipes.contains_key(name) {
            self.duplicate.get_or_insert(name);
        }
        self.pipes.insert(name, Arc::new(PipeAdapter::new(pipe)));
        self
    }

    pub fn build(self) -> Result<PipeRegistry> {
        if let Some(name) = self.duplicate {
            return Err(PipesError::DuplicatePipe(name.to_string()));
        }
        Ok(PipeRegistry {
            pipes: Arc::new(self.pipes),
        })
    }
}
