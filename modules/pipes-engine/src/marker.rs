//! Change markers: one monotonically increasing counter per source object.

use pipes_store::{IdRef, ObjectStore, SourceMarker};

use crate::error::{PipesError, Result};

/// Kind segment of every marker key.
pub const MARKER_KIND: &str = "__source_marker";

/// Marker key for a source. A child of the source key with the same id, so
/// every caller derives the same row.
pub fn marker_id(source_id: &IdRef) -> IdRef {
    source_id.child(MARKER_KIND, source_id.id())
}

pub struct MarkerService<S: ObjectStore> {
    store: S,
}

impl<S: ObjectStore> MarkerService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Create the marker at version 1, or advance it by exactly 1.
    pub async fn get_or_create(&self, source_id: &IdRef) -> Result<SourceMarker> {
        self.store
            .advance_marker(&marker_id(source_id), source_id)
            .await
            .map_err(|cause| PipesError::MarkerWrite {
                source_id: source_id.clone(),
                cause,
            })
    }

    /// Current marker without advancing it.
    pub async fn current(&self, source_id: &IdRef) -> Result<Option<SourceMarker>> {
        Ok(self.store.read_marker(&marker_id(source_id)).await?)
    }
}
