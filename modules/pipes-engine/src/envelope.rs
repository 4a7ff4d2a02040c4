use pipes_store::{IdRef, SourceMarker};

/// One unit of fan-out work: apply one source change to one sink.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Registry key of the pipe that owns the operation.
    pub pipe: String,
    /// Source snapshot taken at dispatch time.
    pub source: serde_json::Value,
    pub sink: IdRef,
    /// Marker as it stood right after this dispatch advanced it.
    pub marker: SourceMarker,
    /// `true` applies `flux`, `false` applies `reflux`.
    pub present: bool,
}

impl Envelope {
    pub fn version(&self) -> i64 {
        self.marker.version
    }

    /// Key of the source this envelope came from.
    pub fn source_id(&self) -> &IdRef {
        &self.marker.parent_id
    }
}
