//! Envelope wire format.
//!
//! A self-describing JSON object:
//!
//! ```json
//! {
//!   "format": 1,
//!   "pipe": "counter",
//!   "source": { "id": 7, "group": "group-a" },
//!   "sink": "/piped_object_counters/1",
//!   "marker": { "id": "/piped_objects/7/__source_marker/7", "parentId": "/piped_objects/7", "version": 3 },
//!   "present": true
//! }
//! ```
//!
//! The source snapshot stays untyped here; the pipe named in `pipe` decodes
//! it into its own source type on the worker side.

use pipes_store::{IdRef, SourceMarker};
use serde::{Deserialize, Serialize};

use crate::envelope::Envelope;
use crate::error::{PipesError, Result};

pub const ENVELOPE_FORMAT: u32 = 1;

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct WireEnvelope {
    format: u32,
    pipe: String,
    source: serde_json::Value,
    sink: IdRef,
    marker: SourceMarker,
    present: bool,
}

/// Encodes and decodes envelopes. Constructed once and handed to the
/// dispatcher and worker; holds no mutable state.
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    format: u32,
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvelopeCodec {
    pub fn new() -> Self {
        Self {
            format: ENVELOPE_FORMAT,
        }
    }

    pub fn encode(&self, envelope: &Envelope) -> Result<serde_json::Value> {
        let wire = WireEnvelope {
            format: self.format,
            pipe: envelope.pipe.clone(),
            source: envelope.source.clone(),
            sink: envelope.sink.clone(),
            marker: envelope.marker.clone(),
            present: envelope.present,
        };
        serde_json::to_value(wire).map_err(|cause| PipesError::Serialization {
            what: "envelope",
            cause,
        })
    }

    pub fn decode(&self, payload: &serde_json::Value) -> Result<Envelope> {
        let wire = WireEnvelope::deserialize(payload)
            .map_err(|e| PipesError::decode("envelope", e))?;

        if wire.format != self.format {
            return Err(PipesError::Deserialization(format!(
                "envelope format {} is not supported (expected {})",
                wire.format, self.format
            )));
        }

        Ok(Envelope {
            pipe: wire.pipe,
            source: wire.source,
            sink: wire.sink,
            marker: wire.marker,
            present: wire.present,
        })
    }

    /// Snapshot a typed source for transport.
    pub fn snapshot<T: Serialize>(&self, source: &T) -> Result<serde_json::Value> {
        serde_json::to_value(source).map_err(|cause| PipesError::Serialization {
            what: "source snapshot",
            cause,
        })
    }
}
