//! Core traits domain code implements.

use std::collections::BTreeSet;

use pipes_store::IdRef;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Anything with a stable key. Sources implement this so the engine can
/// find their change marker.
pub trait Entity {
    fn id_ref(&self) -> IdRef;
}

/// Declared mapping from one source type to one sink type.
///
/// Implementations are stateless: every method is a pure function of its
/// arguments. `flux` and `reflux` must be commutative accumulations and
/// exact inverses of each other for the same source state, so envelopes can
/// be applied in any order and still converge.
pub trait Pipe: Send + Sync + 'static {
    type Source: Entity + Serialize + DeserializeOwned + Send + Sync;
    type Sink: Default + Serialize + DeserializeOwned + Send + Sync;

    /// Registry key carried in every envelope. Must be stable across deploys.
    fn name(&self) -> &'static str;

    /// Every sink this source state contributes to. May be empty.
    fn configure(&self, source: &Self::Source) -> BTreeSet<IdRef>;

    /// Reset the sink's accumulators to their zero value.
    fn clear(&self, sink: &mut Self::Sink);

    /// Add the source's contribution to the sink.
    fn flux(&self, source: &Self::Source, sink: &mut Self::Sink);

    /// Remove the source's contribution from the sink.
    fn reflux(&self, source: &Self::Source, sink: &mut Self::Sink);
}
