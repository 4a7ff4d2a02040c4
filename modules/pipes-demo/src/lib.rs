//! Counter domain wired through the pipes engine.
//!
//! Every `PipedObject` contributes to one `PipedObjectCounter`: the total
//! count, plus a per-group count for "group-a" and "group-b".
//! [`PipedObjects`] is the domain repository: it dispatches the change and
//! then writes the source object.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use pipes_engine::{DispatchReport, Dispatcher, Entity, EnvelopeCodec, Pipe, PipeRegistry};
use pipes_store::{IdRef, ObjectStore, TaskQueue};
use serde::{Deserialize, Serialize};

pub const OBJECT_KIND: &str = "piped_objects";
pub const COUNTER_KIND: &str = "piped_object_counters";
pub const DEFAULT_COUNTER: i64 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipedObject {
    pub id: i64,
    pub group: Option<String>,
    /// Counter this object feeds. Defaults to [`DEFAULT_COUNTER`].
    #[serde(default)]
    pub counter_id: Option<i64>,
}

impl Entity for PipedObject {
    fn id_ref(&self) -> IdRef {
        object_id(self.id)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipedObjectCounter {
    pub count: i64,
    pub count_group_a: i64,
    pub count_group_b: i64,
}

pub fn object_id(id: i64) -> IdRef {
    IdRef::new(OBJECT_KIND, id)
}

pub fn counter_id(id: i64) -> IdRef {
    IdRef::new(COUNTER_KIND, id)
}

pub struct CounterPipe;

impl CounterPipe {
    fn adjust(source: &PipedObject, sink: &mut PipedObjectCounter, delta: i64) {
        sink.count += delta;
        match source.group.as_deref() {
            Some("group-a") => sink.count_group_a += delta,
            Some("group-b") => sink.count_group_b += delta,
            _ => {}
        }
    }
}

impl Pipe for CounterPipe {
    type Source = PipedObject;
    type Sink = PipedObjectCounter;

    fn name(&self) -> &'static str {
        "piped_object_counter"
    }

    fn configure(&self, source: &PipedObject) -> BTreeSet<IdRef> {
        BTreeSet::from([counter_id(source.counter_id.unwrap_or(DEFAULT_COUNTER))])
    }

    fn clear(&self, sink: &mut PipedObjectCounter) {
        *sink = PipedObjectCounter::default();
    }

    fn flux(&self, source: &PipedObject, sink: &mut PipedObjectCounter) {
        Self::adjust(source, sink, 1);
    }

    fn reflux(&self, source: &PipedObject, sink: &mut PipedObjectCounter) {
        Self::adjust(source, sink, -1);
    }
}

/// Every pipe the demo dispatches through.
pub fn registry() -> pipes_engine::Result<PipeRegistry> {
    PipeRegistry::builder().register(CounterPipe).build()
}

/// Source repository. A change is dispatched before the source is written
/// or deleted, so a failed call leaves the stored object as it was and can
/// be retried as-is. Envelopes carry their own snapshots and the newest
/// version wins at each sink, so the retry converges.
pub struct PipedObjects<S, Q>
where
    S: ObjectStore + Clone,
    Q: TaskQueue,
{
    store: S,
    dispatcher: Dispatcher<S, Q>,
}

impl<S, Q> PipedObjects<S, Q>
where
    S: ObjectStore + Clone,
    Q: TaskQueue,
{
    pub fn new(registry: PipeRegistry, store: S, queue: Q, codec: EnvelopeCodec) -> Self {
        Self {
            dispatcher: Dispatcher::new(registry, store.clone(), queue, codec),
            store,
        }
    }

    pub async fn get(&self, id: i64) -> Result<Option<PipedObject>> {
        let Some(body) = self.store.get(&object_id(id)).await? else {
            return Ok(None);
        };
        let object = serde_json::from_value(body)
            .with_context(|| format!("Corrupt piped object {id}"))?;
        Ok(Some(object))
    }

    /// Create or replace an object. A replacement withdraws the previous
    /// state from its counter before the new state is added.
    pub async fn save(&self, object: PipedObject) -> Result<DispatchReport> {
        let previous = self.get(object.id).await?;

        let report = match previous {
            Some(previous) => {
                let (removed, added) = self
                    .dispatcher
                    .propagate_update(&CounterPipe, &previous, &object)
                    .await?;
                removed.into_result()?;
                added.into_result()?
            }
            None => self
                .dispatcher
                .propagate_add(&CounterPipe, &object)
                .await?
                .into_result()?,
        };

        self.store
            .put(&object.id_ref(), serde_json::to_value(&object)?)
            .await
            .with_context(|| format!("Failed to write piped object {}", object.id))?;

        Ok(report)
    }

    /// Delete an object. Returns `None` if it did not exist.
    pub async fn remove(&self, id: i64) -> Result<Option<DispatchReport>> {
        let Some(object) = self.get(id).await? else {
            return Ok(None);
        };

        let report = self
            .dispatcher
            .propagate_remove(&CounterPipe, &object)
            .await?
            .into_result()?;

        self.store
            .delete(&object.id_ref())
            .await
            .with_context(|| format!("Failed to delete piped object {id}"))?;

        Ok(Some(report))
    }

    /// Current counter value. Reflects only the envelopes applied so far.
    pub async fn counter(&self, id: i64) -> Result<PipedObjectCounter> {
        match self.store.get(&counter_id(id)).await? {
            Some(body) => serde_json::from_value(body)
                .with_context(|| format!("Corrupt counter {id}")),
            None => Ok(PipedObjectCounter::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(group: &str) -> PipedObject {
        PipedObject {
            id: 1,
            group: Some(group.to_string()),
            counter_id: None,
        }
    }

    #[test]
    fn reflux_undoes_flux() {
        let pipe = CounterPipe;
        let start = PipedObjectCounter {
            count: 5,
            count_group_a: 2,
            count_group_b: 3,
        };

        for group in ["group-a", "group-b", "group-c"] {
            let mut sink = start.clone();
            pipe.flux(&object(group), &mut sink);
            pipe.reflux(&object(group), &mut sink);
            assert_eq!(sink, start, "{group}");
        }
    }

    #[test]
    fn ungrouped_objects_only_touch_the_total() {
        let mut sink = PipedObjectCounter::default();
        let mut source = object("group-a");
        source.group = None;

        CounterPipe.flux(&source, &mut sink);

        assert_eq!(
            sink,
            PipedObjectCounter {
                count: 1,
                ..Default::default()
            }
        );
    }

    #[test]
    fn objects_feed_the_default_counter_unless_told_otherwise() {
        let mut source = object("group-a");
        assert_eq!(
            CounterPipe.configure(&source),
            BTreeSet::from([counter_id(DEFAULT_COUNTER)])
        );

        source.counter_id = Some(9);
        assert_eq!(CounterPipe.configure(&source), BTreeSet::from([counter_id(9)]));
    }

    #[test]
    fn clear_zeroes_every_field() {
        let mut sink = PipedObjectCounter {
            count: 3,
            count_group_a: 1,
            count_group_b: 2,
        };
        CounterPipe.clear(&mut sink);
        assert_eq!(sink, PipedObjectCounter::default());
    }

    #[test]
    fn counter_uses_camel_case_on_the_wire() {
        let json = serde_json::to_value(PipedObjectCounter {
            count: 2,
            count_group_a: 1,
            count_group_b: 1,
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"count": 2, "countGroupA": 1, "countGroupB": 1})
        );
    }
}
