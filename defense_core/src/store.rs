use std::{collections::HashMap, sync::Arc, time::Duration};

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use parking_lot::RwLock;

use crate::{shutdown::Shutdown, unit::Unit};

/// Producer end of the ingest to store hand-off queue.
pub type UnitSender = Sender<Unit>;
/// Consumer end of the hand-off queue.
pub type UnitReceiver = Receiver<Unit>;

/// Fresh unbounded FIFO hand-off queue.
pub fn unit_queue() -> (UnitSender, UnitReceiver) {
    unbounded()
}

/// Live unit table for one Defender run.
///
/// The queue applier is the only writer. Readers take a snapshot of shared
/// records; an entry is replaced wholesale on update, never mutated in place.
#[derive(Debug, Clone, Default)]
pub struct UnitStore {
    units: Arc<RwLock<HashMap<u32, Arc<Unit>>>>,
}

impl UnitStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a live unit or remove a deleted one. Removing an absent id is a
    /// no-op.
    pub fn apply(&self, unit: Unit) {
        let mut units = self.units.write();
        if unit.deleted {
            units.remove(&unit.id());
        } else {
            units.insert(unit.id(), Arc::new(unit));
        }
    }

    pub fn get(&self, id: u32) -> Option<Arc<Unit>> {
        self.units.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.units.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.read().is_empty()
    }

    /// Point-in-time copy of every live unit, ordered by id.
    pub fn snapshot(&self) -> Vec<Arc<Unit>> {
        let mut units: Vec<Arc<Unit>> = self.units.read().values().cloned().collect();
        units.sort_by_key(|unit| unit.id());
        units
    }
}

/// Apply queued units to `store` until cancelled or until every producer has
/// gone and the queue is empty. Returns the number of events applied.
pub async fn drain(
    queue: UnitReceiver,
    store: UnitStore,
    poll: Duration,
    mut shutdown: Shutdown,
) -> usize {
    let mut applied = 0usize;
    loop {
        if shutdown.is_cancelled() {
            return applied;
        }

        loop {
            match queue.try_recv() {
                Ok(unit) => {
                    store.apply(unit);
                    applied += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    tracing::debug!(
                        target: "air_defense::store",
                        applied,
                        "store.queue_closed"
                    );
                    return applied;
                }
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => return applied,
            _ = tokio::time::sleep(poll) => {}
        }
    }
}
