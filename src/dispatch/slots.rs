//! Idle/busy tracking for worker slots
//!
//! The lock only guards state transitions. A dispatcher waiting for an idle
//! slot parks on a [`Notify`] instead of spinning, and selection is always
//! the lowest-numbered idle slot.

use tokio::sync::{Mutex, Notify};

/// State of one worker slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Ready for a frame
    Idle,
    /// A round trip is in flight
    Busy,
    /// Permanently out of rotation after a failure
    Retired,
}

/// Fixed set of worker slots
#[derive(Debug)]
pub struct SlotTable {
    /// (slot id, state), sorted by slot id
    slots: Mutex<Vec<(usize, SlotState)>>,
    released: Notify,
}

impl SlotTable {
    /// Create a table with every slot idle
    pub fn new(ids: impl IntoIterator<Item = usize>) -> Self {
        let mut slots: Vec<(usize, SlotState)> =
            ids.into_iter().map(|id| (id, SlotState::Idle)).collect();
        slots.sort_by_key(|(id, _)| *id);
        slots.dedup_by_key(|(id, _)| *id);

        Self {
            slots: Mutex::new(slots),
            released: Notify::new(),
        }
    }

    /// Claim the lowest idle slot, waiting until one frees up
    ///
    /// Returns `None` once every slot has been retired.
    pub async fn acquire(&self) -> Option<usize> {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            {
                let mut slots = self.slots.lock().await;
                if let Some((id, state)) = slots.iter_mut().find(|(_, s)| *s == SlotState::Idle) {
                    *state = SlotState::Busy;
                    return Some(*id);
                }
                if slots.iter().all(|(_, s)| *s == SlotState::Retired) {
                    return None;
                }
            }

            released.await;
        }
    }

    /// Return a busy slot to rotation
    pub async fn release(&self, id: usize) {
        self.transition(id, SlotState::Idle).await;
    }

    /// Take a slot out of rotation for good
    pub async fn retire(&self, id: usize) {
        self.transition(id, SlotState::Retired).await;
    }

    async fn transition(&self, id: usize, to: SlotState) {
        {
            let mut slots = self.slots.lock().await;
            let Some((_, state)) = slots.iter_mut().find(|(slot, _)| *slot == id) else {
                return;
            };
            // Retirement is permanent
            if *state == SlotState::Retired {
                return;
            }
            *state = to;
        }
        self.released.notify_one();
    }

    /// Current state of a slot
    pub async fn state(&self, id: usize) -> Option<SlotState> {
        let slots = self.slots.lock().await;
        slots.iter().find(|(slot, _)| *slot == id).map(|(_, s)| *s)
    }

    /// Slots not yet retired
    pub async fn live_count(&self) -> usize {
        let slots = self.slots.lock().await;
        slots.iter().filter(|(_, s)| *s != SlotState::Retired).count()
    }

    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
