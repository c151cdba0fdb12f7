//! Bounded three-level strict-priority FIFO.
//!
//! Owned exclusively by the dispatcher worker; no internal locking. Under
//! sustained P0/P1 load, P2 work starves. That is the intended trade-off:
//! background batches yield entirely to interactive traffic, and tenant
//! fairness is the budget ledger's job, not the queue's.

use std::collections::VecDeque;

use super::ticket::Priority;

#[derive(Debug)]
pub struct PriorityQueue<T> {
    levels: [VecDeque<T>; 3],
    /// Per-level capacity; a full level refuses new work.
    capacity: usize,
}

impl<T> PriorityQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            levels: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
            capacity,
        }
    }

    /// Enqueues at the back of the priority's level, or hands the item back
    /// when the level is saturated.
    pub fn push(&mut self, priority: Priority, item: T) -> Result<(), T> {
        let level = &mut self.levels[priority.index()];
        if level.len() >= self.capacity {
            return Err(item);
        }
        level.push_back(item);
        Ok(())
    }

    /// Removes and returns the first item for which `ready` holds, scanning
    /// levels in strict priority order and FIFO within each level.
    pub fn pick(&mut self, mut ready: impl FnMut(&T) -> bool) -> Option<T> {
        for level in &mut self.levels {
            if let Some(pos) = level.iter().position(&mut ready) {
                return level.remove(pos);
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.levels.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.iter().all(VecDeque::is_empty)
    }

    /// Drains every queued item, highest priority first.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.levels.iter_mut().flat_map(|level| level.drain(..))
    }
}
