//! Tick-ordered pending queue, owned by the dispatcher thread.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::scheduler::task::TaskRecord;

/// Heap entry; the run tick is copied out so ordering never changes while
/// the entry sits in the heap.
struct PendingEntry {
    next_run: u64,
    seq: u64,
    record: Arc<TaskRecord>,
}

// Reverse ordering for min-heap (earliest tick first)
impl Ord for PendingEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .next_run
            .cmp(&self.next_run)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PendingEntry {
    fn eq(&self, other: &Self) -> bool {
        self.next_run == other.next_run && self.seq == other.seq
    }
}

impl Eq for PendingEntry {}

/// Min-structure over `next_run`.
///
/// Callers must not rely on the order of tasks sharing a tick.
#[derive(Default)]
pub(crate) struct PendingQueue {
    heap: BinaryHeap<PendingEntry>,
    seq: u64,
}

impl PendingQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, record: Arc<TaskRecord>) {
        self.seq += 1;
        self.heap.push(PendingEntry {
            next_run: record.next_run(),
            seq: self.seq,
            record,
        });
    }

    /// Pop the earliest task if it is eligible at `tick`
    pub(crate) fn pop_ready(&mut self, tick: u64) -> Option<Arc<TaskRecord>> {
        if self.heap.peek()?.next_run > tick {
            return None;
        }
        self.heap.pop().map(|entry| entry.record)
    }

    /// Remove and return every task matching `pred`
    pub(crate) fn remove_where(
        &mut self,
        mut pred: impl FnMut(&TaskRecord) -> bool,
    ) -> Vec<Arc<TaskRecord>> {
        let mut removed = Vec::new();
        self.heap.retain(|entry| {
            if pred(&entry.record) {
                removed.push(Arc::clone(&entry.record));
                false
            } else {
                true
            }
        });
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }
}
