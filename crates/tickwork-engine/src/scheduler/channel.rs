//! Lock-free submission chain
//!
//! Producers on any thread append to the tail with a CAS loop and never
//! block. The dispatcher is the single consumer: it walks from its own
//! (stale) head through the `next` links, then detaches what it visited and
//! hands the nodes to epoch-based reclamation, so readers scanning the chain
//! from other threads never observe freed memory.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crossbeam::epoch::{self, Atomic, Owned, Shared};

use crate::owner::Owner;
use crate::scheduler::task::{TaskId, TaskRecord};

/// Entry flowing through the submission chain.
///
/// Commands are executed on the dispatcher thread during a drain, which
/// gives them exclusive access to the pending queue and staging buffer.
#[derive(Debug, Clone)]
pub(crate) enum Submission {
    /// Schedule a new task
    Run(Arc<TaskRecord>),
    /// Cancel one task by id
    CancelId(TaskId),
    /// Cancel every task of one owner
    CancelOwner(Owner),
    /// Cancel every task
    CancelAll,
}

struct Node {
    /// `None` only for the initial sentinel
    submission: Option<Submission>,
    next: Atomic<Node>,
}

impl Node {
    fn new(submission: Option<Submission>) -> Self {
        Self {
            submission,
            next: Atomic::null(),
        }
    }
}

/// Multi-producer, single-consumer ingestion chain.
pub(crate) struct SubmissionChannel {
    /// Last node consumed by the dispatcher; its payload is already handled
    head: Atomic<Node>,
    /// Most recently claimed node
    tail: Atomic<Node>,
}

impl SubmissionChannel {
    pub(crate) fn new() -> Self {
        // SAFETY: the channel is not shared yet, nothing can race with this.
        let guard = unsafe { epoch::unprotected() };
        let sentinel = Owned::new(Node::new(None)).into_shared(guard);
        Self {
            head: Atomic::from(sentinel),
            tail: Atomic::from(sentinel),
        }
    }

    /// Append a submission. Never blocks; retries only on tail contention.
    pub(crate) fn push(&self, submission: Submission) {
        let guard = &epoch::pin();
        let node = Owned::new(Node::new(Some(submission))).into_shared(guard);

        let mut tail = self.tail.load(Ordering::Acquire, guard);
        loop {
            match self
                .tail
                .compare_exchange(tail, node, Ordering::AcqRel, Ordering::Acquire, guard)
            {
                Ok(_) => break,
                Err(err) => tail = err.current,
            }
        }

        // SAFETY: the previous tail cannot have been reclaimed. Its `next`
        // is null until this store, the consumer never walks past a node
        // with a null `next`, and it only detaches nodes it walked past.
        unsafe { tail.deref() }.next.store(node, Ordering::Release);
    }

    /// Visit every linked submission in arrival order, then detach them.
    ///
    /// Must only be called by the single consumer (the dispatcher). Nodes
    /// claimed but not yet linked by a producer are picked up next time.
    pub(crate) fn drain(&self, mut visit: impl FnMut(&Submission)) {
        let guard = &epoch::pin();
        let head = self.head.load(Ordering::Acquire, guard);

        let mut last = head;
        loop {
            // SAFETY: `last` is the head or was reached through a published
            // link; only this thread detaches nodes, and not before the walk.
            let next = unsafe { last.deref() }.next.load(Ordering::Acquire, guard);
            if next.is_null() {
                break;
            }
            last = next;
            // SAFETY: see above.
            if let Some(submission) = unsafe { last.deref() }.submission.as_ref() {
                visit(submission);
            }
        }

        if last == head {
            return;
        }
        self.head.store(last, Ordering::Release);

        let mut node = head;
        while node != last {
            // SAFETY: `node` lies between the old and new head, so it is
            // unreachable for new readers; pinned readers keep it alive until
            // their guard drops.
            unsafe {
                let next = node.deref().next.load(Ordering::Acquire, guard);
                guard.defer_destroy(node);
                node = next;
            }
        }
    }

    /// Visit submissions not yet drained, from any thread.
    ///
    /// Best effort: producers racing with the scan may or may not be seen.
    pub(crate) fn for_each_undrained(&self, mut visit: impl FnMut(&Submission)) {
        let guard = &epoch::pin();
        let mut node: Shared<'_, Node> = self.head.load(Ordering::Acquire, guard);
        loop {
            // SAFETY: nodes are destroyed only through the epoch collector,
            // after the head has moved past them; this guard is pinned.
            let next = unsafe { node.deref() }.next.load(Ordering::Acquire, guard);
            if next.is_null() {
                break;
            }
            node = next;
            // SAFETY: see above.
            if let Some(submission) = unsafe { node.deref() }.submission.as_ref() {
                visit(submission);
            }
        }
    }

    /// Find an undrained task submission by id
    pub(crate) fn find_undrained(&self, id: TaskId) -> Option<Arc<TaskRecord>> {
        let mut found = None;
        self.for_each_undrained(|submission| {
            if let Submission::Run(record) = submission {
                if found.is_none() && record.id() == id {
                    found = Some(Arc::clone(record));
                }
            }
        });
        found
    }

    /// Owned snapshot of undrained task submissions
    pub(crate) fn undrained_tasks(&self) -> Vec<Arc<TaskRecord>> {
        let mut tasks = Vec::new();
        self.for_each_undrained(|submission| {
            if let Submission::Run(record) = submission {
                tasks.push(Arc::clone(record));
            }
        });
        tasks
    }
}

impl Drop for SubmissionChannel {
    fn drop(&mut self) {
        // SAFETY: `&mut self` means no producer or reader is left.
        unsafe {
            let guard = epoch::unprotected();
            let mut node = self.head.load(Ordering::Relaxed, guard);
            while !node.is_null() {
                let next = node.deref().next.load(Ordering::Relaxed, guard);
                drop(node.into_owned());
                node = next;
            }
        }
    }
}
