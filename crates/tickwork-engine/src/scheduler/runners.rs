//! Concurrent id → task map for cancellation and liveness queries

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::owner::Owner;
use crate::scheduler::task::{TaskId, TaskRecord};

/// Registry of drained, still-live tasks.
///
/// Safe to read and write from any thread. Accessors never hand out map
/// guards: callers always receive owned `Arc`s, so no shard lock is held
/// while a task's worker-set lock is taken.
pub(crate) struct RunnerTable {
    runners: DashMap<TaskId, Arc<TaskRecord>>,
}

impl RunnerTable {
    /// Create an empty table
    pub(crate) fn new() -> Self {
        Self {
            runners: DashMap::new(),
        }
    }

    /// Register a drained task
    pub(crate) fn insert(&self, record: Arc<TaskRecord>) {
        self.runners.insert(record.id(), record);
    }

    /// Look up a task by id
    pub(crate) fn get(&self, id: TaskId) -> Option<Arc<TaskRecord>> {
        self.runners.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove a task by id
    pub(crate) fn remove(&self, id: TaskId) -> Option<Arc<TaskRecord>> {
        self.runners.remove(&id).map(|(_, record)| record)
    }

    /// Number of registered tasks
    pub(crate) fn len(&self) -> usize {
        self.runners.len()
    }

    /// Owned snapshot of every registered task
    pub(crate) fn snapshot(&self) -> Vec<Arc<TaskRecord>> {
        self.runners
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Owned snapshot of one owner's tasks
    pub(crate) fn snapshot_owner(&self, owner: &Owner) -> Vec<Arc<TaskRecord>> {
        self.runners
            .iter()
            .filter(|entry| entry.value().owner() == owner)
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Drop finished entries nobody is executing anymore.
    ///
    /// An entry is finished when it was cancelled, or when it is a one-shot
    /// that has completed at least once. It is purged only if it has been
    /// idle for longer than `grace` and has no registered worker. Returns the
    /// number of purged entries.
    pub(crate) fn purge_idle(&self, grace: Duration) -> usize {
        let mut purged = 0;
        for record in self.snapshot() {
            let finished = record.is_cancelled()
                || (record.interval().is_none() && record.has_completed());
            if !finished || record.idle_for() < grace {
                continue;
            }
            let workers = record.workers();
            if workers.is_empty() && self.remove(record.id()).is_some() {
                purged += 1;
            }
        }
        purged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::task::{ExecutionMode, Schedule};

    fn record(id: u64, owner: &Owner, schedule: Schedule) -> Arc<TaskRecord> {
        Arc::new(TaskRecord::new(
            TaskId::from_u64(id),
            owner.clone(),
            ExecutionMode::Async,
            schedule,
            0,
            Box::new(|_| Ok(())),
            "noop",
        ))
    }

    #[test]
    fn test_insert_get_remove() {
        let table = RunnerTable::new();
        let owner = Owner::new("alpha");
        table.insert(record(1, &owner, Schedule::once(0)));

        assert_eq!(table.len(), 1);
        assert_eq!(table.get(TaskId::from_u64(1)).unwrap().id().as_u64(), 1);
        assert!(table.remove(TaskId::from_u64(1)).is_some());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_snapshot_owner_filters_by_identity() {
        let table = RunnerTable::new();
        let alpha = Owner::new("alpha");
        let twin = Owner::new("alpha");
        table.insert(record(1, &alpha, Schedule::once(0)));
        table.insert(record(2, &twin, Schedule::once(0)));
        table.insert(record(3, &alpha, Schedule::repeating(0, 2)));

        let mut ids: Vec<u64> = table
            .snapshot_owner(&alpha)
            .iter()
            .map(|r| r.id().as_u64())
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_purge_idle_keeps_live_entries() {
        let table = RunnerTable::new();
        let owner = Owner::new("alpha");

        let waiting = record(1, &owner, Schedule::once(100));
        let repeating = record(2, &owner, Schedule::repeating(0, 5));
        let done = record(3, &owner, Schedule::once(0));
        let cancelled = record(4, &owner, Schedule::repeating(0, 5));
        done.mark_completed();
        cancelled.mark_cancelled();
        repeating.mark_completed();

        for r in [&waiting, &repeating, &done, &cancelled] {
            table.insert(Arc::clone(r));
        }

        assert_eq!(table.purge_idle(Duration::ZERO), 2);
        assert!(table.get(waiting.id()).is_some());
        assert!(table.get(repeating.id()).is_some());
        assert!(table.get(done.id()).is_none());
        assert!(table.get(cancelled.id()).is_none());
    }

    #[test]
    fn test_purge_idle_respects_grace() {
        let table = RunnerTable::new();
        let owner = Owner::new("alpha");
        let done = record(1, &owner, Schedule::once(0));
        done.mark_completed();
        table.insert(done);

        assert_eq!(table.purge_idle(Duration::from_secs(3600)), 0);
        assert_eq!(table.len(), 1);
    }
}
