//! Unbounded cached thread pool for async task bodies.
//!
//! A job goes to an idle thread when one is waiting, otherwise a new thread
//! is spawned. Threads that stay idle for the keep-alive period exit.

use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Counts live threads; decremented even if a job unwinds the thread.
struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Worker pool executing async task bodies.
pub struct WorkerPool {
    job_tx: Sender<Job>,
    job_rx: Receiver<Job>,
    /// Waiting threads minus jobs already handed to them
    idle: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
    spawned: AtomicU64,
    keep_alive: Duration,
    name_prefix: String,
}

impl WorkerPool {
    /// Create an empty pool; threads are spawned on demand
    pub fn new(name_prefix: impl Into<String>, keep_alive: Duration) -> Self {
        let (job_tx, job_rx) = channel::unbounded();
        Self {
            job_tx,
            job_rx,
            idle: Arc::new(AtomicUsize::new(0)),
            live: Arc::new(AtomicUsize::new(0)),
            spawned: AtomicU64::new(0),
            keep_alive,
            name_prefix: name_prefix.into(),
        }
    }

    /// Run `job` on a pool thread. Never blocks the caller.
    ///
    /// Fails only if a new thread was needed and could not be spawned; the
    /// job is dropped without running.
    pub fn execute<F>(&self, job: F) -> io::Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let job: Job = Box::new(job);
        let reserved = self
            .idle
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if reserved {
            // The pool holds a receiver, so the channel cannot be disconnected.
            return match self.job_tx.send(job) {
                Ok(()) => Ok(()),
                Err(channel::SendError(job)) => self.spawn(job),
            };
        }
        self.spawn(job)
    }

    /// Threads currently alive (busy or idle)
    pub fn live_threads(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Threads waiting for work
    pub fn idle_threads(&self) -> usize {
        self.idle.load(Ordering::Acquire)
    }

    fn spawn(&self, first: Job) -> io::Result<()> {
        let n = self.spawned.fetch_add(1, Ordering::Relaxed);
        let rx = self.job_rx.clone();
        let idle = Arc::clone(&self.idle);
        let keep_alive = self.keep_alive;

        self.live.fetch_add(1, Ordering::AcqRel);
        let guard = LiveGuard(Arc::clone(&self.live));

        // On failure the closure is dropped with the guard, undoing `live`.
        thread::Builder::new()
            .name(format!("{}-{}", self.name_prefix, n))
            .spawn(move || {
                let _guard = guard;
                Self::worker_loop(first, rx, idle, keep_alive);
            })?;
        Ok(())
    }

    fn worker_loop(first: Job, rx: Receiver<Job>, idle: Arc<AtomicUsize>, keep_alive: Duration) {
        let mut job = first;
        loop {
            job();
            idle.fetch_add(1, Ordering::AcqRel);

            job = loop {
                match rx.recv_timeout(keep_alive) {
                    Ok(next) => break next,
                    Err(RecvTimeoutError::Timeout) => {
                        // Leave only if no job has been reserved for this slot.
                        if idle
                            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                                n.checked_sub(1)
                            })
                            .is_ok()
                        {
                            return;
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        idle.fetch_sub(1, Ordering::AcqRel);
                        return;
                    }
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Instant;

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[test]
    fn test_executes_job_on_named_thread() {
        let pool = WorkerPool::new("pool-test", Duration::from_secs(5));
        let (tx, rx) = mpsc::channel();
        pool.execute(move || {
            tx.send(thread::current().name().map(str::to_string)).unwrap();
        })
        .unwrap();
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert!(name.starts_with("pool-test-"));
    }

    #[test]
    fn test_grows_for_blocking_jobs() {
        let pool = WorkerPool::new("pool-grow", Duration::from_secs(5));
        let (release_tx, release_rx) = crossbeam::channel::unbounded::<()>();
        let started = Arc::new(AtomicUsize::new(0));

        for _ in 0..4 {
            let release_rx = release_rx.clone();
            let started = Arc::clone(&started);
            pool.execute(move || {
                started.fetch_add(1, Ordering::SeqCst);
                let _ = release_rx.recv();
            })
            .unwrap();
        }

        assert!(wait_until(Duration::from_secs(5), || {
            started.load(Ordering::SeqCst) == 4
        }));
        assert_eq!(pool.live_threads(), 4);
        drop(release_tx);
    }

    #[test]
    fn test_reuses_idle_thread() {
        let pool = WorkerPool::new("pool-reuse", Duration::from_secs(5));
        let (tx, rx) = mpsc::channel();

        let first = tx.clone();
        pool.execute(move || first.send(()).unwrap()).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(wait_until(Duration::from_secs(5), || pool.idle_threads() == 1));

        pool.execute(move || tx.send(()).unwrap()).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(pool.live_threads(), 1);
    }

    #[test]
    fn test_idle_threads_expire() {
        let pool = WorkerPool::new("pool-expire", Duration::from_millis(20));
        let (tx, rx) = mpsc::channel();
        pool.execute(move || tx.send(()).unwrap()).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        assert!(wait_until(Duration::from_secs(5), || pool.live_threads() == 0));
        assert_eq!(pool.idle_threads(), 0);
    }
}
