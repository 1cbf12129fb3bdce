//! Fixed-rate heartbeat thread, for hosts without their own tick loop.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::scheduler::dispatcher::Dispatcher;

const DRIVER_THREAD_NAME: &str = "tickwork-dispatcher";
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Running heartbeat thread.
pub struct DriverHandle {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<Dispatcher>>,
}

impl Dispatcher {
    /// Move the dispatcher onto a dedicated thread that calls
    /// [`Dispatcher::heartbeat`] `ticks_per_second` times per second,
    /// continuing from the scheduler's current tick.
    ///
    /// Ticks are not skipped when a heartbeat overruns its period; the
    /// driver simply falls behind and catches up without sleeping.
    pub fn spawn_driver(self, ticks_per_second: u32) -> io::Result<DriverHandle> {
        let period = Duration::from_secs(1) / ticks_per_second.max(1);
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&shutdown);

        let handle = thread::Builder::new()
            .name(DRIVER_THREAD_NAME.to_string())
            .spawn(move || {
                let mut dispatcher = self;
                let mut tick = dispatcher.scheduler().current_tick();
                let mut deadline = Instant::now();
                info!(tick, ?period, "Dispatcher driver started");

                while !stop.load(Ordering::Acquire) {
                    tick = tick.saturating_add(1);
                    dispatcher.heartbeat(tick);

                    deadline += period;
                    let now = Instant::now();
                    if deadline > now {
                        thread::sleep(deadline - now);
                    }
                }

                info!(tick, "Dispatcher driver stopped");
                dispatcher
            })?;

        Ok(DriverHandle {
            shutdown,
            handle: Some(handle),
        })
    }
}

impl DriverHandle {
    /// Whether the driver thread is still alive
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop ticking and hand the dispatcher back.
    ///
    /// Returns `None` if the thread did not finish within the stop timeout
    /// (a sync task is stuck) or panicked; the thread is then detached.
    pub fn stop(mut self) -> Option<Dispatcher> {
        self.shutdown.store(true, Ordering::Release);
        let handle = self.handle.take()?;

        let start = Instant::now();
        loop {
            if handle.is_finished() {
                return handle.join().ok();
            }
            if start.elapsed() > STOP_TIMEOUT {
                warn!("Dispatcher driver did not stop within {:?}, detaching", STOP_TIMEOUT);
                drop(handle);
                return None;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }
}

impl Drop for DriverHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::owner::Owner;
    use crate::scheduler::Scheduler;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_driver_advances_ticks() {
        let (scheduler, dispatcher) = Scheduler::new(SchedulerConfig::default());
        let owner = Owner::new("driven");
        let runs = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&runs);
        scheduler
            .repeat_sync(&owner, 0, 1, move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        let driver = dispatcher.spawn_driver(200).unwrap();
        let start = Instant::now();
        while runs.load(Ordering::SeqCst) < 3 && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(driver.is_running());

        let dispatcher = driver.stop().expect("driver should stop");
        assert!(runs.load(Ordering::SeqCst) >= 3);
        assert!(dispatcher.scheduler().current_tick() >= 3);
    }
}
