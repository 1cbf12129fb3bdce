//! Trailing log of recently dispatched async tasks (diagnostics only).

use std::collections::VecDeque;
use std::fmt;

use crate::owner::Owner;

/// One dispatched async task.
#[derive(Debug, Clone)]
pub struct ActivityEntry {
    /// Tick after which the entry is discarded
    pub expiry: u64,
    /// Owner of the dispatched task
    pub owner: Owner,
    /// Type name of the dispatched action
    pub action_type: &'static str,
}

/// Bounded-in-time record of async dispatches, oldest first.
///
/// Appended and trimmed by the dispatcher thread only; never consulted for
/// scheduling decisions.
#[derive(Debug)]
pub struct RecentActivityLog {
    entries: VecDeque<ActivityEntry>,
    window: u64,
    current_tick: u64,
}

impl RecentActivityLog {
    /// Create an empty log keeping entries for `window` ticks
    pub fn new(window: u64) -> Self {
        Self {
            entries: VecDeque::new(),
            window,
            current_tick: 0,
        }
    }

    /// Record a dispatch at `tick`
    pub fn record(&mut self, tick: u64, owner: &Owner, action_type: &'static str) {
        self.entries.push_back(ActivityEntry {
            expiry: tick.saturating_add(self.window),
            owner: owner.clone(),
            action_type,
        });
    }

    /// Discard entries whose expiry has passed
    pub fn advance(&mut self, tick: u64) {
        self.current_tick = tick;
        while self
            .entries
            .front()
            .is_some_and(|entry| tick > entry.expiry)
        {
            self.entries.pop_front();
        }
    }

    /// Entries still inside the window, oldest first
    pub fn entries(&self) -> impl Iterator<Item = &ActivityEntry> {
        self.entries.iter()
    }

    /// Number of retained entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for RecentActivityLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Recent tasks from {}-{}{{",
            self.current_tick.saturating_sub(self.window),
            self.current_tick
        )?;
        for entry in &self.entries {
            write!(
                f,
                "{}:{}@{},",
                entry.owner.name(),
                entry.action_type,
                entry.expiry
            )?;
        }
        f.write_str("}")
    }
}
