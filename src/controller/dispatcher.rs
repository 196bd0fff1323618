//! Single-flight dispatch per Cleanup
//!
//! At most one cycle per Cleanup key is active. A trigger that arrives
//! while a cycle runs marks one rerun; any further trigger before that
//! rerun starts is absorbed.
//!
//! The dispatcher also remembers which trigger each Cleanup last consumed,
//! so a watch event that still carries stale status does not fire the same
//! trigger twice.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Result of asking to start a cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// No cycle was active; the caller must run one now
    Started,
    /// A cycle is active; one rerun is now pending
    Coalesced,
    /// A cycle is active and a rerun is already pending
    AlreadyPending,
}

/// What a cycle consumed when it started
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleMark {
    /// Trigger annotation value at cycle start
    pub trigger: Option<String>,
    /// Spec generation at cycle start
    pub generation: Option<i64>,
    /// When the cycle started
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Slot {
    rerun: bool,
}

/// Per-key single-flight gate
#[derive(Debug, Default)]
pub struct Dispatcher {
    running: DashMap<String, Slot>,
    marks: DashMap<String, CycleMark>,
}

impl Dispatcher {
    /// Create an empty dispatcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask to start a cycle for `key`
    pub fn try_begin(&self, key: &str) -> Admission {
        match self.running.entry(key.to_string()) {
            Entry::Vacant(v) => {
                v.insert(Slot::default());
                Admission::Started
            }
            Entry::Occupied(mut o) => {
                if o.get().rerun {
                    Admission::AlreadyPending
                } else {
                    o.get_mut().rerun = true;
                    Admission::Coalesced
                }
            }
        }
    }

    /// Conclude the active cycle for `key`
    ///
    /// Returns true if a rerun was pending; the key then stays active and
    /// the caller must run the next cycle. Returns false once the key is
    /// idle again.
    pub fn finish(&self, key: &str) -> bool {
        match self.running.entry(key.to_string()) {
            Entry::Occupied(mut o) => {
                if o.get().rerun {
                    o.get_mut().rerun = false;
                    true
                } else {
                    o.remove();
                    false
                }
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Whether a cycle is active for `key`
    pub fn is_running(&self, key: &str) -> bool {
        self.running.contains_key(key)
    }

    /// Whether a rerun is pending for `key`
    pub fn rerun_pending(&self, key: &str) -> bool {
        self.running.get(key).map(|s| s.rerun).unwrap_or(false)
    }

    /// Record what the cycle that just started consumed
    pub fn record_mark(&self, key: &str, mark: CycleMark) {
        self.marks.insert(key.to_string(), mark);
    }

    /// What the last cycle for `key` consumed, if one ran in this process
    pub fn mark(&self, key: &str) -> Option<CycleMark> {
        self.marks.get(key).map(|m| m.value().clone())
    }

    /// Forget everything about `key` (the Cleanup was deleted)
    pub fn forget(&self, key: &str) {
        self.running.remove(key);
        self.marks.remove(key);
    }
}
