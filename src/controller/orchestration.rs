//! Orchestration state tracker
//!
//! Collapses any number of reconcile requests for one cluster into
//! convergence passes that never overlap. A request that arrives while a
//! pass is running leaves `needed` set, so the running pass goes around
//! once more instead of the request being dropped.

use parking_lot::Mutex;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Flags {
    needed: bool,
    running: bool,
}

/// Point-in-time copy of the flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestrationSnapshot {
    pub needed: bool,
    pub running: bool,
}

/// Per-cluster `needed` / `running` flags behind one lock
#[derive(Debug, Default)]
pub struct OrchestrationState {
    flags: Mutex<Flags>,
}

impl OrchestrationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a convergence pass is wanted
    pub fn mark_needed(&self) {
        self.flags.lock().needed = true;
    }

    /// Enter a pass if one is needed and none is running.
    ///
    /// Clears `needed` and sets `running` atomically when it returns true.
    pub fn try_enter(&self) -> bool {
        let mut flags = self.flags.lock();
        if flags.needed && !flags.running {
            flags.needed = false;
            flags.running = true;
            return true;
        }
        false
    }

    /// Leave the running pass
    pub fn exit(&self) {
        self.flags.lock().running = false;
    }

    pub fn snapshot(&self) -> OrchestrationSnapshot {
        let flags = *self.flags.lock();
        OrchestrationSnapshot {
            needed: flags.needed,
            running: flags.running,
        }
    }
}
