//! Spawn latch: at most one child in flight, plus the restart policy
//! carried across its exit.
//!
//! Two words on purpose. `lock` is the gate — it is 1 exactly while a
//! child exists whose exit has not been processed. `once` is the intent
//! recorded by the handler that took the child down: 1 means "do not
//! auto-restart when the exit arrives". Collapsing them would lose the
//! ability to express "a stop is in progress, and don't restart after".

use std::sync::atomic::{AtomicU32, Ordering};

pub(crate) struct Latch {
    lock: AtomicU32,
    once: AtomicU32,
}

impl Latch {
    pub(crate) fn new() -> Self {
        Self {
            lock: AtomicU32::new(0),
            once: AtomicU32::new(0),
        }
    }

    /// Takes the gate. Returns false when a child is already in flight.
    pub(crate) fn acquire(&self) -> bool {
        self.lock.swap(1, Ordering::SeqCst) == 0
    }

    /// Reopens the gate unconditionally.
    pub(crate) fn release(&self) {
        self.lock.store(0, Ordering::SeqCst);
    }

    /// Resets the gate to the carried policy word: after an exit is
    /// processed the gate stays shut iff auto-restart is withheld.
    pub(crate) fn settle(&self) {
        self.lock.store(self.once.load(Ordering::SeqCst), Ordering::SeqCst);
    }

    /// Records whether the next exit should be final (`true`) or
    /// trigger an auto-restart (`false`). Written only from the event
    /// loop's handler bodies.
    pub(crate) fn set_once(&self, hold: bool) {
        self.once.store(u32::from(hold), Ordering::SeqCst);
    }

    /// True when auto-restart is withheld for the next exit.
    pub(crate) fn hold_once(&self) -> bool {
        self.once.load(Ordering::SeqCst) == 1
    }
}
