//! Lifecycle flags shared between a core object and its twin.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use keel_core::Latch;

const INITIALIZED: u8 = 1 << 0;
const SCHEDULED_FOR_INIT: u8 = 1 << 1;
const DESTROYED: u8 = 1 << 2;

/// Flags describing where a core object is in its lifecycle.
///
/// Shared (behind an `Arc`) by the sim-side [`CoreObject`](super::CoreObject),
/// the manager's registry entry, and the [`CoreToken`](super::CoreToken) used
/// to reach the twin. `Initialized` is backed by a [`Latch`], so the sim
/// thread can block until the core thread sets it.
pub struct SyncedState {
    flags: AtomicU8,
    core_dirty: AtomicBool,
    initialized: Latch,
}

impl Default for SyncedState {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncedState {
    pub fn new() -> Self {
        Self {
            flags: AtomicU8::new(0),
            core_dirty: AtomicBool::new(false),
            initialized: Latch::new(),
        }
    }

    #[inline]
    fn has(&self, flag: u8) -> bool {
        self.flags.load(Ordering::Acquire) & flag != 0
    }

    /// The core-thread twin has been constructed and initialized.
    pub fn is_initialized(&self) -> bool {
        self.has(INITIALIZED)
    }

    /// `initialize()` has queued construction of the twin.
    pub fn is_scheduled_for_init(&self) -> bool {
        self.has(SCHEDULED_FOR_INIT)
    }

    /// The object has been destroyed on the sim side.
    pub fn is_destroyed(&self) -> bool {
        self.has(DESTROYED)
    }

    /// Set `ScheduledForInit`. Returns `false` if it was already set.
    pub(crate) fn mark_scheduled_for_init(&self) -> bool {
        self.flags.fetch_or(SCHEDULED_FOR_INIT, Ordering::AcqRel) & SCHEDULED_FOR_INIT == 0
    }

    /// Undo a scheduling that never reached the core thread.
    pub(crate) fn clear_scheduled_for_init(&self) {
        self.flags.fetch_and(!SCHEDULED_FOR_INIT, Ordering::AcqRel);
    }

    /// Set `Initialized` and release every thread blocked in [`wait_initialized`](Self::wait_initialized).
    ///
    /// Only the core thread calls this, after the twin's `initialize` hook ran.
    pub(crate) fn mark_initialized(&self) {
        self.flags.fetch_or(INITIALIZED, Ordering::AcqRel);
        self.initialized.set();
    }

    /// Set `Destroyed`. Returns `false` if it was already set.
    pub(crate) fn mark_destroyed(&self) -> bool {
        self.flags.fetch_or(DESTROYED, Ordering::AcqRel) & DESTROYED == 0
    }

    /// Flag the object for the next sync pass.
    pub fn mark_core_dirty(&self) {
        self.core_dirty.store(true, Ordering::Release);
    }

    pub fn is_core_dirty(&self) -> bool {
        self.core_dirty.load(Ordering::Acquire)
    }

    /// Clear the dirty flag, returning whether it was set.
    pub(crate) fn take_core_dirty(&self) -> bool {
        self.core_dirty.swap(false, Ordering::AcqRel)
    }

    /// Block until the twin is initialized.
    pub fn wait_initialized(&self) {
        self.initialized.wait();
    }

    /// Block until the twin is initialized or the timeout elapses.
    pub fn wait_initialized_timeout(&self, timeout: Duration) -> bool {
        self.initialized.wait_timeout(timeout)
    }
}

impl fmt::Debug for SyncedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncedState")
            .field("initialized", &self.is_initialized())
            .field("scheduled_for_init", &self.is_scheduled_for_init())
            .field("destroyed", &self.is_destroyed())
            .field("core_dirty", &self.is_core_dirty())
            .finish()
    }
}
