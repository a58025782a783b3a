//! Checks that code runs on the thread it belongs to.
//!
//! Keel runs two long-lived threads. Core-object initialization and the
//! per-frame passes run on the simulation thread; twin construction and
//! render-target snapshots run on the core thread. A [`ThreadAffinity`]
//! remembers one of them and panics when a later call comes from elsewhere.
//!
//! ```
//! use keel_core::thread_check::{ThreadAffinity, ThreadRole};
//!
//! let sim = ThreadAffinity::current_as(ThreadRole::Simulation);
//! sim.assert_same_thread_with_msg("frame must run on the simulation thread");
//! ```

use std::fmt;
use std::thread::ThreadId;

/// Which engine thread an affinity stands for. Used in violation messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ThreadRole {
    Simulation,
    Core,
    #[default]
    Other,
}

impl fmt::Display for ThreadRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simulation => write!(f, "simulation"),
            Self::Core => write!(f, "core"),
            Self::Other => write!(f, "owning"),
        }
    }
}

/// A remembered thread.
#[derive(Debug, Clone, Copy)]
pub struct ThreadAffinity {
    thread_id: ThreadId,
    role: ThreadRole,
}

impl Default for ThreadAffinity {
    fn default() -> Self {
        Self::current()
    }
}

impl ThreadAffinity {
    #[inline]
    pub fn current() -> Self {
        Self::current_as(ThreadRole::Other)
    }

    #[inline]
    pub fn current_as(role: ThreadRole) -> Self {
        Self::for_thread(std::thread::current().id(), role)
    }

    /// An affinity for a thread other than the caller, such as a freshly
    /// spawned core thread.
    pub fn for_thread(thread_id: ThreadId, role: ThreadRole) -> Self {
        Self { thread_id, role }
    }

    #[inline]
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    #[inline]
    pub fn role(&self) -> ThreadRole {
        self.role
    }

    #[inline]
    pub fn is_same_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    /// # Panics
    ///
    /// Panics with `msg` when called from any other thread.
    #[track_caller]
    pub fn assert_same_thread_with_msg(&self, msg: &str) {
        if !self.is_same_thread() {
            self.wrong_thread(msg);
        }
    }

    /// [`assert_same_thread_with_msg`](Self::assert_same_thread_with_msg) in
    /// debug builds, nothing in release builds.
    #[inline]
    #[track_caller]
    pub fn debug_assert_same_thread_with_msg(&self, msg: &str) {
        #[cfg(debug_assertions)]
        self.assert_same_thread_with_msg(msg);
        #[cfg(not(debug_assertions))]
        let _ = msg;
    }

    #[cold]
    #[inline(never)]
    #[track_caller]
    fn wrong_thread(&self, msg: &str) -> ! {
        let current = std::thread::current();
        panic!(
            "{msg}\n  expected the {role} thread {expected:?}, called from \"{name}\" {current:?}\n  \
             queue core-side work with CoreThread::queue_command and drive sim-side passes \
             from the engine frame loop",
            role = self.role,
            expected = self.thread_id,
            name = current.name().unwrap_or("<unnamed>"),
            current = current.id(),
        )
    }
}
