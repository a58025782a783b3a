//! Single-shot latches and asynchronous return values.
//!
//! A [`Latch`] is a set-once flag with a blocking wait. It is the only
//! blocking primitive used across the sim/core thread boundary:
//!
//! - core objects wait on it until their core-thread twin is initialized
//! - resource handles wait on it until a load completes
//! - [`AsyncOp`] wraps one to deliver the return value of a queued command
//!
//! Once set, a latch stays set. Every waiter, present and future, is released.
//!
//! # Example
//!
//! ```
//! use keel_core::latch::Latch;
//!
//! let latch = Latch::new();
//! let setter = latch.clone();
//!
//! let thread = std::thread::spawn(move || {
//!     setter.set();
//! });
//!
//! latch.wait();
//! assert!(latch.is_set());
//! thread.join().unwrap();
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

struct LatchState {
    set: Mutex<bool>,
    condvar: Condvar,
}

/// A set-once flag that threads can block on.
///
/// Cloning a latch produces another handle to the same flag.
#[derive(Clone)]
pub struct Latch {
    inner: Arc<LatchState>,
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

impl Latch {
    /// Create a new, unset latch.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LatchState {
                set: Mutex::new(false),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Set the latch and wake every waiter.
    ///
    /// Returns `true` if this call flipped the latch, `false` if it was
    /// already set.
    pub fn set(&self) -> bool {
        let mut set = self.inner.set.lock();
        if *set {
            return false;
        }
        *set = true;
        self.inner.condvar.notify_all();
        true
    }

    /// Check whether the latch has been set.
    pub fn is_set(&self) -> bool {
        *self.inner.set.lock()
    }

    /// Block the current thread until the latch is set.
    ///
    /// Returns immediately if the latch is already set.
    pub fn wait(&self) {
        let mut set = self.inner.set.lock();
        while !*set {
            self.inner.condvar.wait(&mut set);
        }
    }

    /// Block until the latch is set or the timeout elapses.
    ///
    /// Returns `true` if the latch is set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut set = self.inner.set.lock();
        if *set {
            return true;
        }
        let _ = self.inner.condvar.wait_while_for(&mut set, |set| !*set, timeout);
        *set
    }
}

impl fmt::Debug for Latch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Latch").field("set", &self.is_set()).finish()
    }
}

struct AsyncOpState<R> {
    latch: Latch,
    value: Mutex<Option<R>>,
}

/// The receiving half of a value produced on another thread.
///
/// Returned by [`CoreThread::queue_return_command`](crate::core_thread::CoreThread::queue_return_command).
pub struct AsyncOp<R> {
    inner: Arc<AsyncOpState<R>>,
}

impl<R> AsyncOp<R> {
    /// Check whether the producing side has finished.
    ///
    /// A finished operation may still carry no value if the producer was
    /// dropped without completing (for example, the core thread stopped).
    pub fn has_completed(&self) -> bool {
        self.inner.latch.is_set()
    }

    /// Block until the operation finishes and return its value.
    ///
    /// Returns `None` if the producer was abandoned.
    ///
    /// # Warning
    ///
    /// Waiting on the thread that is expected to produce the value deadlocks.
    pub fn wait(self) -> Option<R> {
        self.inner.latch.wait();
        self.inner.value.lock().take()
    }

    /// Block until the operation finishes or the timeout elapses.
    ///
    /// Returns `true` if the operation finished.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.inner.latch.wait_timeout(timeout)
    }

    /// Take the value if the operation has finished.
    pub fn try_take(&self) -> Option<R> {
        if self.has_completed() {
            self.inner.value.lock().take()
        } else {
            None
        }
    }
}

impl<R> fmt::Debug for AsyncOp<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncOp")
            .field("completed", &self.has_completed())
            .finish()
    }
}

/// The producing half of an [`AsyncOp`].
///
/// Dropping a completer without calling [`complete`](Self::complete) still
/// releases the waiters; they observe `None`.
pub struct AsyncOpCompleter<R> {
    inner: Arc<AsyncOpState<R>>,
}

impl<R> AsyncOpCompleter<R> {
    /// Store the value and release every waiter.
    pub fn complete(self, value: R) {
        *self.inner.value.lock() = Some(value);
        // Drop sets the latch.
    }
}

impl<R> Drop for AsyncOpCompleter<R> {
    fn drop(&mut self) {
        self.inner.latch.set();
    }
}

/// Create a connected completer/operation pair.
pub fn async_op_pair<R>() -> (AsyncOpCompleter<R>, AsyncOp<R>) {
    let state = Arc::new(AsyncOpState {
        latch: Latch::new(),
        value: Mutex::new(None),
    });
    (
        AsyncOpCompleter {
            inner: state.clone(),
        },
        AsyncOp { inner: state },
    )
}
