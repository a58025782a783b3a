//! Per-frame event notification.
//!
//! Managers expose the events they deliver once per frame (window focus,
//! resize, close requests) as signals. Slots run synchronously on the thread
//! that emits, which for every Keel manager is the simulation thread.
//!
//! The slot list is copied out before any slot runs, so a slot may connect,
//! disconnect or emit on the same signal. Such changes apply from the next
//! emission on.
//!
//! # Example
//!
//! ```
//! use keel_core::Signal;
//!
//! let resized = Signal::<(u32, u32)>::new();
//! let id = resized.connect(|(width, height)| {
//!     println!("now {width}x{height}");
//! });
//!
//! assert_eq!(resized.emit((1024, 768)), 1);
//! resized.disconnect(id);
//! assert_eq!(resized.emit((800, 600)), 0);
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use slotmap::{SlotMap, new_key_type};

use crate::logging::targets;

new_key_type! {
    /// Names one connected slot. Pass it to [`Signal::disconnect`].
    pub struct ConnectionId;
}

type Slot<Args> = Arc<dyn Fn(&Args) + Send + Sync>;

/// A list of listeners for one kind of event.
///
/// `Args` is passed to every slot by reference; use `()` for events without
/// a payload.
pub struct Signal<Args> {
    slots: Mutex<SlotMap<ConnectionId, Slot<Args>>>,
}

impl<Args: 'static> Default for Signal<Args> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Args: 'static> Signal<Args> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(SlotMap::with_key()),
        }
    }

    /// Add a listener.
    pub fn connect<F>(&self, slot: F) -> ConnectionId
    where
        F: Fn(&Args) + Send + Sync + 'static,
    {
        self.slots.lock().insert(Arc::new(slot))
    }

    /// Remove a listener. Returns `false` if it was already gone.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        self.slots.lock().remove(id).is_some()
    }

    pub fn connection_count(&self) -> usize {
        self.slots.lock().len()
    }

    /// Call every listener with `args`. Returns how many were called.
    pub fn emit(&self, args: Args) -> usize {
        let slots: Vec<Slot<Args>> = self.slots.lock().values().cloned().collect();
        if !slots.is_empty() {
            tracing::trace!(target: targets::SIGNAL, listeners = slots.len(), "emit");
        }
        for slot in &slots {
            slot(&args);
        }
        slots.len()
    }
}

impl<Args> fmt::Debug for Signal<Args> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("connections", &self.slots.lock().len())
            .finish()
    }
}

static_assertions::assert_impl_all!(Signal<Arc<()>>: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_emit_reaches_every_listener() {
        let resized = Signal::<(u32, u32)>::new();
        let sizes = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..2 {
            let sink = sizes.clone();
            resized.connect(move |size| sink.lock().push(*size));
        }

        assert_eq!(resized.emit((1024, 768)), 2);
        assert_eq!(*sizes.lock(), vec![(1024, 768), (1024, 768)]);
    }

    #[test]
    fn test_disconnect() {
        let closed = Signal::<()>::new();
        let id = closed.connect(|_| {});

        assert!(closed.disconnect(id));
        assert!(!closed.disconnect(id));
        assert_eq!(closed.connection_count(), 0);
        assert_eq!(closed.emit(()), 0);
    }

    #[test]
    fn test_listener_disconnects_itself() {
        let focus = Arc::new(Signal::<u32>::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let own_id = Arc::new(Mutex::new(None));

        let signal = Arc::downgrade(&focus);
        let counter = calls.clone();
        let id_cell = own_id.clone();
        let id = focus.connect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            if let (Some(signal), Some(id)) = (signal.upgrade(), *id_cell.lock()) {
                signal.disconnect(id);
            }
        });
        *own_id.lock() = Some(id);

        focus.emit(1);
        focus.emit(2);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(focus.connection_count(), 0);
    }

    #[test]
    fn test_listener_connected_during_emit_runs_next_time() {
        let signal = Arc::new(Signal::<()>::new());
        let late_calls = Arc::new(AtomicUsize::new(0));

        let weak = Arc::downgrade(&signal);
        let counter = late_calls.clone();
        signal.connect(move |_| {
            if let Some(signal) = weak.upgrade()
                && signal.connection_count() == 1
            {
                let counter = counter.clone();
                signal.connect(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
        });

        assert_eq!(signal.emit(()), 1);
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);
        assert_eq!(signal.emit(()), 2);
        assert_eq!(late_calls.load(Ordering::SeqCst), 1);
    }
}
