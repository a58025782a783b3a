//! Core objects: sim-thread proxies with core-thread twins.
//!
//! Every engine resource that owns GPU state is split in two:
//!
//! - a **sim-side object** implementing [`CoreObjectType`], embedding a
//!   [`CoreObject`] that holds its id, its [`SyncedState`], and handles to
//!   the core thread and manager
//! - a **core-thread twin** implementing [`CoreObjectCore`], owned
//!   exclusively by the [`CoreArena`] that lives on the core thread
//!
//! The sim side never holds a pointer to its twin. It holds a [`CoreToken`]
//! (id plus shared flags) that only resolves inside commands executing on the
//! core thread.
//!
//! # Lifecycle
//!
//! 1. [`CoreRuntime::create`] registers the object with the
//!    [`CoreObjectManager`] and builds it.
//! 2. [`CoreObject::initialize`] asks the object for its twin
//!    ([`CoreObjectType::create_core`]) and queues its construction.
//! 3. The core thread inserts the twin, runs [`CoreObjectCore::initialize`],
//!    and sets `Initialized`. [`CoreObject::synchronize`] blocks until then.
//! 4. Each frame, [`CoreObjectManager::sync_to_core`] captures snapshots of
//!    dirty objects and applies them to their twins in one batched command.
//! 5. [`CoreObject::destroy`] (or dropping the object) queues the twin's
//!    removal; [`CoreObjectCore::destroy`] and the twin's `Drop` run on the
//!    core thread.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use keel::core_object::{CoreContext, CoreObject, CoreObjectCore, CoreObjectType, CoreSyncData};
//! use keel::{Engine, EngineConfig, KeelResult};
//!
//! struct Counter {
//!     core: CoreObject,
//! }
//!
//! struct CounterCore {
//!     value: u32,
//! }
//!
//! impl CoreObjectCore for CounterCore {
//!     fn sync_to_core(&mut self, data: CoreSyncData) {
//!         if let Ok(value) = data.downcast::<u32>() {
//!             self.value = *value;
//!         }
//!     }
//! }
//!
//! impl CoreObjectType for Counter {
//!     fn core_object(&self) -> &CoreObject {
//!         &self.core
//!     }
//!
//!     fn create_core(&self) -> KeelResult<Box<dyn CoreObjectCore>> {
//!         Ok(Box::new(CounterCore { value: 0 }))
//!     }
//! }
//!
//! let engine = Engine::new(EngineConfig::default()).unwrap();
//! let counter: Arc<Counter> = engine.runtime().create(|core| Counter { core });
//! counter.core_object().initialize().unwrap();
//! counter.core_object().synchronize();
//! assert!(counter.core_object().is_initialized());
//! drop(counter);
//! engine.shutdown().unwrap();
//! ```

mod arena;
mod manager;
mod object;
mod synced_state;

use std::any::Any;

use slotmap::new_key_type;

use crate::error::KeelResult;
use crate::render_target::RenderTargetCore;
use crate::render_window::RenderWindowCore;

pub use arena::{CoreArena, CoreContext, CoreServices, CoreToken};
pub use manager::CoreObjectManager;
pub use object::{CoreObject, CoreRuntime, CoreThreadHandle};
pub use synced_state::SyncedState;

new_key_type! {
    /// Identifies a core object and its twin.
    ///
    /// Allocated by the [`CoreObjectManager`] when the object registers. The
    /// same id keys the twin in the [`CoreArena`].
    pub struct CoreObjectId;
}

/// A snapshot of sim-side state handed to a twin by the sync pass.
///
/// Twins downcast it to the concrete type their sim side captured.
pub type CoreSyncData = Box<dyn Any + Send>;

/// Upcast helper so twins stored as trait objects can be downcast.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// The sim-thread side of a core object.
///
/// Implemented by every resource kind that has a core-thread twin. Objects are
/// used as trait objects, so new kinds can be added without touching the
/// manager.
pub trait CoreObjectType: Send + Sync + 'static {
    /// The embedded lifecycle state.
    fn core_object(&self) -> &CoreObject;

    /// Build the core-thread twin.
    ///
    /// Called once, on the sim thread, from [`CoreObject::initialize`].
    /// Errors propagate to the caller of `initialize`.
    fn create_core(&self) -> KeelResult<Box<dyn CoreObjectCore>>;

    /// Capture the state the twin needs for the next frame.
    ///
    /// Called by the sync pass for objects marked core-dirty. Returning `None`
    /// skips the object this frame.
    fn capture_sync_data(&self) -> Option<CoreSyncData> {
        None
    }

    /// A short type name for diagnostics.
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// The core-thread twin of a core object.
///
/// Every hook runs on the core thread.
pub trait CoreObjectCore: AsAny + Send {
    /// Called once after construction, before `Initialized` is set.
    fn initialize(&mut self, ctx: &CoreContext<'_>) {
        let _ = ctx;
    }

    /// Apply a snapshot captured by [`CoreObjectType::capture_sync_data`].
    fn sync_to_core(&mut self, data: CoreSyncData) {
        let _ = data;
    }

    /// Called once before the twin is dropped.
    fn destroy(&mut self, ctx: &CoreContext<'_>) {
        let _ = ctx;
    }

    /// Render-target view of this twin, if it is one.
    fn as_render_target_mut(&mut self) -> Option<&mut dyn RenderTargetCore> {
        None
    }

    /// Render-window view of this twin, if it is one.
    fn as_render_window_mut(&mut self) -> Option<&mut dyn RenderWindowCore> {
        None
    }
}
