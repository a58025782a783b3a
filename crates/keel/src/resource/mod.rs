//! Resource handles and the resource registry.
//!
//! An [`HResource`] is a cheap, clonable reference to a resource that may not
//! be loaded yet. Every handle to the same resource shares one data block:
//! the resource pointer, its UUID, a "created" [`Latch`](keel_core::Latch)
//! and a count of live handles. Loads complete through [`Resources`], which
//! sets the pointer first and the latch second, so no observer ever sees a
//! loaded handle without a resource behind it.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use keel::resource::{Resource, Resources};
//! use uuid::Uuid;
//!
//! struct Mesh {
//!     vertices: usize,
//! }
//!
//! impl Resource for Mesh {}
//!
//! let resources = Resources::new();
//! let handle = resources.load_async(Uuid::new_v4(), || Ok(Arc::new(Mesh { vertices: 3 })));
//!
//! handle.block_until_loaded(true);
//! assert!(handle.is_loaded(false));
//! assert_eq!(handle.get_as::<Mesh>().map(|mesh| mesh.vertices), Some(3));
//! ```

mod handle;
mod registry;

use std::any::Any;
use std::sync::Arc;

pub use handle::HResource;
pub use registry::Resources;

/// Upcast helper for downcasting shared resources.
pub trait AsAnyArc: Any + Send + Sync {
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAnyArc for T {
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A loadable engine resource.
pub trait Resource: AsAnyArc {
    /// Resources that must be loaded for this one to be usable.
    fn dependencies(&self) -> Vec<HResource> {
        Vec::new()
    }

    /// Called once when the registry unloads the resource.
    fn on_unload(&self) {}
}
