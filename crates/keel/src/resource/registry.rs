//! The resource registry: loading, unloading and reclaiming resources.

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use keel_core::logging::targets;

use super::handle::ResourceHandleData;
use super::{HResource, Resource};
use crate::error::{KeelError, KeelResult};

/// The resource registry.
///
/// Owns the data block of every known resource, keyed by UUID, and completes
/// and reverses loads. A block stays registered while any handle refers to
/// it, so loading a UUID again reaches every existing handle. Handles keep a
/// weak reference back to the registry.
pub struct Resources {
    handles: Mutex<HashMap<Uuid, Arc<ResourceHandleData>>>,
}

impl Resources {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            handles: Mutex::new(HashMap::new()),
        })
    }

    /// A handle for `uuid`, creating an empty data block if none exists.
    pub fn create_handle(self: &Arc<Self>, uuid: Uuid) -> HResource {
        let mut handles = self.handles.lock();
        let data = handles
            .entry(uuid)
            .or_insert_with(|| Arc::new(ResourceHandleData::new(uuid)));
        // Counted under the map lock, which `unload_all_unused` relies on.
        HResource::from_data(data.clone(), Arc::downgrade(self))
    }

    /// A handle for a known resource.
    pub fn get(self: &Arc<Self>, uuid: Uuid) -> Option<HResource> {
        let handles = self.handles.lock();
        let data = handles.get(&uuid)?;
        Some(HResource::from_data(data.clone(), Arc::downgrade(self)))
    }

    /// Register an already built resource under a fresh UUID.
    pub fn register<T: Resource>(self: &Arc<Self>, resource: Arc<T>) -> HResource {
        self.register_with_uuid(Uuid::new_v4(), resource)
    }

    /// Register an already built resource.
    ///
    /// If `uuid` was already loaded, the existing resource is kept.
    pub fn register_with_uuid<T: Resource>(self: &Arc<Self>, uuid: Uuid, resource: Arc<T>) -> HResource {
        let handle = self.create_handle(uuid);
        if handle.data().begin_load() {
            self.load_complete(&handle, resource);
        } else {
            tracing::debug!(target: targets::RESOURCE, %uuid, "resource already registered");
        }
        handle
    }

    /// Publish a loaded resource and wake every thread waiting on it.
    pub fn load_complete(&self, handle: &HResource, resource: Arc<dyn Resource>) {
        handle.data().complete(resource);
        tracing::debug!(target: targets::RESOURCE, uuid = %handle.uuid(), "resource loaded");
    }

    /// Record a failed load and wake every thread waiting on it.
    pub fn load_failed(&self, handle: &HResource, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!(target: targets::RESOURCE, uuid = %handle.uuid(), %reason, "resource failed to load");
        handle.data().fail(reason);
    }

    /// Load a resource on the calling thread.
    ///
    /// Returns the existing handle if the resource is already loaded. If
    /// another thread is loading it, waits for that load and reports its
    /// outcome. A resource whose last load failed or that was unloaded is
    /// loaded again.
    pub fn load<T, F>(self: &Arc<Self>, uuid: Uuid, loader: F) -> KeelResult<HResource>
    where
        T: Resource,
        F: FnOnce() -> KeelResult<Arc<T>>,
    {
        let handle = self.create_handle(uuid);
        if !handle.data().begin_load() {
            handle.block_until_loaded(false);
            return match handle.load_failure() {
                Some(reason) if !handle.is_loaded(false) => Err(KeelError::ResourceLoad { uuid, reason }),
                _ => Ok(handle),
            };
        }

        handle.data().set_loading_thread(Some(std::thread::current().id()));
        let result = loader();
        handle.data().set_loading_thread(None);

        match result {
            Ok(resource) => {
                self.load_complete(&handle, resource);
                Ok(handle)
            }
            Err(err) => {
                let reason = err.to_string();
                self.load_failed(&handle, reason.clone());
                Err(KeelError::ResourceLoad { uuid, reason })
            }
        }
    }

    /// Load a resource on the rayon thread pool.
    ///
    /// Returns immediately. Use [`HResource::block_until_loaded`] to wait. A
    /// load already in progress is joined rather than started again.
    pub fn load_async<T, F>(self: &Arc<Self>, uuid: Uuid, loader: F) -> HResource
    where
        T: Resource,
        F: FnOnce() -> KeelResult<Arc<T>> + Send + 'static,
    {
        let handle = self.create_handle(uuid);
        if !handle.data().begin_load() {
            return handle;
        }

        let resources = self.clone();
        let task_handle = handle.clone();
        rayon::spawn(move || {
            let data = task_handle.data();
            data.set_loading_thread(Some(std::thread::current().id()));
            let result = std::panic::catch_unwind(AssertUnwindSafe(loader));
            data.set_loading_thread(None);

            match result {
                Ok(Ok(resource)) => resources.load_complete(&task_handle, resource),
                Ok(Err(err)) => resources.load_failed(&task_handle, err.to_string()),
                Err(_) => resources.load_failed(&task_handle, "loader panicked"),
            }
        });
        handle
    }

    /// Whether the resource with `uuid` is loaded.
    pub fn is_loaded(&self, uuid: Uuid) -> bool {
        self.handles
            .lock()
            .get(&uuid)
            .is_some_and(|data| data.is_loaded())
    }

    /// Unload a resource now, regardless of other handles.
    ///
    /// Waits for a load in progress first. Dependencies whose last handle was
    /// held by the unloaded resource are unloaded too. Returns the number of
    /// resources unloaded.
    pub fn unload(&self, handle: &HResource) -> usize {
        self.unload_data(handle.data())
    }

    fn unload_data(&self, data: &Arc<ResourceHandleData>) -> usize {
        if data.is_loading() {
            data.wait_created();
        }

        // The block stays registered so a later load reaches every handle.
        let Some(resource) = data.take() else {
            tracing::trace!(target: targets::RESOURCE, uuid = %data.uuid(), "resource already unloaded");
            return 0;
        };

        let dependencies = resource.dependencies();
        resource.on_unload();
        drop(resource);
        tracing::debug!(target: targets::RESOURCE, uuid = %data.uuid(), "resource unloaded");

        let mut unloaded = 1;
        for dependency in dependencies {
            // The handle in `dependencies` is the only one left.
            if dependency.ref_count() == 1 {
                unloaded += self.unload_data(dependency.data());
            }
        }
        unloaded
    }

    /// Unload every loaded resource without live handles, then forget every
    /// block that no handle refers to and no load is using.
    ///
    /// Returns the number of resources unloaded.
    pub fn unload_all_unused(&self) -> usize {
        let mut unloaded = 0;
        loop {
            let unused: Vec<Arc<ResourceHandleData>> = self
                .handles
                .lock()
                .values()
                .filter(|data| data.ref_count() == 0 && data.is_loaded())
                .cloned()
                .collect();
            if unused.is_empty() {
                break;
            }
            for data in unused {
                unloaded += self.unload_data(&data);
            }
        }
        self.handles
            .lock()
            .retain(|_, data| data.ref_count() > 0 || data.is_loading() || data.is_loaded());
        unloaded
    }

    /// Unload every resource. Used at shutdown.
    pub fn unload_all(&self) -> usize {
        let all: Vec<Arc<ResourceHandleData>> = self.handles.lock().values().cloned().collect();
        let unloaded = all.iter().map(|data| self.unload_data(data)).sum();
        self.handles.lock().clear();
        unloaded
    }

    /// Number of loaded resources.
    pub fn loaded_count(&self) -> usize {
        self.handles
            .lock()
            .values()
            .filter(|data| data.is_loaded())
            .count()
    }

    /// Number of known resources, loaded or not.
    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }
}

impl fmt::Debug for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resources")
            .field("known", &self.len())
            .field("loaded", &self.loaded_count())
            .finish()
    }
}

static_assertions::assert_impl_all!(Resources: Send, Sync);
