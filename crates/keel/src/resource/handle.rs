//! Resource handles and the data block they share.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::ThreadId;

use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use keel_core::Latch;
use keel_core::logging::targets;

use super::{Resource, Resources};

/// The data block shared by every handle to one resource.
///
/// A block outlives unloads of its resource. Reloading the same UUID
/// publishes into the same block, so existing handles see the new load.
pub(crate) struct ResourceHandleData {
    uuid: Uuid,
    resource: RwLock<Option<Arc<dyn Resource>>>,
    // Replaced with a fresh latch when a finished block is loaded again.
    created: Mutex<Latch>,
    loading: AtomicBool,
    failure: Mutex<Option<String>>,
    ref_count: AtomicUsize,
    loading_thread: Mutex<Option<ThreadId>>,
}

impl ResourceHandleData {
    pub(crate) fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            resource: RwLock::new(None),
            created: Mutex::new(Latch::new()),
            loading: AtomicBool::new(false),
            failure: Mutex::new(None),
            ref_count: AtomicUsize::new(0),
            loading_thread: Mutex::new(None),
        }
    }

    pub(crate) fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub(crate) fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    fn latch(&self) -> Latch {
        self.created.lock().clone()
    }

    pub(crate) fn is_created(&self) -> bool {
        self.created.lock().is_set()
    }

    pub(crate) fn is_loaded(&self) -> bool {
        self.is_created() && self.resource.read().is_some()
    }

    pub(crate) fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    /// Claim the load.
    ///
    /// Returns `false` if the resource is loaded or another load is in
    /// progress. A block whose last load failed or was unloaded is re-armed.
    pub(crate) fn begin_load(&self) -> bool {
        let mut created = self.created.lock();
        if self.loading.load(Ordering::Acquire) {
            return false;
        }
        if created.is_set() {
            if self.resource.read().is_some() {
                return false;
            }
            *created = Latch::new();
            *self.failure.lock() = None;
        }
        self.loading.store(true, Ordering::Release);
        true
    }

    pub(crate) fn set_loading_thread(&self, thread: Option<ThreadId>) {
        *self.loading_thread.lock() = thread;
    }

    /// Publish the resource, then release waiters.
    pub(crate) fn complete(&self, resource: Arc<dyn Resource>) {
        let created = self.created.lock();
        *self.resource.write() = Some(resource);
        created.set();
        self.loading.store(false, Ordering::Release);
    }

    /// Record a failed load and release waiters. The handle stays not loaded.
    pub(crate) fn fail(&self, reason: String) {
        let created = self.created.lock();
        *self.failure.lock() = Some(reason);
        created.set();
        self.loading.store(false, Ordering::Release);
    }

    pub(crate) fn take(&self) -> Option<Arc<dyn Resource>> {
        self.resource.write().take()
    }

    pub(crate) fn wait_created(&self) {
        self.latch().wait();
    }

    pub(crate) fn failure(&self) -> Option<String> {
        self.failure.lock().clone()
    }

    fn resource(&self) -> Option<Arc<dyn Resource>> {
        if !self.is_created() {
            return None;
        }
        self.resource.read().clone()
    }
}

/// A reference-counted handle to a resource that may still be loading.
///
/// Cloning a handle increments the count of live handles; dropping one
/// decrements it. Handles come from [`Resources`].
pub struct HResource {
    data: Arc<ResourceHandleData>,
    owner: Weak<Resources>,
}

impl HResource {
    pub(crate) fn from_data(data: Arc<ResourceHandleData>, owner: Weak<Resources>) -> Self {
        data.ref_count.fetch_add(1, Ordering::AcqRel);
        Self { data, owner }
    }

    pub(crate) fn data(&self) -> &Arc<ResourceHandleData> {
        &self.data
    }

    pub fn uuid(&self) -> Uuid {
        self.data.uuid
    }

    /// Number of live handles to this resource, this one included.
    pub fn ref_count(&self) -> usize {
        self.data.ref_count()
    }

    /// Whether the resource is loaded.
    ///
    /// With `check_dependencies`, every resource it depends on must be loaded
    /// too.
    pub fn is_loaded(&self, check_dependencies: bool) -> bool {
        let Some(resource) = self.data.resource() else {
            return false;
        };
        !check_dependencies
            || resource
                .dependencies()
                .iter()
                .all(|dependency| dependency.is_loaded(true))
    }

    /// Block until the load has finished, successfully or not.
    ///
    /// With `wait_for_dependencies`, also blocks on every dependency.
    ///
    /// # Panics
    ///
    /// Panics when called from the thread currently loading this resource.
    #[track_caller]
    pub fn block_until_loaded(&self, wait_for_dependencies: bool) {
        if !self.data.is_created() {
            let loading_thread = *self.data.loading_thread.lock();
            if loading_thread == Some(std::thread::current().id()) {
                panic!(
                    "block_until_loaded called for resource {} on the thread loading it",
                    self.data.uuid
                );
            }
            tracing::trace!(target: targets::RESOURCE, uuid = %self.data.uuid, "waiting for resource");
            self.data.wait_created();
        }

        if wait_for_dependencies && let Some(resource) = self.data.resource() {
            for dependency in resource.dependencies() {
                dependency.block_until_loaded(true);
            }
        }
    }

    /// The loaded resource.
    ///
    /// # Panics
    ///
    /// Panics if the resource is not loaded.
    #[track_caller]
    pub fn get(&self) -> Arc<dyn Resource> {
        match self.data.resource() {
            Some(resource) => resource,
            None => panic!("resource {} accessed before it finished loading", self.data.uuid),
        }
    }

    /// The loaded resource, or `None` if it is not loaded.
    pub fn try_get(&self) -> Option<Arc<dyn Resource>> {
        self.data.resource()
    }

    /// The loaded resource as its concrete type.
    pub fn get_as<T: Resource>(&self) -> Option<Arc<T>> {
        self.try_get()?.as_any_arc().downcast::<T>().ok()
    }

    /// Why the load failed, if it did.
    pub fn load_failure(&self) -> Option<String> {
        self.data.failure()
    }

    /// Give up this handle.
    ///
    /// The resource stays loaded until the registry reclaims it, see
    /// [`Resources::unload_all_unused`].
    pub fn release(self) {
        drop(self);
    }

    /// Unload the resource now, regardless of other handles.
    ///
    /// Does nothing if the resource is not loaded.
    pub fn destroy(self) {
        if self.data.resource.read().is_none() {
            return;
        }
        match self.owner.upgrade() {
            Some(resources) => {
                resources.unload(&self);
            }
            None => {
                if let Some(resource) = self.data.take() {
                    resource.on_unload();
                }
            }
        }
    }
}

impl Clone for HResource {
    fn clone(&self) -> Self {
        Self::from_data(self.data.clone(), self.owner.clone())
    }
}

impl Drop for HResource {
    fn drop(&mut self) {
        self.data.ref_count.fetch_sub(1, Ordering::AcqRel);
    }
}

impl PartialEq for HResource {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl Eq for HResource {}

impl fmt::Debug for HResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HResource")
            .field("uuid", &self.data.uuid)
            .field("loaded", &self.data.is_loaded())
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

static_assertions::assert_impl_all!(HResource: Send, Sync, Clone);
