//! Registry of live core objects and the per-frame sync pass.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use slotmap::SlotMap;

use keel_core::logging::{PerfSpan, span_names, targets};

use super::{CoreObjectId, CoreObjectType, CoreSyncData, CoreThreadHandle, SyncedState};
use crate::error::{KeelError, KeelResult};

struct ObjectEntry {
    object: Weak<dyn CoreObjectType>,
    state: Arc<SyncedState>,
    type_name: &'static str,
}

/// Tracks every live core object of one engine.
///
/// Objects register themselves on creation (see
/// [`CoreRuntime::create`](super::CoreRuntime::create)) and unregister when
/// destroyed. The manager owns the batched sync pass and the shutdown leak
/// check.
///
/// # Panics
///
/// Dropping the manager while objects are still registered panics, unless the
/// thread is already panicking.
pub struct CoreObjectManager {
    objects: Mutex<SlotMap<CoreObjectId, ObjectEntry>>,
}

impl Default for CoreObjectManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CoreObjectManager {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(SlotMap::with_key()),
        }
    }

    pub(crate) fn register_object(
        &self,
        object: Weak<dyn CoreObjectType>,
        state: Arc<SyncedState>,
        type_name: &'static str,
    ) -> CoreObjectId {
        self.objects.lock().insert(ObjectEntry {
            object,
            state,
            type_name,
        })
    }

    pub(crate) fn unregister_object(&self, id: CoreObjectId) -> bool {
        self.objects.lock().remove(id).is_some()
    }

    /// Number of registered objects.
    pub fn live_object_count(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn contains(&self, id: CoreObjectId) -> bool {
        self.objects.lock().contains_key(id)
    }

    /// Capture snapshots of every dirty object and queue one command applying
    /// them on the core thread.
    ///
    /// Only objects whose initialization has been scheduled take part, so the
    /// snapshot always lands after the twin's construction in the queue.
    /// Returns the number of snapshots sent.
    #[tracing::instrument(skip_all, target = "keel::core_object", level = "trace")]
    pub fn sync_to_core(&self, core_thread: &CoreThreadHandle) -> KeelResult<usize> {
        let _span = PerfSpan::new(span_names::SYNC_PASS);

        let candidates: Vec<(CoreObjectId, Weak<dyn CoreObjectType>, Arc<SyncedState>)> = {
            let objects = self.objects.lock();
            objects
                .iter()
                .filter(|(_, entry)| {
                    entry.state.is_core_dirty()
                        && entry.state.is_scheduled_for_init()
                        && !entry.state.is_destroyed()
                })
                .map(|(id, entry)| (id, entry.object.clone(), entry.state.clone()))
                .collect()
        };

        // Capture without the registry lock: objects may be dropped here, and
        // dropping one unregisters it.
        let mut batch: Vec<(CoreObjectId, CoreSyncData)> = Vec::with_capacity(candidates.len());
        for (id, object, state) in candidates {
            let Some(object) = object.upgrade() else {
                continue;
            };
            if !state.take_core_dirty() {
                continue;
            }
            if let Some(data) = object.capture_sync_data() {
                batch.push((id, data));
            }
        }

        if batch.is_empty() {
            return Ok(0);
        }

        let count = batch.len();
        core_thread.queue_command(move |arena| {
            for (id, data) in batch {
                if !arena.sync(id, data) {
                    tracing::trace!(target: targets::CORE_OBJECT, ?id, "sync skipped, twin gone");
                }
            }
        })?;

        tracing::trace!(target: targets::CORE_OBJECT, count, "sync batch queued");
        Ok(count)
    }

    /// Report objects that are still registered.
    pub fn check_leaks(&self) -> KeelResult<()> {
        let objects = self.objects.lock();
        if objects.is_empty() {
            return Ok(());
        }
        let mut types: Vec<&'static str> = objects.values().map(|entry| entry.type_name).collect();
        types.sort_unstable();
        types.dedup();
        Err(KeelError::LeakedCoreObjects {
            count: objects.len(),
            types,
        })
    }
}

impl fmt::Debug for CoreObjectManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreObjectManager")
            .field("live_objects", &self.live_object_count())
            .finish()
    }
}

impl Drop for CoreObjectManager {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        if let Err(err) = self.check_leaks() {
            panic!("CoreObjectManager dropped with live objects: {err}");
        }
    }
}

static_assertions::assert_impl_all!(CoreObjectManager: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_object::{
        CoreArena, CoreObject, CoreObjectCore, CoreRuntime, CoreServices,
    };
    use crate::render_target::RenderTargetManager;

    struct Lamp {
        core: CoreObject,
        brightness: Mutex<u8>,
        captures: Mutex<u32>,
    }

    #[derive(Default)]
    struct LampCore {
        brightness: u8,
        syncs: u32,
    }

    impl CoreObjectCore for LampCore {
        fn sync_to_core(&mut self, data: CoreSyncData) {
            if let Ok(brightness) = data.downcast::<u8>() {
                self.brightness = *brightness;
                self.syncs += 1;
            }
        }
    }

    impl CoreObjectType for Lamp {
        fn core_object(&self) -> &CoreObject {
            &self.core
        }

        fn create_core(&self) -> KeelResult<Box<dyn CoreObjectCore>> {
            Ok(Box::new(LampCore::default()))
        }

        fn capture_sync_data(&self) -> Option<CoreSyncData> {
            *self.captures.lock() += 1;
            Some(Box::new(*self.brightness.lock()))
        }
    }

    impl Lamp {
        fn set_brightness(&self, value: u8) {
            *self.brightness.lock() = value;
            self.core.mark_core_dirty();
        }
    }

    fn runtime() -> CoreRuntime {
        let render_targets = Arc::new(RenderTargetManager::new());
        let core_thread = Arc::new(
            CoreThreadHandle::new(move || CoreArena::new(CoreServices::new(render_targets)))
                .unwrap(),
        );
        CoreRuntime::new(core_thread, Arc::new(CoreObjectManager::new()))
    }

    fn lamp(runtime: &CoreRuntime) -> Arc<Lamp> {
        runtime.create(|core| Lamp {
            core,
            brightness: Mutex::new(0),
            captures: Mutex::new(0),
        })
    }

    fn twin_state(runtime: &CoreRuntime, lamp: &Lamp) -> Option<(u8, u32)> {
        let token = lamp.core.core();
        runtime
            .core_thread()
            .execute_sync(move |arena| {
                arena
                    .get_as::<LampCore>(&token)
                    .map(|core| (core.brightness, core.syncs))
            })
            .unwrap()
    }

    #[test]
    fn test_sync_pass_batches_dirty_objects() {
        let runtime = runtime();
        let a = lamp(&runtime);
        let b = lamp(&runtime);
        a.core.initialize().unwrap();
        b.core.initialize().unwrap();

        // Both are dirty after initialize.
        assert_eq!(runtime.objects().sync_to_core(runtime.core_thread()).unwrap(), 2);
        assert_eq!(runtime.objects().sync_to_core(runtime.core_thread()).unwrap(), 0);

        a.set_brightness(40);
        a.set_brightness(80);
        assert_eq!(runtime.objects().sync_to_core(runtime.core_thread()).unwrap(), 1);
        assert_eq!(*a.captures.lock(), 2);
        assert_eq!(*b.captures.lock(), 1);

        assert_eq!(twin_state(&runtime, &a), Some((80, 2)));
        assert_eq!(twin_state(&runtime, &b), Some((0, 1)));
    }

    #[test]
    fn test_uninitialized_objects_are_not_synced() {
        let runtime = runtime();
        let lamp = lamp(&runtime);
        lamp.set_brightness(10);

        assert_eq!(runtime.objects().sync_to_core(runtime.core_thread()).unwrap(), 0);
        assert_eq!(*lamp.captures.lock(), 0);
        assert!(lamp.core.is_core_dirty());
    }

    #[test]
    fn test_destroyed_object_unregisters() {
        let runtime = runtime();
        let lamp = lamp(&runtime);
        let id = lamp.core.id();
        assert!(runtime.objects().contains(id));
        assert_eq!(runtime.objects().live_object_count(), 1);

        lamp.core.destroy();
        assert!(!runtime.objects().contains(id));
        assert!(runtime.objects().check_leaks().is_ok());
    }

    #[test]
    fn test_check_leaks_reports_types() {
        let runtime = runtime();
        let a = lamp(&runtime);
        let b = lamp(&runtime);

        match runtime.objects().check_leaks() {
            Err(KeelError::LeakedCoreObjects { count, types }) => {
                assert_eq!(count, 2);
                assert_eq!(types.len(), 1);
                assert!(types[0].ends_with("Lamp"));
            }
            other => panic!("expected leak report, got {other:?}"),
        }

        drop(a);
        drop(b);
        assert!(runtime.objects().check_leaks().is_ok());
    }

    #[test]
    fn test_drop_with_live_objects_panics() {
        let manager = CoreObjectManager::new();
        let state = Arc::new(SyncedState::new());
        let dangling: Weak<Lamp> = Weak::new();
        let dangling: Weak<dyn CoreObjectType> = dangling;
        manager.register_object(dangling, state, "Lamp");

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || drop(manager)));
        assert!(result.is_err());
    }
}
