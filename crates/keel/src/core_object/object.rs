//! The sim-side half of a core object.

use std::fmt;
use std::sync::{Arc, Weak};

use keel_core::logging::targets;
use keel_core::{AsyncOp, CoreThread, async_op_pair};

use super::{
    CoreArena, CoreObjectCore, CoreObjectId, CoreObjectManager, CoreObjectType, CoreToken,
    SyncedState,
};
use crate::error::{KeelError, KeelResult};

/// The core thread, whose state is the twin arena.
pub type CoreThreadHandle = CoreThread<CoreArena>;

/// Everything needed to create core objects: the core thread and the manager
/// that tracks live objects.
///
/// Cheap to clone. Owned by the [`Engine`](crate::Engine).
#[derive(Clone)]
pub struct CoreRuntime {
    core_thread: Arc<CoreThreadHandle>,
    objects: Arc<CoreObjectManager>,
}

impl CoreRuntime {
    pub fn new(core_thread: Arc<CoreThreadHandle>, objects: Arc<CoreObjectManager>) -> Self {
        Self {
            core_thread,
            objects,
        }
    }

    pub fn core_thread(&self) -> &Arc<CoreThreadHandle> {
        &self.core_thread
    }

    pub fn objects(&self) -> &Arc<CoreObjectManager> {
        &self.objects
    }

    /// Register a new core object and build its sim-side value.
    ///
    /// `build` receives the embedded [`CoreObject`] and must store it so that
    /// [`CoreObjectType::core_object`] can return it. The twin is not created
    /// until [`CoreObject::initialize`] is called.
    pub fn create<T, F>(&self, build: F) -> Arc<T>
    where
        T: CoreObjectType,
        F: FnOnce(CoreObject) -> T,
    {
        Arc::new_cyclic(|weak: &Weak<T>| {
            let this: Weak<dyn CoreObjectType> = weak.clone();
            let state = Arc::new(SyncedState::new());
            let type_name = std::any::type_name::<T>();
            let id = self
                .objects
                .register_object(this.clone(), state.clone(), type_name);

            tracing::trace!(target: targets::CORE_OBJECT, ?id, type_name, "core object created");

            build(CoreObject {
                id,
                state,
                this,
                core_thread: self.core_thread.clone(),
                manager: Arc::downgrade(&self.objects),
            })
        })
    }

    /// [`create`](Self::create) followed by [`CoreObject::initialize`].
    pub fn create_initialized<T, F>(&self, build: F) -> KeelResult<Arc<T>>
    where
        T: CoreObjectType,
        F: FnOnce(CoreObject) -> T,
    {
        let object = self.create(build);
        object.core_object().initialize()?;
        Ok(object)
    }
}

impl fmt::Debug for CoreRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreRuntime")
            .field("core_thread", &self.core_thread)
            .field("live_objects", &self.objects.live_object_count())
            .finish()
    }
}

/// Lifecycle state embedded in every sim-side core object.
///
/// Dropping a `CoreObject` destroys it: the manager forgets it and the twin's
/// removal is queued on the core thread.
pub struct CoreObject {
    id: CoreObjectId,
    state: Arc<SyncedState>,
    this: Weak<dyn CoreObjectType>,
    core_thread: Arc<CoreThreadHandle>,
    manager: Weak<CoreObjectManager>,
}

impl CoreObject {
    pub fn id(&self) -> CoreObjectId {
        self.id
    }

    pub fn state(&self) -> &Arc<SyncedState> {
        &self.state
    }

    pub fn core_thread(&self) -> &Arc<CoreThreadHandle> {
        &self.core_thread
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_initialized()
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.is_destroyed()
    }

    /// Build the twin and queue its construction on the core thread.
    ///
    /// Returns as soon as the construction command is queued. Use
    /// [`synchronize`](Self::synchronize) to wait for it.
    ///
    /// # Errors
    ///
    /// - [`KeelError::AlreadyInitialized`] on a second call
    /// - [`KeelError::Destroyed`] if the object was destroyed
    /// - whatever [`CoreObjectType::create_core`] returns
    /// - [`KeelError::CoreThread`] if the core thread no longer accepts commands
    #[tracing::instrument(skip_all, target = "keel::core_object", level = "trace", fields(id = ?self.id))]
    pub fn initialize(&self) -> KeelResult<()> {
        if self.state.is_destroyed() {
            return Err(KeelError::Destroyed(self.id));
        }
        let Some(this) = self.this.upgrade() else {
            return Err(KeelError::Destroyed(self.id));
        };
        if !self.state.mark_scheduled_for_init() {
            return Err(KeelError::AlreadyInitialized(self.id));
        }

        let twin = match this.create_core() {
            Ok(twin) => twin,
            Err(err) => {
                self.state.clear_scheduled_for_init();
                return Err(err);
            }
        };

        let id = self.id;
        let state = self.state.clone();
        let queued = self.core_thread.queue_command(move |arena| {
            arena.insert_and_initialize(id, twin);
            state.mark_initialized();
        });
        if let Err(err) = queued {
            self.state.clear_scheduled_for_init();
            return Err(err.into());
        }

        // Queued after construction, so the first sync pass finds the twin.
        self.state.mark_core_dirty();
        Ok(())
    }

    /// Block until the twin has been constructed and initialized.
    ///
    /// # Panics
    ///
    /// Panics when called on the core thread, which is the only thread able
    /// to complete initialization, or when [`initialize`](Self::initialize)
    /// was never called.
    #[track_caller]
    pub fn synchronize(&self) {
        if self.core_thread.is_core_thread() {
            panic!(
                "CoreObject::synchronize() called on the core thread for {:?}; it would wait on itself",
                self.id
            );
        }
        if !self.state.is_scheduled_for_init() {
            panic!(
                "CoreObject::synchronize() called for {:?}, which was never initialized",
                self.id
            );
        }
        self.state.wait_initialized();
    }

    /// Flag the object so the next sync pass captures its state.
    pub fn mark_core_dirty(&self) {
        self.state.mark_core_dirty();
    }

    pub fn is_core_dirty(&self) -> bool {
        self.state.is_core_dirty()
    }

    /// The opaque reference to this object's twin.
    ///
    /// The token only resolves inside a command running on the core thread,
    /// and only once the twin is initialized.
    pub fn core(&self) -> CoreToken {
        CoreToken::new(self.id, self.state.clone())
    }

    /// Run `command` against the twin on the core thread.
    ///
    /// The command is skipped if the twin is gone by the time it runs or has
    /// a type other than `C`.
    pub fn queue_core_command<C, F>(&self, command: F) -> KeelResult<()>
    where
        C: CoreObjectCore,
        F: FnOnce(&mut C) + Send + 'static,
    {
        if self.state.is_destroyed() {
            return Err(KeelError::Destroyed(self.id));
        }
        let id = self.id;
        self.core_thread.queue_command(move |arena| {
            let twin = arena
                .try_get_mut(id)
                .and_then(|twin| twin.as_any_mut().downcast_mut::<C>());
            match twin {
                Some(twin) => command(twin),
                None => tracing::debug!(
                    target: targets::CORE_OBJECT,
                    ?id,
                    "core command skipped, twin missing"
                ),
            }
        })?;
        Ok(())
    }

    /// Run `command` against the twin and deliver its result.
    ///
    /// If the command is skipped, [`AsyncOp::wait`] returns `None`.
    pub fn queue_core_return_command<C, R, F>(&self, command: F) -> KeelResult<AsyncOp<R>>
    where
        C: CoreObjectCore,
        R: Send + 'static,
        F: FnOnce(&mut C) -> R + Send + 'static,
    {
        let (completer, op) = async_op_pair();
        self.queue_core_command::<C, _>(move |twin| completer.complete(command(twin)))?;
        Ok(op)
    }

    /// Forget the object and queue destruction of its twin.
    ///
    /// Idempotent. Called from `Drop` if the owner did not call it.
    pub fn destroy(&self) {
        if !self.state.mark_destroyed() {
            return;
        }
        if let Some(manager) = self.manager.upgrade() {
            manager.unregister_object(self.id);
        }
        if !self.state.is_scheduled_for_init() {
            return;
        }

        let id = self.id;
        let queued = self.core_thread.queue_command(move |arena| {
            arena.remove_and_destroy(id);
        });
        match queued {
            Ok(()) => tracing::trace!(target: targets::CORE_OBJECT, ?id, "twin destroy queued"),
            Err(err) => tracing::warn!(
                target: targets::CORE_OBJECT,
                ?id,
                error = %err,
                "could not queue twin destroy"
            ),
        }
    }
}

impl fmt::Debug for CoreObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreObject")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish()
    }
}

impl Drop for CoreObject {
    fn drop(&mut self) {
        self.destroy();
    }
}

static_assertions::assert_impl_all!(CoreObject: Send, Sync);
static_assertions::assert_impl_all!(CoreRuntime: Send, Sync, Clone);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_object::{CoreContext, CoreServices, CoreSyncData};
    use crate::render_target::RenderTargetManager;
    use parking_lot::Mutex;
    use std::time::Duration;

    struct Gauge {
        core: CoreObject,
        level: Mutex<u32>,
        fail_create: bool,
    }

    #[derive(Default)]
    struct GaugeCore {
        level: u32,
        initialized: bool,
    }

    impl CoreObjectCore for GaugeCore {
        fn initialize(&mut self, _ctx: &CoreContext<'_>) {
            self.initialized = true;
        }

        fn sync_to_core(&mut self, data: CoreSyncData) {
            if let Ok(level) = data.downcast::<u32>() {
                self.level = *level;
            }
        }
    }

    impl CoreObjectType for Gauge {
        fn core_object(&self) -> &CoreObject {
            &self.core
        }

        fn create_core(&self) -> KeelResult<Box<dyn CoreObjectCore>> {
            if self.fail_create {
                return Err(KeelError::CoreCreation("no device".to_string()));
            }
            Ok(Box::new(GaugeCore::default()))
        }

        fn capture_sync_data(&self) -> Option<CoreSyncData> {
            Some(Box::new(*self.level.lock()))
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

    fn gauge(runtime: &CoreRuntime, fail_create: bool) -> Arc<Gauge> {
        runtime.create(|core| Gauge {
            core,
            level: Mutex::new(0),
            fail_create,
        })
    }

    #[test]
    fn test_initialize_and_synchronize() {
        let runtime = runtime();
        let gauge = gauge(&runtime, false);
        assert!(!gauge.core.is_initialized());

        gauge.core.initialize().unwrap();
        gauge.core.synchronize();
        assert!(gauge.core.is_initialized());

        let token = gauge.core.core();
        let initialized = runtime
            .core_thread()
            .execute_sync(move |arena| arena.get_as::<GaugeCore>(&token).map(|c| c.initialized))
            .unwrap();
        assert_eq!(initialized, Some(true));

        drop(gauge);
        runtime.core_thread().flush().unwrap();
        assert_eq!(runtime.objects().live_object_count(), 0);
        let twins = runtime.core_thread().execute_sync(|arena| arena.len()).unwrap();
        assert_eq!(twins, 0);
    }

    #[test]
    fn test_second_initialize_fails() {
        let runtime = runtime();
        let gauge = gauge(&runtime, false);
        gauge.core.initialize().unwrap();
        let err = gauge.core.initialize().unwrap_err();
        assert!(matches!(err, KeelError::AlreadyInitialized(id) if id == gauge.core.id()));
    }

    #[test]
    fn test_create_core_error_propagates() {
        let runtime = runtime();
        let gauge = gauge(&runtime, true);
        let err = gauge.core.initialize().unwrap_err();
        assert!(matches!(err, KeelError::CoreCreation(_)));
        assert!(!gauge.core.state().is_scheduled_for_init());
    }

    #[test]
    fn test_initialize_after_destroy_fails() {
        let runtime = runtime();
        let gauge = gauge(&runtime, false);
        gauge.core.destroy();
        gauge.core.destroy();
        assert!(gauge.core.is_destroyed());
        assert!(matches!(
            gauge.core.initialize(),
            Err(KeelError::Destroyed(_))
        ));
        assert!(matches!(
            gauge.core.queue_core_command::<GaugeCore, _>(|_| {}),
            Err(KeelError::Destroyed(_))
        ));
    }

    #[test]
    fn test_initialize_on_stopped_core_thread() {
        let runtime = runtime();
        let gauge = gauge(&runtime, false);
        runtime.core_thread().stop_and_join();

        let err = gauge.core.initialize().unwrap_err();
        assert!(matches!(err, KeelError::CoreThread(_)));
        assert!(!gauge.core.state().is_scheduled_for_init());
    }

    #[test]
    fn test_core_return_command() {
        let runtime = runtime();
        let gauge = gauge(&runtime, false);
        gauge.core.initialize().unwrap();

        *gauge.level.lock() = 9;
        runtime.objects().sync_to_core(runtime.core_thread()).unwrap();

        let level = gauge
            .core
            .queue_core_return_command::<GaugeCore, _, _>(|twin| twin.level)
            .unwrap();
        assert_eq!(level.wait(), Some(9));

        let wrong_type = gauge
            .core
            .queue_core_return_command::<crate::render_target::RenderTextureCore, _, _>(|_| ())
            .unwrap();
        assert_eq!(wrong_type.wait(), None);
    }

    #[test]
    #[should_panic(expected = "never initialized")]
    fn test_synchronize_without_initialize_panics() {
        let runtime = runtime();
        let gauge = gauge(&runtime, false);
        gauge.core.synchronize();
    }

    #[test]
    fn test_synchronize_on_core_thread_panics() {
        let runtime = runtime();
        let gauge = gauge(&runtime, false);
        gauge.core.initialize().unwrap();
        gauge.core.synchronize();

        let probe = gauge.clone();
        let op = runtime
            .core_thread()
            .queue_return_command(move |_| {
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    probe.core.synchronize();
                }))
                .is_err()
            })
            .unwrap();
        assert_eq!(op.wait(), Some(true));
    }

    #[test]
    fn test_wait_initialized_with_timeout() {
        let runtime = runtime();
        let gauge = gauge(&runtime, false);
        assert!(!gauge.core.state().wait_initialized_timeout(Duration::from_millis(5)));
        gauge.core.initialize().unwrap();
        assert!(gauge.core.state().wait_initialized_timeout(Duration::from_secs(5)));
    }
}
