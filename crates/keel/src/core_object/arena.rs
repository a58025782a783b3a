//! Core-thread ownership of twins.

use std::fmt;
use std::sync::Arc;

use slotmap::SecondaryMap;

use keel_core::logging::targets;

use super::{CoreObjectCore, CoreObjectId, CoreSyncData, SyncedState};
use crate::render_target::{RenderTargetCore, RenderTargetManager};
use crate::render_window::RenderWindowCore;

/// Subsystems reachable from core-thread hooks.
#[derive(Clone)]
pub struct CoreServices {
    render_targets: Arc<RenderTargetManager>,
}

impl CoreServices {
    pub fn new(render_targets: Arc<RenderTargetManager>) -> Self {
        Self { render_targets }
    }

    pub fn render_targets(&self) -> &Arc<RenderTargetManager> {
        &self.render_targets
    }
}

/// Passed to [`CoreObjectCore::initialize`] and [`CoreObjectCore::destroy`].
pub struct CoreContext<'a> {
    id: CoreObjectId,
    services: &'a CoreServices,
}

impl<'a> CoreContext<'a> {
    /// The id of the twin being initialized or destroyed.
    pub fn id(&self) -> CoreObjectId {
        self.id
    }

    pub fn services(&self) -> &'a CoreServices {
        self.services
    }

    pub fn render_targets(&self) -> &'a RenderTargetManager {
        &self.services.render_targets
    }
}

/// An opaque reference to a twin, held by the sim side.
///
/// Resolves only through a [`CoreArena`], which is only reachable from
/// commands executing on the core thread. Resolving a token whose twin is not
/// initialized yet is a programming error and panics.
#[derive(Clone)]
pub struct CoreToken {
    id: CoreObjectId,
    state: Arc<SyncedState>,
}

impl CoreToken {
    pub(crate) fn new(id: CoreObjectId, state: Arc<SyncedState>) -> Self {
        Self { id, state }
    }

    pub fn id(&self) -> CoreObjectId {
        self.id
    }

    /// Whether the twin behind this token has been initialized.
    pub fn is_initialized(&self) -> bool {
        self.state.is_initialized()
    }
}

impl fmt::Debug for CoreToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreToken")
            .field("id", &self.id)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

/// Store of every live twin, owned by the core thread.
///
/// The arena is the core thread's state: commands receive `&mut CoreArena`.
pub struct CoreArena {
    twins: SecondaryMap<CoreObjectId, Box<dyn CoreObjectCore>>,
    services: CoreServices,
}

impl CoreArena {
    pub fn new(services: CoreServices) -> Self {
        Self {
            twins: SecondaryMap::new(),
            services,
        }
    }

    pub fn services(&self) -> &CoreServices {
        &self.services
    }

    /// Number of live twins.
    pub fn len(&self) -> usize {
        self.twins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.twins.is_empty()
    }

    pub fn contains(&self, id: CoreObjectId) -> bool {
        self.twins.contains_key(id)
    }

    /// Run the twin's `initialize` hook and take ownership of it.
    pub(crate) fn insert_and_initialize(
        &mut self,
        id: CoreObjectId,
        mut twin: Box<dyn CoreObjectCore>,
    ) {
        let ctx = CoreContext {
            id,
            services: &self.services,
        };
        twin.initialize(&ctx);
        self.twins.insert(id, twin);
        tracing::trace!(target: targets::CORE_OBJECT, ?id, "twin initialized");
    }

    /// Run the twin's `destroy` hook and drop it.
    ///
    /// Returns `false` if no twin exists for `id`.
    pub(crate) fn remove_and_destroy(&mut self, id: CoreObjectId) -> bool {
        let Some(mut twin) = self.twins.remove(id) else {
            return false;
        };
        let ctx = CoreContext {
            id,
            services: &self.services,
        };
        twin.destroy(&ctx);
        tracing::trace!(target: targets::CORE_OBJECT, ?id, "twin destroyed");
        true
    }

    /// Apply a sync snapshot. Returns `false` if the twin is gone.
    pub(crate) fn sync(&mut self, id: CoreObjectId, data: CoreSyncData) -> bool {
        match self.twins.get_mut(id) {
            Some(twin) => {
                twin.sync_to_core(data);
                true
            }
            None => false,
        }
    }

    #[track_caller]
    fn assert_initialized(&self, token: &CoreToken) {
        if !token.is_initialized() || !self.twins.contains_key(token.id) {
            panic!(
                "core object {:?} accessed on the core thread before it was initialized",
                token.id
            );
        }
    }

    /// Resolve a token.
    ///
    /// # Panics
    ///
    /// Panics if the twin has not been initialized, or has been destroyed.
    #[track_caller]
    pub fn get(&self, token: &CoreToken) -> &dyn CoreObjectCore {
        self.assert_initialized(token);
        match self.twins.get(token.id) {
            Some(twin) => twin.as_ref(),
            None => unreachable!("checked by assert_initialized"),
        }
    }

    /// Resolve a token mutably.
    ///
    /// # Panics
    ///
    /// Panics if the twin has not been initialized, or has been destroyed.
    #[track_caller]
    pub fn get_mut(&mut self, token: &CoreToken) -> &mut dyn CoreObjectCore {
        self.assert_initialized(token);
        match self.twins.get_mut(token.id) {
            Some(twin) => twin.as_mut(),
            None => unreachable!("checked by assert_initialized"),
        }
    }

    /// Resolve a token to a concrete twin type.
    ///
    /// Returns `None` if the twin has a different type.
    #[track_caller]
    pub fn get_as<T: CoreObjectCore>(&self, token: &CoreToken) -> Option<&T> {
        self.get(token).as_any().downcast_ref::<T>()
    }

    /// Resolve a token mutably to a concrete twin type.
    #[track_caller]
    pub fn get_as_mut<T: CoreObjectCore>(&mut self, token: &CoreToken) -> Option<&mut T> {
        self.get_mut(token).as_any_mut().downcast_mut::<T>()
    }

    /// Look up a twin by id without the initialization assertion.
    pub fn try_get_mut(&mut self, id: CoreObjectId) -> Option<&mut dyn CoreObjectCore> {
        self.twins.get_mut(id).map(|twin| twin.as_mut())
    }

    /// The render-target view of a twin, if it exists and is one.
    pub fn render_target_mut(&mut self, id: CoreObjectId) -> Option<&mut dyn RenderTargetCore> {
        self.try_get_mut(id)?.as_render_target_mut()
    }

    /// The render-window view of a twin, if it exists and is one.
    pub fn render_window_mut(&mut self, id: CoreObjectId) -> Option<&mut dyn RenderWindowCore> {
        self.try_get_mut(id)?.as_render_window_mut()
    }
}

impl fmt::Debug for CoreArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreArena")
            .field("twins", &self.twins.len())
            .finish()
    }
}

impl Drop for CoreArena {
    fn drop(&mut self) {
        if !self.twins.is_empty() {
            tracing::warn!(
                target: targets::CORE_OBJECT,
                count = self.twins.len(),
                "core arena dropped with live twins"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use slotmap::SlotMap;

    struct Probe {
        log: Arc<Mutex<Vec<String>>>,
        value: u32,
    }

    impl CoreObjectCore for Probe {
        fn initialize(&mut self, ctx: &CoreContext<'_>) {
            self.log.lock().push(format!("init {:?}", ctx.id()));
        }

        fn sync_to_core(&mut self, data: CoreSyncData) {
            if let Ok(value) = data.downcast::<u32>() {
                self.value = *value;
            }
        }

        fn destroy(&mut self, ctx: &CoreContext<'_>) {
            self.log.lock().push(format!("destroy {:?}", ctx.id()));
        }
    }

    fn arena() -> CoreArena {
        CoreArena::new(CoreServices::new(Arc::new(RenderTargetManager::new())))
    }

    fn new_id() -> CoreObjectId {
        let mut ids = SlotMap::<CoreObjectId, ()>::with_key();
        ids.insert(())
    }

    #[test]
    fn test_insert_sync_remove() {
        let mut arena = arena();
        let log = Arc::new(Mutex::new(Vec::new()));
        let id = new_id();
        let state = Arc::new(SyncedState::new());

        arena.insert_and_initialize(
            id,
            Box::new(Probe {
                log: log.clone(),
                value: 0,
            }),
        );
        state.mark_initialized();
        let token = CoreToken::new(id, state);

        assert!(arena.contains(id));
        assert!(arena.sync(id, Box::new(7u32)));
        assert_eq!(arena.get_as::<Probe>(&token).map(|p| p.value), Some(7));

        assert!(arena.remove_and_destroy(id));
        assert!(!arena.remove_and_destroy(id));
        assert!(!arena.sync(id, Box::new(1u32)));
        assert!(arena.is_empty());
        assert_eq!(log.lock().len(), 2);
    }

    #[test]
    #[should_panic(expected = "before it was initialized")]
    fn test_uninitialized_token_is_rejected() {
        let arena = arena();
        let token = CoreToken::new(new_id(), Arc::new(SyncedState::new()));
        let _ = arena.get(&token);
    }

    #[test]
    #[should_panic(expected = "before it was initialized")]
    fn test_flagged_but_missing_twin_is_rejected() {
        let mut arena = arena();
        let state = Arc::new(SyncedState::new());
        state.mark_initialized();
        let token = CoreToken::new(new_id(), state);
        let _ = arena.get_mut(&token);
    }

    #[test]
    fn test_downcast_to_wrong_type() {
        struct Other;
        impl CoreObjectCore for Other {}

        let mut arena = arena();
        let id = new_id();
        let state = Arc::new(SyncedState::new());
        arena.insert_and_initialize(id, Box::new(Other));
        state.mark_initialized();
        let token = CoreToken::new(id, state);

        assert!(arena.get_as::<Probe>(&token).is_none());
        assert!(arena.get_as_mut::<Other>(&token).is_some());
        assert!(arena.render_target_mut(id).is_none());
        assert!(arena.render_window_mut(id).is_none());
        arena.remove_and_destroy(id);
    }
}
