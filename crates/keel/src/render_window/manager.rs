//! Delivery of platform window events from the core thread to the sim thread.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use keel_core::Signal;
use keel_core::logging::targets;

use super::{PlatformWindowEvent, RenderWindow, RenderWindowDesc, RenderWindowFactory};
use crate::core_object::{CoreArena, CoreObjectId, CoreObjectType, CoreRuntime};
use crate::error::KeelResult;

/// Events recorded since the last [`RenderWindowManager::update`].
#[derive(Default)]
struct PendingEvents {
    focus_changed: bool,
    moved_or_resized: Vec<CoreObjectId>,
    mouse_left: Vec<CoreObjectId>,
    close_requested: Vec<CoreObjectId>,
}

impl PendingEvents {
    fn forget(&mut self, id: CoreObjectId) {
        self.moved_or_resized.retain(|other| *other != id);
        self.mouse_left.retain(|other| *other != id);
        self.close_requested.retain(|other| *other != id);
    }
}

fn record_once(list: &mut Vec<CoreObjectId>, id: CoreObjectId) {
    if !list.contains(&id) {
        list.push(id);
    }
}

#[derive(Default)]
struct WindowState {
    created: HashMap<CoreObjectId, Weak<RenderWindow>>,
    /// Focus target as last reported by the platform.
    core_focus: Option<CoreObjectId>,
    /// Focus target as last delivered to the sim side.
    sim_focus: Option<CoreObjectId>,
    pending: PendingEvents,
}

impl WindowState {
    fn upgrade(&self, id: CoreObjectId) -> Option<Arc<RenderWindow>> {
        self.created.get(&id).and_then(Weak::upgrade)
    }

    fn upgrade_all(&self, ids: &[CoreObjectId]) -> Vec<Arc<RenderWindow>> {
        ids.iter().filter_map(|id| self.upgrade(*id)).collect()
    }
}

/// Everything [`RenderWindowManager::update`] delivers in one frame.
#[derive(Default)]
struct FrameEvents {
    focus_lost: Option<Arc<RenderWindow>>,
    focus_gained: Option<Arc<RenderWindow>>,
    resized: Vec<Arc<RenderWindow>>,
    mouse_left: Vec<Arc<RenderWindow>>,
    close_requested: Vec<Arc<RenderWindow>>,
}

/// Tracks render windows and delivers their platform events once per frame.
///
/// Platform callbacks (`window_*`) run on the core thread and only record
/// events under the manager lock. [`update`](Self::update) runs on the sim
/// thread, takes the recorded events and fires the signals with the lock
/// released, so listeners may call back into the manager.
pub struct RenderWindowManager {
    state: Mutex<WindowState>,
    factory: Arc<dyn RenderWindowFactory>,
    /// Emitted when a window gains focus.
    pub on_focus_gained: Signal<Arc<RenderWindow>>,
    /// Emitted when a window loses focus.
    pub on_focus_lost: Signal<Arc<RenderWindow>>,
    /// Emitted when the mouse leaves a window.
    pub on_mouse_left_window: Signal<Arc<RenderWindow>>,
}

impl RenderWindowManager {
    pub fn new(factory: Arc<dyn RenderWindowFactory>) -> Self {
        Self {
            state: Mutex::new(WindowState::default()),
            factory,
            on_focus_gained: Signal::new(),
            on_focus_lost: Signal::new(),
            on_mouse_left_window: Signal::new(),
        }
    }

    pub fn factory(&self) -> &Arc<dyn RenderWindowFactory> {
        &self.factory
    }

    /// Create a window and queue construction of its twin.
    ///
    /// Sim thread only.
    #[tracing::instrument(skip_all, target = "keel::render_window", level = "debug", fields(title = %desc.title))]
    pub fn create(
        self: &Arc<Self>,
        runtime: &CoreRuntime,
        desc: RenderWindowDesc,
        parent: Option<&RenderWindow>,
    ) -> KeelResult<Arc<RenderWindow>> {
        let parent = parent.map(RenderWindow::id);
        let factory = self.factory.clone();
        let manager = Arc::downgrade(self);
        let window = runtime.create(|core| RenderWindow::new(core, desc, parent, factory, manager));
        window.core_object().initialize()?;

        self.state
            .lock()
            .created
            .insert(window.id(), Arc::downgrade(&window));
        window.mark_registered();

        tracing::debug!(
            target: targets::RENDER_WINDOW,
            id = ?window.id(),
            backend = self.factory.backend_name(),
            "render window created"
        );
        Ok(window)
    }

    /// Forget a window and drop its pending events.
    ///
    /// # Panics
    ///
    /// Panics if the window is not known to this manager.
    #[track_caller]
    pub fn window_destroyed(&self, id: CoreObjectId) {
        let mut state = self.state.lock();
        if state.created.remove(&id).is_none() {
            drop(state);
            panic!("window_destroyed called for unknown render window {id:?}");
        }
        state.pending.forget(id);
        if state.core_focus == Some(id) {
            state.core_focus = None;
            state.pending.focus_changed = true;
        }
        if state.sim_focus == Some(id) {
            state.sim_focus = None;
        }
        tracing::debug!(target: targets::RENDER_WINDOW, ?id, "render window destroyed");
    }

    fn is_known(&self, id: CoreObjectId) -> bool {
        self.state.lock().created.contains_key(&id)
    }

    /// Run `record` under the state lock if the window is still known.
    fn record_if_known<F>(&self, id: CoreObjectId, record: F)
    where
        F: FnOnce(&mut WindowState),
    {
        let mut state = self.state.lock();
        if state.created.contains_key(&id) {
            record(&mut state);
        }
    }

    /// Platform callback: a window received focus. Core thread only.
    pub fn window_focus_received(&self, arena: &mut CoreArena, id: CoreObjectId) {
        if !self.is_known(id) {
            tracing::debug!(
                target: targets::RENDER_WINDOW,
                ?id,
                "focus event for unknown window dropped"
            );
            return;
        }
        if let Some(twin) = arena.render_window_mut(id) {
            twin.focus_received();
        }

        self.record_if_known(id, |state| {
            state.core_focus = Some(id);
            state.pending.focus_changed = true;
        });
    }

    /// Platform callback: a window lost focus. Core thread only.
    pub fn window_focus_lost(&self, arena: &mut CoreArena, id: CoreObjectId) {
        if !self.is_known(id) {
            tracing::debug!(
                target: targets::RENDER_WINDOW,
                ?id,
                "focus event for unknown window dropped"
            );
            return;
        }
        if let Some(twin) = arena.render_window_mut(id) {
            twin.focus_lost();
        }

        self.record_if_known(id, |state| {
            if state.core_focus == Some(id) {
                state.core_focus = None;
                state.pending.focus_changed = true;
            }
        });
    }

    /// Platform callback: a window moved or resized. Core thread only.
    ///
    /// Recorded at most once per frame.
    pub fn window_moved_or_resized(&self, arena: &mut CoreArena, id: CoreObjectId) {
        if !self.is_known(id) {
            return;
        }
        if let Some(twin) = arena.render_window_mut(id) {
            twin.moved_or_resized();
        }
        self.record_if_known(id, |state| record_once(&mut state.pending.moved_or_resized, id));
    }

    /// Platform callback: the mouse left a window.
    pub fn window_mouse_left(&self, id: CoreObjectId) {
        self.record_if_known(id, |state| record_once(&mut state.pending.mouse_left, id));
    }

    /// Platform callback: the user asked to close a window.
    pub fn window_close_requested(&self, id: CoreObjectId) {
        self.record_if_known(id, |state| record_once(&mut state.pending.close_requested, id));
    }

    /// Route a platform notification to the matching callback. Core thread
    /// only.
    pub fn handle_platform_event(
        &self,
        arena: &mut CoreArena,
        id: CoreObjectId,
        event: PlatformWindowEvent,
    ) {
        match event {
            PlatformWindowEvent::FocusReceived => self.window_focus_received(arena, id),
            PlatformWindowEvent::FocusLost => self.window_focus_lost(arena, id),
            PlatformWindowEvent::MovedOrResized => self.window_moved_or_resized(arena, id),
            PlatformWindowEvent::MouseLeft => self.window_mouse_left(id),
            PlatformWindowEvent::CloseRequested => self.window_close_requested(id),
        }
    }

    /// Deliver the events recorded since the previous call.
    ///
    /// Sim thread only, once per frame. Focus changes are reduced to their
    /// net effect: focus lost on the previously focused window, then focus
    /// gained on the new one. Returns the number of events delivered.
    #[tracing::instrument(skip_all, target = "keel::render_window", level = "trace")]
    pub fn update(&self) -> usize {
        let events = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let pending = std::mem::take(&mut state.pending);
            let mut events = FrameEvents::default();

            if pending.focus_changed && state.core_focus != state.sim_focus {
                let old = std::mem::replace(&mut state.sim_focus, state.core_focus);
                events.focus_lost = old.and_then(|id| state.upgrade(id));
                events.focus_gained = state.sim_focus.and_then(|id| state.upgrade(id));
            }
            events.resized = state.upgrade_all(&pending.moved_or_resized);
            events.mouse_left = state.upgrade_all(&pending.mouse_left);
            events.close_requested = state.upgrade_all(&pending.close_requested);
            events
        };

        let mut delivered = 0;
        if let Some(window) = events.focus_lost {
            self.on_focus_lost.emit(window);
            delivered += 1;
        }
        if let Some(window) = events.focus_gained {
            self.on_focus_gained.emit(window);
            delivered += 1;
        }
        for window in events.resized {
            window.on_resized.emit(window.properties().size());
            delivered += 1;
        }
        for window in events.mouse_left {
            self.on_mouse_left_window.emit(window);
            delivered += 1;
        }
        for window in events.close_requested {
            window.on_close_requested.emit(());
            delivered += 1;
        }
        delivered
    }

    /// Every live window.
    pub fn windows(&self) -> Vec<Arc<RenderWindow>> {
        let state = self.state.lock();
        state.created.values().filter_map(Weak::upgrade).collect()
    }

    /// The window in focus as of the last [`update`](Self::update).
    pub fn window_in_focus(&self) -> Option<Arc<RenderWindow>> {
        let state = self.state.lock();
        state.sim_focus.and_then(|id| state.upgrade(id))
    }

    pub fn window_count(&self) -> usize {
        self.state.lock().created.len()
    }
}

impl fmt::Debug for RenderWindowManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderWindowManager")
            .field("backend", &self.factory.backend_name())
            .field("windows", &self.window_count())
            .finish()
    }
}

static_assertions::assert_impl_all!(RenderWindowManager: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_object::{
        CoreContext, CoreObjectCore, CoreObjectManager, CoreServices, CoreSyncData,
        CoreThreadHandle,
    };
    use crate::render_target::{
        RenderTargetCore, RenderTargetCoreState, RenderTargetManager, RenderTargetProperties,
    };
    use crate::render_window::{HeadlessWindowFactory, RenderWindowCore};
    use keel_core::{Latch, Property};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        runtime: CoreRuntime,
        windows: Arc<RenderWindowManager>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_factory(Arc::new(HeadlessWindowFactory::new()))
        }

        fn with_factory(factory: Arc<dyn RenderWindowFactory>) -> Self {
            let services = CoreServices::new(Arc::new(RenderTargetManager::new()));
            let core_thread =
                Arc::new(CoreThreadHandle::new(move || CoreArena::new(services)).unwrap());
            Self {
                runtime: CoreRuntime::new(core_thread, Arc::new(CoreObjectManager::new())),
                windows: Arc::new(RenderWindowManager::new(factory)),
            }
        }

        fn window(&self, title: &str) -> Arc<RenderWindow> {
            self.windows
                .create(&self.runtime, RenderWindowDesc::new(title, 640, 480), None)
                .unwrap()
        }

        fn on_core<F>(&self, f: F)
        where
            F: FnOnce(&mut CoreArena, &RenderWindowManager) + Send + 'static,
        {
            let windows = self.windows.clone();
            self.runtime
                .core_thread()
                .execute_sync(move |arena| f(arena, &windows))
                .unwrap();
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            self.runtime.core_thread().stop_and_join();
        }
    }

    /// Builds twins whose platform hooks block until `release` is set.
    #[derive(Default)]
    struct StallingFactory {
        entered: Latch,
        release: Latch,
    }

    struct StallingWindowCore {
        state: RenderTargetCoreState,
        entered: Latch,
        release: Latch,
    }

    impl StallingWindowCore {
        fn stall(&self) {
            self.entered.set();
            self.release.wait();
        }
    }

    impl RenderWindowFactory for StallingFactory {
        fn backend_name(&self) -> &str {
            "stalling"
        }

        fn create_core(
            &self,
            _desc: &RenderWindowDesc,
            sim_properties: Arc<Property<RenderTargetProperties>>,
            _parent: Option<CoreObjectId>,
        ) -> KeelResult<Box<dyn CoreObjectCore>> {
            Ok(Box::new(StallingWindowCore {
                state: RenderTargetCoreState::new(sim_properties),
                entered: self.entered.clone(),
                release: self.release.clone(),
            }))
        }
    }

    impl CoreObjectCore for StallingWindowCore {
        fn initialize(&mut self, ctx: &CoreContext<'_>) {
            self.state.register(ctx);
        }

        fn sync_to_core(&mut self, _data: CoreSyncData) {}

        fn destroy(&mut self, ctx: &CoreContext<'_>) {
            self.state.unregister(ctx);
        }

        fn as_render_target_mut(&mut self) -> Option<&mut dyn RenderTargetCore> {
            Some(self)
        }

        fn as_render_window_mut(&mut self) -> Option<&mut dyn RenderWindowCore> {
            Some(self)
        }
    }

    impl RenderTargetCore for StallingWindowCore {
        fn render_target_state(&self) -> &RenderTargetCoreState {
            &self.state
        }

        fn render_target_state_mut(&mut self) -> &mut RenderTargetCoreState {
            &mut self.state
        }
    }

    impl RenderWindowCore for StallingWindowCore {
        fn resize(&mut self, _width: u32, _height: u32) {}

        fn move_to(&mut self, _left: i32, _top: i32) {}

        fn set_hidden(&mut self, _hidden: bool) {}

        fn focus_received(&mut self) {
            self.stall();
        }

        fn moved_or_resized(&mut self) {
            self.stall();
        }
    }

    fn counter<T: 'static>(signal: &Signal<T>) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let slot = count.clone();
        signal.connect(move |_| {
            slot.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    #[test]
    fn test_focus_is_coalesced_to_net_effect() {
        let fixture = Fixture::new();
        let a = fixture.window("a");
        let b = fixture.window("b");
        let gained = counter(&fixture.windows.on_focus_gained);
        let lost = counter(&fixture.windows.on_focus_lost);

        let (a_id, b_id) = (a.id(), b.id());
        fixture.on_core(move |arena, windows| {
            windows.window_focus_received(arena, a_id);
            windows.window_focus_lost(arena, a_id);
            windows.window_focus_received(arena, b_id);
        });

        assert_eq!(fixture.windows.update(), 1);
        assert_eq!(gained.load(Ordering::SeqCst), 1);
        assert_eq!(lost.load(Ordering::SeqCst), 0);
        assert_eq!(fixture.windows.window_in_focus().map(|w| w.id()), Some(b_id));

        // Gained and lost again within one frame: no net change.
        fixture.on_core(move |arena, windows| {
            windows.window_focus_lost(arena, b_id);
            windows.window_focus_received(arena, b_id);
        });
        assert_eq!(fixture.windows.update(), 0);

        fixture.on_core(move |arena, windows| {
            windows.window_focus_received(arena, a_id);
        });
        assert_eq!(fixture.windows.update(), 2);
        assert_eq!(lost.load(Ordering::SeqCst), 1);
        assert_eq!(gained.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_focus_lost_of_other_window_is_ignored() {
        let fixture = Fixture::new();
        let a = fixture.window("a");
        let b = fixture.window("b");
        let (a_id, b_id) = (a.id(), b.id());

        fixture.on_core(move |arena, windows| {
            windows.window_focus_received(arena, a_id);
            windows.window_focus_lost(arena, b_id);
        });
        fixture.windows.update();
        assert_eq!(fixture.windows.window_in_focus().map(|w| w.id()), Some(a_id));
    }

    #[test]
    fn test_resize_recorded_once_per_frame() {
        let fixture = Fixture::new();
        let window = fixture.window("main");
        let resized = Arc::new(Mutex::new(Vec::new()));
        let sink = resized.clone();
        window.on_resized.connect(move |size| sink.lock().push(*size));

        let id = window.id();
        fixture.on_core(move |arena, windows| {
            windows.window_moved_or_resized(arena, id);
            windows.window_moved_or_resized(arena, id);
        });

        assert_eq!(fixture.windows.update(), 1);
        assert_eq!(fixture.windows.update(), 0);
        assert_eq!(resized.lock().as_slice(), &[(640, 480)]);
    }

    #[test]
    fn test_mouse_left_and_close_requested() {
        let fixture = Fixture::new();
        let window = fixture.window("main");
        let mouse_left = counter(&fixture.windows.on_mouse_left_window);
        let close = counter(&window.on_close_requested);

        fixture.windows.window_mouse_left(window.id());
        fixture.windows.window_mouse_left(window.id());
        fixture.windows.window_close_requested(window.id());

        assert_eq!(fixture.windows.update(), 2);
        assert_eq!(mouse_left.load(Ordering::SeqCst), 1);
        assert_eq!(close.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_destroyed_window_drops_pending_events() {
        let fixture = Fixture::new();
        let window = fixture.window("main");
        let id = window.id();
        fixture.on_core(move |arena, windows| {
            windows.window_focus_received(arena, id);
            windows.window_moved_or_resized(arena, id);
        });
        fixture.windows.window_close_requested(id);

        drop(window);
        assert_eq!(fixture.windows.window_count(), 0);
        assert_eq!(fixture.windows.update(), 0);
        assert!(fixture.windows.window_in_focus().is_none());

        // Events for a window that is gone are ignored.
        fixture.windows.window_mouse_left(id);
        fixture.on_core(move |arena, windows| windows.window_focus_received(arena, id));
        assert_eq!(fixture.windows.update(), 0);
    }

    #[test]
    fn test_window_destroyed_during_platform_callback_is_not_recorded() {
        let factory = Arc::new(StallingFactory::default());
        let fixture = Fixture::with_factory(factory.clone());
        let window = fixture.window("main");
        let id = window.id();

        let windows = fixture.windows.clone();
        fixture
            .runtime
            .core_thread()
            .queue_command(move |arena| {
                windows.window_focus_received(arena, id);
                windows.window_moved_or_resized(arena, id);
            })
            .unwrap();

        // The core thread is inside the twin's focus hook.
        factory.entered.wait();
        drop(window);
        factory.release.set();
        fixture.runtime.core_thread().flush().unwrap();

        {
            let state = fixture.windows.state.lock();
            assert!(state.core_focus.is_none());
            assert!(state.pending.moved_or_resized.is_empty());
        }
        assert_eq!(fixture.windows.update(), 0);
        assert!(fixture.windows.window_in_focus().is_none());
    }

    #[test]
    #[should_panic(expected = "unknown render window")]
    fn test_destroying_unknown_window_panics() {
        let windows = RenderWindowManager::new(Arc::new(HeadlessWindowFactory::new()));
        let mut keys = slotmap::SlotMap::<CoreObjectId, ()>::with_key();
        windows.window_destroyed(keys.insert(()));
    }

    #[test]
    fn test_listener_may_reenter_manager() {
        let fixture = Fixture::new();
        let window = fixture.window("main");
        let manager = Arc::downgrade(&fixture.windows);
        let seen = Arc::new(AtomicUsize::new(0));
        let slot = seen.clone();
        fixture.windows.on_mouse_left_window.connect(move |_| {
            if let Some(manager) = manager.upgrade() {
                slot.store(manager.windows().len(), Ordering::SeqCst);
            }
        });

        fixture.windows.window_mouse_left(window.id());
        fixture.windows.update();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
