//! The sim-side render window object.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use keel_core::logging::targets;
use keel_core::{Property, Signal};

use super::{RenderWindowDesc, RenderWindowFactory, RenderWindowManager};
use crate::core_object::{
    CoreArena, CoreObject, CoreObjectCore, CoreObjectId, CoreObjectType, CoreSyncData,
};
use crate::error::{KeelError, KeelResult};
use crate::render_target::{RenderTargetProperties, RenderTargetSyncData};
use crate::render_window::RenderWindowCore;

/// A render target backed by a window.
///
/// Created by [`RenderWindowManager::create`]. Geometry and focus live on the
/// twin; the sim side sees them through [`properties`](Self::properties), one
/// frame late.
pub struct RenderWindow {
    core: CoreObject,
    desc: RenderWindowDesc,
    parent: Option<CoreObjectId>,
    properties: Arc<Property<RenderTargetProperties>>,
    factory: Arc<dyn RenderWindowFactory>,
    manager: Weak<RenderWindowManager>,
    registered: AtomicBool,
    /// Emitted with the new size after the window moved or resized.
    pub on_resized: Signal<(u32, u32)>,
    /// Emitted when the user asked to close the window.
    pub on_close_requested: Signal<()>,
}

impl RenderWindow {
    pub(crate) fn new(
        core: CoreObject,
        desc: RenderWindowDesc,
        parent: Option<CoreObjectId>,
        factory: Arc<dyn RenderWindowFactory>,
        manager: Weak<RenderWindowManager>,
    ) -> Self {
        Self {
            core,
            properties: Arc::new(Property::new(desc.properties())),
            desc,
            parent,
            factory,
            manager,
            registered: AtomicBool::new(false),
            on_resized: Signal::new(),
            on_close_requested: Signal::new(),
        }
    }

    pub fn id(&self) -> CoreObjectId {
        self.core.id()
    }

    pub fn desc(&self) -> &RenderWindowDesc {
        &self.desc
    }

    pub fn parent(&self) -> Option<CoreObjectId> {
        self.parent
    }

    /// The sim-visible properties as of the last frame.
    pub fn properties(&self) -> RenderTargetProperties {
        self.properties.get()
    }

    pub fn sim_properties(&self) -> &Arc<Property<RenderTargetProperties>> {
        &self.properties
    }

    pub fn has_focus(&self) -> bool {
        self.properties.with(|props| props.has_focus())
    }

    pub(crate) fn mark_registered(&self) {
        self.registered.store(true, Ordering::Release);
    }

    /// Change the render priority; reaches the twin with the next sync pass.
    pub fn set_priority(&self, priority: i32) {
        self.properties.update(|props| props.priority = priority);
        self.core.mark_core_dirty();
    }

    /// Resize the window.
    ///
    /// Applied on the core thread and reported like an OS resize.
    pub fn resize(&self, width: u32, height: u32) -> KeelResult<()> {
        self.queue_window_command(move |twin| twin.resize(width, height), true)
    }

    /// Move the window.
    pub fn move_to(&self, left: i32, top: i32) -> KeelResult<()> {
        self.queue_window_command(move |twin| twin.move_to(left, top), true)
    }

    pub fn set_hidden(&self, hidden: bool) -> KeelResult<()> {
        self.queue_window_command(move |twin| twin.set_hidden(hidden), false)
    }

    fn queue_window_command<F>(&self, command: F, notify_moved: bool) -> KeelResult<()>
    where
        F: FnOnce(&mut dyn RenderWindowCore) + Send + 'static,
    {
        if self.core.is_destroyed() {
            return Err(KeelError::Destroyed(self.id()));
        }
        let id = self.id();
        let manager = self.manager.clone();
        self.core
            .core_thread()
            .queue_command(move |arena: &mut CoreArena| {
                match arena.render_window_mut(id) {
                    Some(twin) => command(twin),
                    None => {
                        tracing::debug!(
                            target: targets::RENDER_WINDOW,
                            ?id,
                            "window command skipped, twin missing"
                        );
                        return;
                    }
                }
                if notify_moved && let Some(manager) = manager.upgrade() {
                    manager.window_moved_or_resized(arena, id);
                }
            })?;
        Ok(())
    }

    /// Destroy the window. Idempotent; also called on drop.
    pub fn destroy(&self) {
        if self.registered.swap(false, Ordering::AcqRel)
            && let Some(manager) = self.manager.upgrade()
        {
            manager.window_destroyed(self.id());
        }
        self.core.destroy();
    }
}

impl CoreObjectType for RenderWindow {
    fn core_object(&self) -> &CoreObject {
        &self.core
    }

    fn create_core(&self) -> KeelResult<Box<dyn CoreObjectCore>> {
        self.factory
            .create_core(&self.desc, self.properties.clone(), self.parent)
    }

    fn capture_sync_data(&self) -> Option<CoreSyncData> {
        let priority = self.properties.with(|props| props.priority);
        Some(Box::new(RenderTargetSyncData { priority }))
    }

    fn type_name(&self) -> &'static str {
        "RenderWindow"
    }
}

impl fmt::Debug for RenderWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderWindow")
            .field("id", &self.id())
            .field("title", &self.desc.title)
            .field("backend", &self.factory.backend_name())
            .finish()
    }
}

impl Drop for RenderWindow {
    fn drop(&mut self) {
        self.destroy();
    }
}
