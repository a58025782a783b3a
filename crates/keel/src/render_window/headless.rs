//! A render window backend without an OS window.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use keel_core::Property;

use super::{RenderWindowCore, RenderWindowDesc, RenderWindowFactory};
use crate::core_object::{CoreContext, CoreObjectCore, CoreObjectId, CoreSyncData};
use crate::error::{KeelError, KeelResult};
use crate::render_target::{
    RenderTargetCore, RenderTargetCoreState, RenderTargetProperties, RenderTargetSyncData,
};

/// Creates [`HeadlessWindowCore`] twins.
///
/// Used by tools and tests. Geometry changes only through
/// [`RenderWindow`](super::RenderWindow) calls and the manager's platform
/// callbacks.
#[derive(Debug, Default)]
pub struct HeadlessWindowFactory {
    created: AtomicUsize,
}

impl HeadlessWindowFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of twins this factory has built.
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }
}

impl RenderWindowFactory for HeadlessWindowFactory {
    fn backend_name(&self) -> &str {
        "headless"
    }

    fn create_core(
        &self,
        desc: &RenderWindowDesc,
        sim_properties: Arc<Property<RenderTargetProperties>>,
        parent: Option<CoreObjectId>,
    ) -> KeelResult<Box<dyn CoreObjectCore>> {
        if desc.width == 0 || desc.height == 0 {
            return Err(KeelError::WindowCreation(format!(
                "window \"{}\" has an empty size {}x{}",
                desc.title, desc.width, desc.height
            )));
        }
        self.created.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(HeadlessWindowCore {
            state: RenderTargetCoreState::new(sim_properties),
            parent,
        }))
    }
}

/// Core-thread twin of a headless window.
pub struct HeadlessWindowCore {
    state: RenderTargetCoreState,
    parent: Option<CoreObjectId>,
}

impl HeadlessWindowCore {
    pub fn parent(&self) -> Option<CoreObjectId> {
        self.parent
    }
}

impl CoreObjectCore for HeadlessWindowCore {
    fn initialize(&mut self, ctx: &CoreContext<'_>) {
        self.state.register(ctx);
    }

    fn sync_to_core(&mut self, data: CoreSyncData) {
        if let Ok(data) = data.downcast::<RenderTargetSyncData>() {
            self.state.apply_sync(&data);
        }
    }

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

impl RenderTargetCore for HeadlessWindowCore {
    fn render_target_state(&self) -> &RenderTargetCoreState {
        &self.state
    }

    fn render_target_state_mut(&mut self) -> &mut RenderTargetCoreState {
        &mut self.state
    }
}

impl RenderWindowCore for HeadlessWindowCore {
    fn resize(&mut self, width: u32, height: u32) {
        self.state.update(|props| {
            props.width = width;
            props.height = height;
        });
    }

    fn move_to(&mut self, left: i32, top: i32) {
        self.state.update(|props| {
            if let Some(window) = props.window.as_mut() {
                window.left = left;
                window.top = top;
            }
        });
    }

    fn set_hidden(&mut self, hidden: bool) {
        self.state.update(|props| {
            if let Some(window) = props.window.as_mut() {
                window.is_hidden = hidden;
            }
        });
    }
}
