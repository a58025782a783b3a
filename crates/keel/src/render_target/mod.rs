//! Render targets and the manager that relays their properties to the sim
//! thread.
//!
//! A render target's properties (size, vsync, window geometry and focus) are
//! owned by its core-thread twin, which changes them in response to backend
//! events. The sim thread reads them through a shared
//! [`Property<RenderTargetProperties>`](keel_core::Property) that the
//! [`RenderTargetManager`] refreshes once per frame:
//!
//! 1. the twin edits its [`RenderTargetCoreState`], which marks it core-dirty
//! 2. [`RenderTargetManager::update_core`] (core thread) copies dirty
//!    properties into per-target snapshots
//! 3. [`RenderTargetManager::update`] (sim thread) publishes the snapshots
//!
//! # Related
//!
//! - [`RenderTexture`]: an off-screen render target
//! - [`crate::render_window`]: render targets backed by a window

mod manager;
mod render_texture;

use std::sync::Arc;

use keel_core::Property;

use crate::core_object::CoreContext;

pub use manager::RenderTargetManager;
pub use render_texture::{RenderTexture, RenderTextureCore, RenderTextureDesc};

/// Window-specific render target state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WindowProperties {
    pub left: i32,
    pub top: i32,
    pub has_focus: bool,
    pub is_fullscreen: bool,
    pub is_hidden: bool,
    pub is_maximized: bool,
    pub title: String,
}

/// Properties shared by every render target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderTargetProperties {
    pub width: u32,
    pub height: u32,
    pub hw_gamma: bool,
    pub multisample_count: u32,
    pub vsync: bool,
    pub vsync_interval: u32,
    /// Higher priority targets render first.
    pub priority: i32,
    pub requires_texture_flipping: bool,
    /// Present for window render targets only.
    pub window: Option<WindowProperties>,
}

impl Default for RenderTargetProperties {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            hw_gamma: false,
            multisample_count: 1,
            vsync: false,
            vsync_interval: 1,
            priority: 0,
            requires_texture_flipping: false,
            window: None,
        }
    }
}

impl RenderTargetProperties {
    pub fn is_window(&self) -> bool {
        self.window.is_some()
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn has_focus(&self) -> bool {
        self.window.as_ref().is_some_and(|window| window.has_focus)
    }
}

/// Sim-side state pushed to render target twins by the sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTargetSyncData {
    pub priority: i32,
}

/// Core-thread render target state embedded in every render target twin.
pub struct RenderTargetCoreState {
    properties: RenderTargetProperties,
    sim_properties: Arc<Property<RenderTargetProperties>>,
    core_dirty: bool,
}

impl RenderTargetCoreState {
    /// Start from the sim-side properties as they are now.
    pub fn new(sim_properties: Arc<Property<RenderTargetProperties>>) -> Self {
        Self {
            properties: sim_properties.get(),
            sim_properties,
            core_dirty: false,
        }
    }

    pub fn properties(&self) -> &RenderTargetProperties {
        &self.properties
    }

    /// Edit the properties and flag them for the next
    /// [`RenderTargetManager::update_core`].
    pub fn update<F, R>(&mut self, f: F) -> R
    where
        F: FnOnce(&mut RenderTargetProperties) -> R,
    {
        let result = f(&mut self.properties);
        self.core_dirty = true;
        result
    }

    /// Apply sim-side state without flagging it back.
    pub fn apply_sync(&mut self, data: &RenderTargetSyncData) {
        self.properties.priority = data.priority;
    }

    pub fn is_core_dirty(&self) -> bool {
        self.core_dirty
    }

    pub(crate) fn clear_core_dirty(&mut self) {
        self.core_dirty = false;
    }

    /// Register with the render target manager. Call from the twin's
    /// `initialize` hook.
    pub fn register(&self, ctx: &CoreContext<'_>) {
        ctx.render_targets().register_render_target(
            ctx.id(),
            self.sim_properties.clone(),
            self.properties.clone(),
        );
    }

    /// Unregister from the render target manager. Call from the twin's
    /// `destroy` hook.
    pub fn unregister(&self, ctx: &CoreContext<'_>) {
        ctx.render_targets().unregister_render_target(ctx.id());
    }
}

/// Implemented by twins that are render targets.
pub trait RenderTargetCore: Send {
    fn render_target_state(&self) -> &RenderTargetCoreState;

    fn render_target_state_mut(&mut self) -> &mut RenderTargetCoreState;

    fn properties(&self) -> &RenderTargetProperties {
        self.render_target_state().properties()
    }
}
