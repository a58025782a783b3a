//! Render windows and the manager that delivers their events.
//!
//! Platform callbacks (focus, move, resize, mouse leave, close) arrive on the
//! core thread. The [`RenderWindowManager`] notifies the window's twin right
//! away and records the event; [`RenderWindowManager::update`] delivers the
//! recorded events to sim-side listeners once per frame, with duplicates
//! within a frame coalesced.
//!
//! Windows are created through a [`RenderWindowFactory`], which supplies the
//! backend-specific twin. [`HeadlessWindowFactory`] is a backend without an OS
//! window.
//!
//! # Example
//!
//! ```
//! use keel::render_window::RenderWindowDesc;
//! use keel::{Engine, EngineConfig};
//!
//! let engine = Engine::new(EngineConfig::default()).unwrap();
//! let window = engine.create_window(RenderWindowDesc::new("main", 800, 600)).unwrap();
//!
//! window.resize(1024, 768).unwrap();
//! engine.run_frame().unwrap();
//! assert_eq!(window.properties().size(), (1024, 768));
//!
//! drop(window);
//! engine.shutdown().unwrap();
//! ```

mod headless;
mod manager;
mod window;

use std::sync::Arc;

use keel_core::Property;

use crate::core_object::{CoreObjectCore, CoreObjectId};
use crate::error::KeelResult;
use crate::render_target::{RenderTargetCore, RenderTargetProperties, WindowProperties};

pub use headless::{HeadlessWindowCore, HeadlessWindowFactory};
pub use manager::RenderWindowManager;
pub use window::RenderWindow;

/// Creation parameters for a [`RenderWindow`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderWindowDesc {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub left: i32,
    pub top: i32,
    pub fullscreen: bool,
    pub hidden: bool,
    pub vsync: bool,
    pub vsync_interval: u32,
    pub multisample_count: u32,
    pub hw_gamma: bool,
}

impl RenderWindowDesc {
    pub fn new(title: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            title: title.into(),
            width,
            height,
            left: 0,
            top: 0,
            fullscreen: false,
            hidden: false,
            vsync: true,
            vsync_interval: 1,
            multisample_count: 1,
            hw_gamma: false,
        }
    }

    pub fn with_position(mut self, left: i32, top: i32) -> Self {
        self.left = left;
        self.top = top;
        self
    }

    pub fn fullscreen(mut self, fullscreen: bool) -> Self {
        self.fullscreen = fullscreen;
        self
    }

    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    /// The properties a window starts with.
    pub fn properties(&self) -> RenderTargetProperties {
        RenderTargetProperties {
            width: self.width,
            height: self.height,
            hw_gamma: self.hw_gamma,
            multisample_count: self.multisample_count,
            vsync: self.vsync,
            vsync_interval: self.vsync_interval,
            window: Some(WindowProperties {
                left: self.left,
                top: self.top,
                is_fullscreen: self.fullscreen,
                is_hidden: self.hidden,
                title: self.title.clone(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// A platform window notification, delivered on the core thread through
/// [`RenderWindowManager::handle_platform_event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformWindowEvent {
    FocusReceived,
    FocusLost,
    MovedOrResized,
    MouseLeft,
    CloseRequested,
}

/// Creates backend twins for render windows.
pub trait RenderWindowFactory: Send + Sync {
    /// Backend name for diagnostics.
    fn backend_name(&self) -> &str;

    /// Build the twin of a new window.
    ///
    /// `sim_properties` is the window's sim-visible property; the twin must
    /// register it with the render target manager from its `initialize` hook.
    fn create_core(
        &self,
        desc: &RenderWindowDesc,
        sim_properties: Arc<Property<RenderTargetProperties>>,
        parent: Option<CoreObjectId>,
    ) -> KeelResult<Box<dyn CoreObjectCore>>;
}

/// Implemented by the twins of render windows.
///
/// The notification hooks run on the core thread, from the
/// [`RenderWindowManager`] platform callbacks.
pub trait RenderWindowCore: RenderTargetCore {
    fn resize(&mut self, width: u32, height: u32);

    fn move_to(&mut self, left: i32, top: i32);

    fn set_hidden(&mut self, hidden: bool);

    fn focus_received(&mut self) {
        self.render_target_state_mut().update(|props| {
            if let Some(window) = props.window.as_mut() {
                window.has_focus = true;
            }
        });
    }

    fn focus_lost(&mut self) {
        self.render_target_state_mut().update(|props| {
            if let Some(window) = props.window.as_mut() {
                window.has_focus = false;
            }
        });
    }

    /// The OS reported a move or resize.
    fn moved_or_resized(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_desc_properties() {
        let desc = RenderWindowDesc::new("tool", 320, 200)
            .with_position(10, 20)
            .hidden(true);
        let props = desc.properties();

        assert_eq!(props.size(), (320, 200));
        assert!(props.vsync);
        let window = props.window.unwrap();
        assert_eq!((window.left, window.top), (10, 20));
        assert!(window.is_hidden);
        assert!(!window.has_focus);
        assert_eq!(window.title, "tool");
    }
}
