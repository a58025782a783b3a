//! Keel - a dual-thread object model for real-time engines.
//!
//! Engine objects live on two threads. Game logic runs on the simulation
//! thread; rendering state lives on a dedicated core thread. Every engine
//! object that needs core-thread state is a **core object** with a
//! core-thread **twin**, and the two halves are kept consistent by a
//! once-per-frame sync pass.
//!
//! - **Core objects** ([`core_object`]): sim-side lifecycle, twins owned by an
//!   arena on the core thread, a shared "initialized" latch, and the batched
//!   sync pass
//! - **Render targets** ([`render_target`]): property snapshots taken on the
//!   core thread and published to the sim thread each frame
//! - **Render windows** ([`render_window`]): platform events coalesced on the
//!   core thread and delivered as signals on the sim thread
//! - **Resources** ([`resource`]): reference-counted handles to resources
//!   that may still be loading
//!
//! The [`Engine`] ties them together: it owns the core thread and every
//! manager, runs frames, and tears everything down in order.
//!
//! # Example
//!
//! ```
//! use keel::render_target::RenderTextureDesc;
//! use keel::{Engine, EngineConfig};
//!
//! let engine = Engine::new(EngineConfig::default()).unwrap();
//! let target = engine.create_render_texture(RenderTextureDesc::new(800, 600)).unwrap();
//!
//! target.resize(1024, 768).unwrap();
//! engine.run_frame().unwrap();
//! assert_eq!(target.properties().size(), (1024, 768));
//!
//! drop(target);
//! engine.shutdown().unwrap();
//! ```

pub mod config;
pub mod core_object;
pub mod engine;
pub mod error;
pub mod logging;
pub mod render_target;
pub mod render_window;
pub mod resource;

pub use config::{ConfigError, CoreThreadSettings, EngineConfig, LoggingSettings};
pub use core_object::{
    CoreArena, CoreObject, CoreObjectCore, CoreObjectId, CoreObjectManager, CoreObjectType,
    CoreRuntime, SyncedState,
};
pub use engine::{Engine, FrameStats};
pub use error::{KeelError, KeelResult};
pub use render_target::{RenderTargetManager, RenderTargetProperties, RenderTexture};
pub use render_window::{RenderWindow, RenderWindowDesc, RenderWindowManager};
pub use resource::{HResource, Resource, Resources};

pub use keel_core::{AsyncOp, Latch, Property, Signal};
