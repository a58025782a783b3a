//! Error types for the Keel object model.

use keel_core::CoreThreadError;
use thiserror::Error;
use uuid::Uuid;

use crate::config::ConfigError;
use crate::core_object::CoreObjectId;

/// Errors that can occur while creating, syncing, or tearing down core objects.
#[derive(Error, Debug)]
pub enum KeelError {
    /// The core thread rejected or dropped a command.
    #[error("core thread error: {0}")]
    CoreThread(#[from] CoreThreadError),

    /// `initialize()` was called on an object that is already scheduled.
    #[error("core object {0:?} has already been initialized")]
    AlreadyInitialized(CoreObjectId),

    /// The object was destroyed before the operation could run.
    #[error("core object {0:?} has been destroyed")]
    Destroyed(CoreObjectId),

    /// A backend failed to build the core-thread twin.
    #[error("failed to create core object: {0}")]
    CoreCreation(String),

    /// A backend failed to create a render window.
    #[error("failed to create render window: {0}")]
    WindowCreation(String),

    /// Core objects were still alive at shutdown.
    #[error("{count} core objects still alive at shutdown: {types:?}")]
    LeakedCoreObjects {
        count: usize,
        types: Vec<&'static str>,
    },

    /// Render targets were still registered at shutdown.
    #[error("{count} render targets still registered at shutdown")]
    RenderTargetsRegistered { count: usize },

    /// A resource loader failed.
    #[error("resource {uuid} failed to load: {reason}")]
    ResourceLoad { uuid: Uuid, reason: String },

    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for Keel operations.
pub type KeelResult<T> = Result<T, KeelError>;
