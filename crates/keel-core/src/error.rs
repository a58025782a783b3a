//! Error types for Keel core primitives.

use std::fmt;
use std::io;

/// Errors reported by the core thread command queue.
#[derive(Debug)]
pub enum CoreThreadError {
    /// The operating system refused to spawn the core thread.
    Spawn(io::Error),
    /// The core thread has been stopped and no longer accepts commands.
    Stopped,
    /// The command queue is full and the caller cannot block on it.
    QueueFull,
    /// The call would block the core thread on its own queue.
    WouldDeadlock,
}

impl fmt::Display for CoreThreadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn(err) => write!(f, "Failed to spawn core thread: {err}"),
            Self::Stopped => write!(f, "The core thread has been stopped"),
            Self::QueueFull => write!(f, "The core thread command queue is full"),
            Self::WouldDeadlock => {
                write!(f, "Blocking on the core thread from the core thread would deadlock")
            }
        }
    }
}

impl std::error::Error for CoreThreadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Spawn(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for CoreThreadError {
    fn from(err: io::Error) -> Self {
        Self::Spawn(err)
    }
}

/// A specialized Result type for core thread operations.
pub type Result<T> = std::result::Result<T, CoreThreadError>;
