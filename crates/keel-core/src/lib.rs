//! Core primitives for Keel.
//!
//! This crate provides the thread-level building blocks the Keel object model
//! is built on:
//!
//! - **Core Thread**: a dedicated thread executing a FIFO command queue
//!   against state it owns exclusively
//! - **Latch**: a set-once flag with blocking wait, and [`AsyncOp`] for
//!   values returned from queued commands
//! - **Signal/Slot System**: per-frame event notification
//! - **Property System**: shared values with change detection
//! - **Thread Affinity**: assertions that code runs on the sim or core thread
//!
//! # Core Thread Example
//!
//! ```
//! use keel_core::CoreThread;
//!
//! let core = CoreThread::new(Vec::<&'static str>::new).unwrap();
//! core.queue_command(|log| log.push("created")).unwrap();
//!
//! let op = core.queue_return_command(|log| log.len()).unwrap();
//! assert_eq!(op.wait(), Some(1));
//!
//! core.stop_and_join();
//! ```
//!
//! # Latch Example
//!
//! ```
//! use keel_core::Latch;
//!
//! let loaded = Latch::new();
//! let notifier = loaded.clone();
//! std::thread::spawn(move || {
//!     notifier.set();
//! });
//! loaded.wait();
//! ```

pub mod core_thread;
mod error;
pub mod latch;
pub mod logging;
pub mod property;
pub mod signal;
pub mod thread_check;

pub use core_thread::{Command, CoreThread, CoreThreadBuilder, CoreThreadConfig};
pub use error::{CoreThreadError, Result};
pub use latch::{AsyncOp, AsyncOpCompleter, Latch, async_op_pair};
pub use logging::PerfSpan;
pub use property::Property;
pub use signal::{ConnectionId, Signal};
pub use thread_check::{ThreadAffinity, ThreadRole};
