//! Logging facilities for Keel.
//!
//! Keel uses the `tracing` crate for instrumentation. Nothing is printed
//! unless the application installs a subscriber:
//!
//! ```ignore
//! fn main() {
//!     tracing_subscriber::fmt()
//!         .with_env_filter("keel=debug,keel_core=info")
//!         .init();
//! }
//! ```
//!
//! Every event carries one of the [`targets`] so subsystems can be filtered
//! independently.

/// Span names used throughout Keel for tracing.
pub mod span_names {
    /// One full engine frame.
    pub const FRAME: &str = "keel::frame";
    /// The per-frame core object sync pass.
    pub const SYNC_PASS: &str = "keel::sync_pass";
    /// The core-thread half of a frame.
    pub const CORE_FRAME: &str = "keel::core_frame";
}

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Core primitives target.
    pub const CORE: &str = "keel_core";
    /// Core thread command queue target.
    pub const CORE_THREAD: &str = "keel_core::core_thread";
    /// Signal system target.
    pub const SIGNAL: &str = "keel_core::signal";
    /// Engine root target.
    pub const ENGINE: &str = "keel::engine";
    /// Core object lifecycle target.
    pub const CORE_OBJECT: &str = "keel::core_object";
    /// Render target manager target.
    pub const RENDER_TARGET: &str = "keel::render_target";
    /// Render window manager target.
    pub const RENDER_WINDOW: &str = "keel::render_window";
    /// Resource handles and registry target.
    pub const RESOURCE: &str = "keel::resource";
}

/// A guard that keeps a performance span entered until dropped.
///
/// # Example
///
/// ```
/// use keel_core::logging::{PerfSpan, span_names};
///
/// {
///     let _span = PerfSpan::new(span_names::SYNC_PASS);
///     // ... timed work ...
/// }
/// ```
pub struct PerfSpan {
    #[allow(dead_code)]
    span: tracing::span::EnteredSpan,
}

impl PerfSpan {
    /// Create and enter a new performance span.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!(target: "keel::perf", "perf", operation = name);
        Self {
            span: span.entered(),
        }
    }

    /// Create a span tagged with a frame number.
    pub fn frame(name: &'static str, frame: u64) -> Self {
        let span = tracing::info_span!(target: "keel::perf", "perf", operation = name, frame);
        Self {
            span: span.entered(),
        }
    }
}
