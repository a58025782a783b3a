//! The engine root: owns the core thread and every manager.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use keel_core::logging::{PerfSpan, span_names, targets};
use keel_core::{CoreThreadError, ThreadAffinity, ThreadRole};

use crate::config::EngineConfig;
use crate::core_object::{
    CoreArena, CoreObjectId, CoreObjectManager, CoreRuntime, CoreServices, CoreThreadHandle,
};
use crate::error::{KeelError, KeelResult};
use crate::render_target::{RenderTargetManager, RenderTexture, RenderTextureDesc};
use crate::render_window::{
    HeadlessWindowFactory, PlatformWindowEvent, RenderWindow, RenderWindowDesc,
    RenderWindowFactory, RenderWindowManager,
};
use crate::resource::Resources;

/// What one call to [`Engine::run_frame`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Frame number, starting at 1.
    pub frame: u64,
    /// Core objects whose state was pushed to their twins.
    pub synced_objects: usize,
    /// Render targets snapshotted on the core thread.
    pub refreshed_targets: usize,
    /// Render targets whose sim-visible properties changed.
    pub published_targets: usize,
    /// Window events delivered to listeners.
    pub window_events: usize,
}

/// The explicit root context of a Keel application.
///
/// Owns the core thread, the core object and render target managers, the
/// render window manager and the resource registry. Everything is reached
/// through the engine rather than through globals, and torn down in order by
/// [`shutdown`](Self::shutdown).
///
/// The thread that creates the engine is its simulation thread.
///
/// # Shutdown
///
/// Release every core object before shutting down. Objects still alive at
/// shutdown are reported by [`shutdown`](Self::shutdown) and are treated as a
/// programming error when the managers are dropped.
pub struct Engine {
    config: EngineConfig,
    runtime: CoreRuntime,
    render_targets: Arc<RenderTargetManager>,
    windows: Arc<RenderWindowManager>,
    resources: Arc<Resources>,
    frame: AtomicU64,
    sim_affinity: ThreadAffinity,
    shut_down: AtomicBool,
}

impl Engine {
    /// Start an engine with the headless window backend.
    pub fn new(config: EngineConfig) -> KeelResult<Self> {
        Self::with_window_factory(config, Arc::new(HeadlessWindowFactory::new()))
    }

    /// Start an engine with a custom window backend.
    pub fn with_window_factory(
        config: EngineConfig,
        window_factory: Arc<dyn RenderWindowFactory>,
    ) -> KeelResult<Self> {
        config.validate()?;

        let render_targets = Arc::new(RenderTargetManager::new());
        let services = CoreServices::new(render_targets.clone());
        let core_thread = Arc::new(CoreThreadHandle::with_config(
            config.core_thread_config(),
            move || CoreArena::new(services),
        )?);
        render_targets.bind_core_thread(core_thread.affinity());

        tracing::info!(
            target: targets::ENGINE,
            core_thread = %config.core_thread.name,
            backend = window_factory.backend_name(),
            "engine started"
        );

        Ok(Self {
            runtime: CoreRuntime::new(core_thread, Arc::new(CoreObjectManager::new())),
            render_targets,
            windows: Arc::new(RenderWindowManager::new(window_factory)),
            resources: Resources::new(),
            frame: AtomicU64::new(0),
            sim_affinity: ThreadAffinity::current_as(ThreadRole::Simulation),
            shut_down: AtomicBool::new(false),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The core thread and core object manager, for creating core objects.
    pub fn runtime(&self) -> &CoreRuntime {
        &self.runtime
    }

    pub fn core_thread(&self) -> &Arc<CoreThreadHandle> {
        self.runtime.core_thread()
    }

    pub fn objects(&self) -> &Arc<CoreObjectManager> {
        self.runtime.objects()
    }

    pub fn render_targets(&self) -> &Arc<RenderTargetManager> {
        &self.render_targets
    }

    pub fn windows(&self) -> &Arc<RenderWindowManager> {
        &self.windows
    }

    pub fn resources(&self) -> &Arc<Resources> {
        &self.resources
    }

    /// Affinity of the simulation thread.
    pub fn sim_affinity(&self) -> ThreadAffinity {
        self.sim_affinity
    }

    /// Number of frames run so far.
    pub fn frame_count(&self) -> u64 {
        self.frame.load(Ordering::Acquire)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Create a top-level render window.
    pub fn create_window(&self, desc: RenderWindowDesc) -> KeelResult<Arc<RenderWindow>> {
        self.windows.create(&self.runtime, desc, None)
    }

    /// Create a render window owned by `parent`.
    pub fn create_child_window(
        &self,
        desc: RenderWindowDesc,
        parent: &RenderWindow,
    ) -> KeelResult<Arc<RenderWindow>> {
        self.windows.create(&self.runtime, desc, Some(parent))
    }

    /// Create an off-screen render target.
    pub fn create_render_texture(&self, desc: RenderTextureDesc) -> KeelResult<Arc<RenderTexture>> {
        RenderTexture::create(&self.runtime, desc)
    }

    /// Deliver a platform window notification on the core thread.
    ///
    /// Window backends call this from their OS event handlers.
    pub fn post_window_event(&self, id: CoreObjectId, event: PlatformWindowEvent) -> KeelResult<()> {
        let windows = self.windows.clone();
        self.core_thread()
            .queue_command(move |arena| windows.handle_platform_event(arena, id, event))?;
        Ok(())
    }

    /// Run one frame.
    ///
    /// In order: the sync pass pushes dirty core objects to their twins; the
    /// core frame snapshots render target properties; the sim thread then
    /// publishes those snapshots and delivers window events. Blocks until the
    /// core frame has finished.
    #[tracing::instrument(skip_all, target = "keel::engine", level = "trace")]
    pub fn run_frame(&self) -> KeelResult<FrameStats> {
        self.sim_affinity
            .debug_assert_same_thread_with_msg("Engine::run_frame must run on the simulation thread");
        if self.is_shut_down() {
            return Err(CoreThreadError::Stopped.into());
        }

        let frame = self.frame.fetch_add(1, Ordering::AcqRel) + 1;
        let _span = PerfSpan::frame(span_names::FRAME, frame);

        let synced_objects = self.objects().sync_to_core(self.core_thread())?;

        let render_targets = self.render_targets.clone();
        let refreshed_targets = self
            .core_thread()
            .queue_return_command(move |arena| {
                let _span = PerfSpan::frame(span_names::CORE_FRAME, frame);
                render_targets.update_core(arena)
            })?
            .wait()
            .ok_or(KeelError::CoreThread(CoreThreadError::Stopped))?;

        let published_targets = self.render_targets.update();
        let window_events = self.windows.update();

        let stats = FrameStats {
            frame,
            synced_objects,
            refreshed_targets,
            published_targets,
            window_events,
        };
        tracing::trace!(target: targets::ENGINE, ?stats, "frame finished");
        Ok(stats)
    }

    /// Tear the engine down.
    ///
    /// Unloads every resource, drains and stops the core thread, then checks
    /// that no core object or render target survived. Idempotent; also called
    /// on drop.
    #[tracing::instrument(skip_all, target = "keel::engine", level = "debug")]
    pub fn shutdown(&self) -> KeelResult<()> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let unloaded = self.resources.unload_all();
        self.core_thread().stop_and_join();

        self.objects().check_leaks()?;
        self.render_targets.check_empty()?;

        tracing::info!(
            target: targets::ENGINE,
            frames = self.frame_count(),
            unloaded,
            "engine shut down"
        );
        Ok(())
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("frame", &self.frame_count())
            .field("runtime", &self.runtime)
            .field("render_targets", &self.render_targets)
            .field("windows", &self.windows)
            .field("resources", &self.resources)
            .finish()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            tracing::error!(target: targets::ENGINE, error = %err, "engine shutdown failed");
        }
    }
}

static_assertions::assert_impl_all!(Engine: Send, Sync);
