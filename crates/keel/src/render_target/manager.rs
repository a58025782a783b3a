//! Per-frame publishing of render target properties from the core thread.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use keel_core::logging::targets;
use keel_core::{Property, ThreadAffinity};

use super::RenderTargetProperties;
use crate::core_object::{CoreArena, CoreObjectId};
use crate::error::{KeelError, KeelResult};

struct RenderTargetEntry {
    sim_properties: Arc<Property<RenderTargetProperties>>,
    snapshot: RenderTargetProperties,
    dirty: bool,
}

/// Relays render target properties from the core thread to the sim thread.
///
/// Registration happens on the core thread, from the twins' `initialize` and
/// `destroy` hooks. Once per frame, [`update_core`](Self::update_core) runs on
/// the core thread and [`update`](Self::update) on the sim thread, in that
/// order.
///
/// # Panics
///
/// Dropping the manager while render targets are still registered panics,
/// unless the thread is already panicking.
pub struct RenderTargetManager {
    targets: Mutex<HashMap<CoreObjectId, RenderTargetEntry>>,
    core_affinity: OnceLock<ThreadAffinity>,
}

impl Default for RenderTargetManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderTargetManager {
    pub fn new() -> Self {
        Self {
            targets: Mutex::new(HashMap::new()),
            core_affinity: OnceLock::new(),
        }
    }

    /// Restrict core-side operations to the given thread.
    ///
    /// Only the first binding takes effect.
    pub fn bind_core_thread(&self, affinity: ThreadAffinity) {
        if self.core_affinity.set(affinity).is_err() {
            tracing::debug!(target: targets::RENDER_TARGET, "core thread already bound");
        }
    }

    #[track_caller]
    fn assert_core_thread(&self, operation: &str) {
        if let Some(affinity) = self.core_affinity.get() {
            affinity.assert_same_thread_with_msg(operation);
        }
    }

    /// Start tracking a render target. Core thread only.
    ///
    /// Registering an id twice keeps one entry with the latest values.
    pub fn register_render_target(
        &self,
        id: CoreObjectId,
        sim_properties: Arc<Property<RenderTargetProperties>>,
        initial: RenderTargetProperties,
    ) {
        self.assert_core_thread("RenderTargetManager::register_render_target must run on the core thread");
        let replaced = self.targets.lock().insert(
            id,
            RenderTargetEntry {
                sim_properties,
                snapshot: initial,
                dirty: false,
            },
        );
        if replaced.is_some() {
            tracing::debug!(target: targets::RENDER_TARGET, ?id, "render target registered twice");
        } else {
            tracing::trace!(target: targets::RENDER_TARGET, ?id, "render target registered");
        }
    }

    /// Stop tracking a render target. Core thread only.
    ///
    /// Any snapshot not yet published is dropped. Returns `false` for unknown
    /// ids.
    pub fn unregister_render_target(&self, id: CoreObjectId) -> bool {
        self.assert_core_thread("RenderTargetManager::unregister_render_target must run on the core thread");
        let removed = self.targets.lock().remove(&id).is_some();
        if removed {
            tracing::trace!(target: targets::RENDER_TARGET, ?id, "render target unregistered");
        }
        removed
    }

    /// Snapshot the properties of every core-dirty render target.
    ///
    /// Core thread only, once per core frame. Returns the number of targets
    /// refreshed.
    #[tracing::instrument(skip_all, target = "keel::render_target", level = "trace")]
    pub fn update_core(&self, arena: &mut CoreArena) -> usize {
        self.assert_core_thread("RenderTargetManager::update_core must run on the core thread");

        let mut targets = self.targets.lock();
        let mut refreshed = 0;
        for (id, entry) in targets.iter_mut() {
            let Some(target) = arena.render_target_mut(*id) else {
                continue;
            };
            let state = target.render_target_state_mut();
            if !state.is_core_dirty() {
                continue;
            }
            entry.snapshot.clone_from(state.properties());
            entry.dirty = true;
            state.clear_core_dirty();
            refreshed += 1;
        }
        refreshed
    }

    /// Publish refreshed snapshots to the sim-visible properties.
    ///
    /// Sim thread only, once per sim frame. A second call without an
    /// intervening [`update_core`](Self::update_core) publishes nothing.
    /// Returns the number of targets published.
    #[tracing::instrument(skip_all, target = "keel::render_target", level = "trace")]
    pub fn update(&self) -> usize {
        let pending: Vec<(Arc<Property<RenderTargetProperties>>, RenderTargetProperties)> = {
            let mut targets = self.targets.lock();
            targets
                .values_mut()
                .filter(|entry| entry.dirty)
                .map(|entry| {
                    entry.dirty = false;
                    (entry.sim_properties.clone(), entry.snapshot.clone())
                })
                .collect()
        };

        let count = pending.len();
        for (sim_properties, snapshot) in pending {
            sim_properties.set(snapshot);
        }
        count
    }

    pub fn registered_count(&self) -> usize {
        self.targets.lock().len()
    }

    pub fn is_registered(&self, id: CoreObjectId) -> bool {
        self.targets.lock().contains_key(&id)
    }

    /// The last snapshot taken for a render target.
    pub fn snapshot(&self, id: CoreObjectId) -> Option<RenderTargetProperties> {
        self.targets.lock().get(&id).map(|entry| entry.snapshot.clone())
    }

    /// Whether a snapshot is waiting for [`update`](Self::update).
    pub fn is_dirty(&self, id: CoreObjectId) -> bool {
        self.targets.lock().get(&id).is_some_and(|entry| entry.dirty)
    }

    /// Report render targets that are still registered.
    pub fn check_empty(&self) -> KeelResult<()> {
        match self.registered_count() {
            0 => Ok(()),
            count => Err(KeelError::RenderTargetsRegistered { count }),
        }
    }
}

impl fmt::Debug for RenderTargetManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderTargetManager")
            .field("registered", &self.registered_count())
            .finish()
    }
}

impl Drop for RenderTargetManager {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        let count = self.targets.get_mut().len();
        if count > 0 {
            panic!("RenderTargetManager dropped while {count} render targets are still registered");
        }
    }
}

static_assertions::assert_impl_all!(RenderTargetManager: Send, Sync);
