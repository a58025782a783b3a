//! Off-screen render targets.

use std::fmt;
use std::sync::Arc;

use keel_core::Property;

use super::{
    RenderTargetCore, RenderTargetCoreState, RenderTargetProperties, RenderTargetSyncData,
};
use crate::core_object::{
    CoreContext, CoreObject, CoreObjectCore, CoreObjectType, CoreRuntime, CoreSyncData,
};
use crate::error::KeelResult;
use crate::resource::Resource;

/// Creation parameters for a [`RenderTexture`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderTextureDesc {
    pub width: u32,
    pub height: u32,
    pub multisample_count: u32,
    pub hw_gamma: bool,
    pub priority: i32,
}

impl RenderTextureDesc {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            multisample_count: 1,
            hw_gamma: false,
            priority: 0,
        }
    }

    fn properties(&self) -> RenderTargetProperties {
        RenderTargetProperties {
            width: self.width,
            height: self.height,
            hw_gamma: self.hw_gamma,
            multisample_count: self.multisample_count,
            priority: self.priority,
            ..Default::default()
        }
    }
}

/// A render target that renders into a texture.
pub struct RenderTexture {
    core: CoreObject,
    desc: RenderTextureDesc,
    properties: Arc<Property<RenderTargetProperties>>,
}

impl RenderTexture {
    /// Create a render texture and queue construction of its twin.
    pub fn create(runtime: &CoreRuntime, desc: RenderTextureDesc) -> KeelResult<Arc<Self>> {
        let properties = Arc::new(Property::new(desc.properties()));
        runtime.create_initialized(|core| Self {
            core,
            desc,
            properties,
        })
    }

    pub fn desc(&self) -> &RenderTextureDesc {
        &self.desc
    }

    /// The sim-visible properties as of the last frame.
    pub fn properties(&self) -> RenderTargetProperties {
        self.properties.get()
    }

    pub fn sim_properties(&self) -> &Arc<Property<RenderTargetProperties>> {
        &self.properties
    }

    /// Change the render priority; reaches the twin with the next sync pass.
    pub fn set_priority(&self, priority: i32) {
        self.properties.update(|props| props.priority = priority);
        self.core.mark_core_dirty();
    }

    /// Resize the texture on the core thread.
    ///
    /// The new size becomes sim-visible after the next frame.
    pub fn resize(&self, width: u32, height: u32) -> KeelResult<()> {
        self.core
            .queue_core_command::<RenderTextureCore, _>(move |twin| twin.resize(width, height))
    }

    pub fn destroy(&self) {
        self.core.destroy();
    }
}

impl CoreObjectType for RenderTexture {
    fn core_object(&self) -> &CoreObject {
        &self.core
    }

    fn create_core(&self) -> KeelResult<Box<dyn CoreObjectCore>> {
        Ok(Box::new(RenderTextureCore {
            state: RenderTargetCoreState::new(self.properties.clone()),
        }))
    }

    fn capture_sync_data(&self) -> Option<CoreSyncData> {
        let priority = self.properties.with(|props| props.priority);
        Some(Box::new(RenderTargetSyncData { priority }))
    }

    fn type_name(&self) -> &'static str {
        "RenderTexture"
    }
}

impl Resource for RenderTexture {
    fn on_unload(&self) {
        self.core.destroy();
    }
}

impl fmt::Debug for RenderTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderTexture")
            .field("id", &self.core.id())
            .field("desc", &self.desc)
            .finish()
    }
}

/// Core-thread twin of a [`RenderTexture`].
pub struct RenderTextureCore {
    state: RenderTargetCoreState,
}

impl RenderTextureCore {
    pub fn resize(&mut self, width: u32, height: u32) {
        self.state.update(|props| {
            props.width = width;
            props.height = height;
        });
    }
}

impl CoreObjectCore for RenderTextureCore {
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
}

impl RenderTargetCore for RenderTextureCore {
    fn render_target_state(&self) -> &RenderTargetCoreState {
        &self.state
    }

    fn render_target_state_mut(&mut self) -> &mut RenderTargetCoreState {
        &mut self.state
    }
}
