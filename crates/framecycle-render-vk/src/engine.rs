// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use framecycle_render::SurfaceProvider;
use tracing::{info, warn};

use crate::backend::VkBackend;
use crate::device::DeviceContext;
use crate::error::EngineResult;
use crate::frame::FramePool;
use crate::instance::InstanceContext;
use crate::present::{FrameHandler, InitContext, PresentationLoop};
use crate::swapchain::SwapchainState;

/// Which present mode the swap chain should try for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PresentModePreference {
    /// MAILBOX when the surface offers it, FIFO otherwise.
    #[default]
    LowLatency,
    /// Always FIFO.
    Fifo,
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub app_name: String,
    /// Enable `VK_LAYER_KHRONOS_validation` when it is installed.
    pub validation: bool,
    pub present_mode: PresentModePreference,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            app_name: "framecycle".to_owned(),
            validation: cfg!(debug_assertions),
            present_mode: PresentModePreference::default(),
        }
    }
}

/// Instance, device, swap chain and frame ring for one window.
///
/// Built once; dropped after a full device idle wait. Fields drop in
/// declaration order, which is the reverse of creation order.
pub struct PresentationEngine {
    frames: FramePool,
    swapchain: SwapchainState,
    device: DeviceContext,
    _instance: InstanceContext,
}

impl PresentationEngine {
    pub fn new<S: SurfaceProvider + ?Sized>(provider: &S, config: &EngineConfig) -> EngineResult<Self> {
        let instance = InstanceContext::new(provider, config)?;
        let device = DeviceContext::new(&instance)?;
        let swapchain = SwapchainState::new(
            &instance,
            &device,
            provider.framebuffer_size(),
            config.present_mode,
        )?;
        let frames = FramePool::build(&device, &swapchain)?;

        info!(
            "presentation engine ready ({} frames in flight)",
            frames.ring().len()
        );
        Ok(Self {
            frames,
            swapchain,
            device,
            _instance: instance,
        })
    }

    /// Runs the presentation loop until `surface` asks to close.
    ///
    /// Calls `handler.init` first and `handler.release` after the device has
    /// gone idle, also when the loop stopped on an error. Returns the number
    /// of frames presented.
    pub fn execute<S, H>(&mut self, surface: &mut S, handler: &mut H) -> EngineResult<u64>
    where
        S: SurfaceProvider + ?Sized,
        H: FrameHandler + ?Sized,
    {
        let extent = self.swapchain.extent();
        let init = InitContext {
            device: self.device.device(),
            format: self.swapchain.format(),
            extent,
            image_count: self.swapchain.image_count(),
        };

        let backend = VkBackend::new(&self.device, &self.swapchain);
        let device = &self.device;
        let result = PresentationLoop::new(&backend, self.frames.ring_mut(), extent).run_session(
            surface,
            handler,
            &init,
            || device.wait_idle(),
        );

        if let Ok(frames) = &result {
            info!("presented {frames} frames");
        }
        result
    }

    pub fn wait_idle(&self) -> EngineResult<()> {
        self.device.wait_idle()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    pub fn format(&self) -> vk::Format {
        self.swapchain.format()
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.swapchain.present_mode()
    }

    pub fn buffer_count(&self) -> usize {
        self.frames.ring().len()
    }
}

impl Drop for PresentationEngine {
    fn drop(&mut self) {
        if let Err(e) = self.wait_idle() {
            warn!("device_wait_idle during shutdown failed: {e}");
        }
        info!("presentation engine shutting down");
    }
}
