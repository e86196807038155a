// SPDX-License-Identifier: CEPL-1.0
//! The steady-state acquire → record → submit → present cycle.

use ash::vk;
use framecycle_render::SurfaceProvider;
use tracing::{debug, warn};

use crate::backend::{FrameBackend, LayoutTransition, RenderingCommands, Submission};
use crate::error::{EngineError, EngineResult, FrameStage};
use crate::frame::FrameRing;

/// Handed to [`FrameHandler::init`] once, before the first frame.
pub struct InitContext<'a> {
    pub device: &'a ash::Device,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub image_count: usize,
}

/// Everything the draw callback may touch for the frame being recorded.
///
/// Borrowed for the duration of one callback; handles must not be kept.
pub struct RenderContext<'a> {
    pub command_buffer: vk::CommandBuffer,
    pub image_view: vk::ImageView,
    pub viewport: vk::Viewport,
    pub scissor: vk::Rect2D,
    /// Number of frames recorded before this one.
    pub frame_number: u64,
    rendering: &'a dyn RenderingCommands,
}

impl RenderContext<'_> {
    pub fn extent(&self) -> vk::Extent2D {
        self.scissor.extent
    }

    /// Opens a dynamic-rendering region on this frame's command buffer.
    pub fn begin_rendering(&self, info: &vk::RenderingInfo<'_>) {
        self.rendering.begin_rendering(self.command_buffer, info);
    }

    pub fn end_rendering(&self) {
        self.rendering.end_rendering(self.command_buffer);
    }
}

/// Application side of the loop: set up, record each frame, tear down.
///
/// Application state lives in the implementor. Any
/// `FnMut(&RenderContext)` closure is a handler with no-op init/release.
pub trait FrameHandler {
    fn init(&mut self, _ctx: &InitContext<'_>) -> EngineResult<()> {
        Ok(())
    }

    /// Records draw commands; called exactly once per frame between the
    /// two layout transitions.
    fn render(&mut self, ctx: &RenderContext<'_>);

    /// Called after the device went idle; destroy handler-owned objects here.
    fn release(&mut self, _device: &ash::Device) {}
}

impl<F> FrameHandler for F
where
    F: FnMut(&RenderContext<'_>),
{
    fn render(&mut self, ctx: &RenderContext<'_>) {
        (*self)(ctx)
    }
}

pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

/// Drives frames through a [`FrameRing`] on one thread.
pub struct PresentationLoop<'a, B: FrameBackend + ?Sized> {
    backend: &'a B,
    ring: &'a mut FrameRing,
    viewport: vk::Viewport,
    scissor: vk::Rect2D,
    frame_count: u64,
    suboptimal_seen: bool,
    present_failures: u64,
}

impl<'a, B: FrameBackend + ?Sized> PresentationLoop<'a, B> {
    /// Viewport and scissor are fixed from `extent`; the window never resizes.
    pub fn new(backend: &'a B, ring: &'a mut FrameRing, extent: vk::Extent2D) -> Self {
        Self {
            backend,
            ring,
            viewport: full_viewport(extent),
            scissor: full_scissor(extent),
            frame_count: 0,
            suboptimal_seen: false,
            present_failures: 0,
        }
    }

    /// Completed iterations so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn ring(&self) -> &FrameRing {
        self.ring
    }

    /// Tolerated (non out-of-date) present errors so far.
    pub fn present_failures(&self) -> u64 {
        self.present_failures
    }

    /// A whole session: `handler.init`, [`run`](Self::run), `wait_idle`,
    /// `handler.release`.
    ///
    /// `release` always follows `wait_idle`, also when the loop stopped on an
    /// error. A failing `init` skips everything else.
    pub fn run_session<S, H, W>(
        &mut self,
        surface: &mut S,
        handler: &mut H,
        init: &InitContext<'_>,
        wait_idle: W,
    ) -> EngineResult<u64>
    where
        S: SurfaceProvider + ?Sized,
        H: FrameHandler + ?Sized,
        W: FnOnce() -> EngineResult<()>,
    {
        handler.init(init)?;
        let result = self.run(surface, handler);
        if let Err(e) = wait_idle() {
            warn!("device_wait_idle before release failed: {e}");
        }
        handler.release(init.device);
        result
    }

    /// Runs until the surface reports a close request.
    ///
    /// The request is checked after each event poll, before the next frame
    /// starts; a frame in progress always completes. Returns the number of
    /// frames this call produced.
    pub fn run<S, H>(&mut self, surface: &mut S, handler: &mut H) -> EngineResult<u64>
    where
        S: SurfaceProvider + ?Sized,
        H: FrameHandler + ?Sized,
    {
        if self.ring.is_empty() {
            warn!("frame ring is empty; nothing to present");
            return Ok(0);
        }
        let start = self.frame_count;
        loop {
            surface.poll_events();
            if surface.should_close() {
                break;
            }
            self.present_frame(handler)?;
        }
        debug!("presentation loop stopped after {} frames", self.frame_count - start);
        Ok(self.frame_count - start)
    }

    /// One full iteration: wait, acquire, record, submit, present, advance.
    ///
    /// Does nothing on an empty ring.
    pub fn present_frame<H>(&mut self, handler: &mut H) -> EngineResult<()>
    where
        H: FrameHandler + ?Sized,
    {
        let Some(&slot) = self.ring.current() else {
            debug!("frame ring is empty; skipping frame");
            return Ok(());
        };
        let be = self.backend;

        be.wait_for_fence(slot.in_flight)
            .map_err(|e| EngineError::frame(FrameStage::WaitFence, e))?;
        be.reset_fence(slot.in_flight)
            .map_err(|e| EngineError::frame(FrameStage::WaitFence, e))?;

        let (image_index, suboptimal) = be
            .acquire_next_image(slot.image_available)
            .map_err(|e| EngineError::frame(FrameStage::Acquire, e))?;
        if suboptimal {
            self.note_suboptimal(FrameStage::Acquire);
        }
        // The acquired image need not be the slot's own.
        let target = *self
            .ring
            .frame(image_index as usize)
            .ok_or(EngineError::Frame {
                stage: FrameStage::Acquire,
                result: vk::Result::ERROR_UNKNOWN,
            })?;

        let cmd = slot.command_buffer;
        be.begin_commands(cmd)
            .map_err(|e| EngineError::frame(FrameStage::Record, e))?;
        be.transition_image(cmd, target.image, LayoutTransition::ToColorAttachment);
        {
            let ctx = RenderContext {
                command_buffer: cmd,
                image_view: target.image_view,
                viewport: self.viewport,
                scissor: self.scissor,
                frame_number: self.frame_count,
                rendering: be.rendering(),
            };
            handler.render(&ctx);
        }
        be.transition_image(cmd, target.image, LayoutTransition::ToPresent);
        be.end_commands(cmd)
            .map_err(|e| EngineError::frame(FrameStage::Record, e))?;

        be.submit(&Submission {
            command_buffer: cmd,
            wait: slot.image_available,
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal: slot.render_finished,
            fence: slot.in_flight,
        })
        .map_err(|e| EngineError::frame(FrameStage::Submit, e))?;

        match be.present(image_index, slot.render_finished) {
            Ok(false) => {}
            Ok(true) => self.note_suboptimal(FrameStage::Present),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => return Err(EngineError::SwapchainOutOfDate),
            Err(e) => {
                if self.present_failures == 0 {
                    warn!("queue_present failed: {e}; continuing, further failures are not logged");
                }
                self.present_failures += 1;
            }
        }

        self.ring.advance();
        self.frame_count += 1;
        Ok(())
    }

    fn note_suboptimal(&mut self, stage: FrameStage) {
        if !self.suboptimal_seen {
            self.suboptimal_seen = true;
            debug!("{stage} reported a suboptimal swapchain; keeping it");
        }
    }
}
