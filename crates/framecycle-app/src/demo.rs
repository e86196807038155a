// SPDX-License-Identifier: CEPL-1.0
use std::time::{Duration, Instant};

use framecycle_render_vk::ash::vk;
use framecycle_render_vk::{EngineResult, FrameHandler, InitContext, RenderContext};
use tracing::info;

/// Clears every frame to one colour and reports fps once a second.
pub struct ClearScreen {
    clear_color: [f32; 4],
    frames: u32,
    last_fps_instant: Instant,
}

impl ClearScreen {
    pub fn new(clear_color: [f32; 4]) -> Self {
        Self {
            clear_color,
            frames: 0,
            last_fps_instant: Instant::now(),
        }
    }

    fn tick(&mut self) {
        self.frames = self.frames.saturating_add(1);
        let now = Instant::now();
        if now.duration_since(self.last_fps_instant) >= Duration::from_secs(1) {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

impl FrameHandler for ClearScreen {
    fn init(&mut self, ctx: &InitContext<'_>) -> EngineResult<()> {
        info!(
            "clearing {}x{} {:?} images to {:?}",
            ctx.extent.width, ctx.extent.height, ctx.format, self.clear_color
        );
        self.last_fps_instant = Instant::now();
        Ok(())
    }

    fn render(&mut self, ctx: &RenderContext<'_>) {
        let attachment = vk::RenderingAttachmentInfo {
            s_type: vk::StructureType::RENDERING_ATTACHMENT_INFO,
            image_view: ctx.image_view,
            image_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            clear_value: vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            ..Default::default()
        };
        let info = vk::RenderingInfo {
            s_type: vk::StructureType::RENDERING_INFO,
            render_area: ctx.scissor,
            layer_count: 1,
            color_attachment_count: 1,
            p_color_attachments: &attachment,
            ..Default::default()
        };
        ctx.begin_rendering(&info);
        ctx.end_rendering();
        self.tick();
    }

    fn release(&mut self, _device: &framecycle_render_vk::ash::Device) {
        info!("clear-screen handler released");
    }
}
