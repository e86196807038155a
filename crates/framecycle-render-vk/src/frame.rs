// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::{debug, info};

use crate::device::DeviceContext;
use crate::error::{EngineError, EngineResult};
use crate::swapchain::SwapchainState;

/// Per-slot recording and synchronization state.
///
/// `image` and `image_view` are borrowed from the swap chain; everything else
/// belongs to the slot and is only touched on the slot's turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Frame {
    pub image: vk::Image,
    pub image_view: vk::ImageView,
    pub command_buffer: vk::CommandBuffer,
    /// Signaled by acquire, waited on by submit.
    pub image_available: vk::Semaphore,
    /// Signaled by submit, waited on by present.
    pub render_finished: vk::Semaphore,
    /// Created signaled so the first wait on the slot returns immediately.
    pub in_flight: vk::Fence,
}

/// Frames plus the round-robin cursor over them.
#[derive(Debug)]
pub struct FrameRing {
    frames: Vec<Frame>,
    cursor: usize,
}

impl FrameRing {
    pub fn from_frames(frames: Vec<Frame>) -> Self {
        Self { frames, cursor: 0 }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Index of the slot the next iteration will use.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Slot at the cursor; `None` only for an empty ring.
    pub fn current(&self) -> Option<&Frame> {
        self.frames.get(self.cursor)
    }

    pub fn frame(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Moves to `(cursor + 1) mod len` and returns the new cursor.
    pub fn advance(&mut self) -> usize {
        if !self.frames.is_empty() {
            self.cursor = (self.cursor + 1) % self.frames.len();
        }
        self.cursor
    }
}

/// Owns the command pool and every slot's semaphores and fence.
pub struct FramePool {
    device: ash::Device,
    command_pool: vk::CommandPool,
    ring: FrameRing,
}

impl FramePool {
    /// Builds one slot per swap chain image.
    pub fn build(device: &DeviceContext, swapchain: &SwapchainState) -> EngineResult<Self> {
        let d = device.device();
        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: device.queue_family(),
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        let command_pool = unsafe { d.create_command_pool(&pool_info, None) }
            .map_err(EngineError::alloc("command pool"))?;

        let mut pool = FramePool {
            device: d.clone(),
            command_pool,
            ring: FrameRing::from_frames(Vec::with_capacity(swapchain.image_count())),
        };

        for (i, img) in swapchain.images().iter().enumerate() {
            let frame = unsafe { pool.create_frame(img.image, img.view)? };
            debug!("frame slot {i} ready");
            pool.ring.frames.push(frame);
        }

        info!("frame ring built with {} slots", pool.ring.len());
        Ok(pool)
    }

    pub fn ring(&self) -> &FrameRing {
        &self.ring
    }

    pub fn ring_mut(&mut self) -> &mut FrameRing {
        &mut self.ring
    }

    unsafe fn create_frame(&self, image: vk::Image, image_view: vk::ImageView) -> EngineResult<Frame> {
        let d = &self.device;
        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.command_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
            ..Default::default()
        };
        // Freed together with the pool.
        let command_buffer = unsafe { d.allocate_command_buffers(&alloc_info) }
            .map_err(EngineError::alloc("command buffer"))?[0];

        let sem_ci = vk::SemaphoreCreateInfo::default();
        let fence_ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };

        let image_available = unsafe { d.create_semaphore(&sem_ci, None) }
            .map_err(EngineError::alloc("semaphore"))?;
        let render_finished = match unsafe { d.create_semaphore(&sem_ci, None) } {
            Ok(s) => s,
            Err(e) => {
                unsafe { d.destroy_semaphore(image_available, None) };
                return Err(EngineError::alloc("semaphore")(e));
            }
        };
        let in_flight = match unsafe { d.create_fence(&fence_ci, None) } {
            Ok(f) => f,
            Err(e) => {
                unsafe {
                    d.destroy_semaphore(render_finished, None);
                    d.destroy_semaphore(image_available, None);
                }
                return Err(EngineError::alloc("fence")(e));
            }
        };

        Ok(Frame {
            image,
            image_view,
            command_buffer,
            image_available,
            render_finished,
            in_flight,
        })
    }
}

impl Drop for FramePool {
    fn drop(&mut self) {
        unsafe {
            let d = &self.device;
            for f in self.ring.frames.drain(..) {
                d.destroy_semaphore(f.render_finished, None);
                d.destroy_semaphore(f.image_available, None);
                d.destroy_fence(f.in_flight, None);
            }
            d.destroy_command_pool(self.command_pool, None);
        }
        debug!("frame ring destroyed");
    }
}
