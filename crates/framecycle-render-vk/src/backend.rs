// SPDX-License-Identifier: CEPL-1.0
//! The GPU-facing operations the presentation loop is written against.
//!
//! [`VkBackend`] forwards them to the device; tests substitute a recorder.

use ash::khr::swapchain;
use ash::prelude::VkResult;
use ash::vk;

use crate::device::{DeviceContext, DynamicRendering};
use crate::swapchain::SwapchainState;

/// Begin/end of a dynamic-rendering region.
pub trait RenderingCommands {
    fn begin_rendering(&self, cmd: vk::CommandBuffer, info: &vk::RenderingInfo<'_>);
    fn end_rendering(&self, cmd: vk::CommandBuffer);
}

/// The two layout changes every frame makes on its back buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayoutTransition {
    /// Freshly acquired (contents discarded) to render target.
    ToColorAttachment,
    /// Render target to presentable.
    ToPresent,
}

impl LayoutTransition {
    pub fn old_layout(self) -> vk::ImageLayout {
        match self {
            LayoutTransition::ToColorAttachment => vk::ImageLayout::UNDEFINED,
            LayoutTransition::ToPresent => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }
    }

    pub fn new_layout(self) -> vk::ImageLayout {
        match self {
            LayoutTransition::ToColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            LayoutTransition::ToPresent => vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }

    /// Source/destination stages.
    ///
    /// The acquire transition starts at COLOR_ATTACHMENT_OUTPUT so it chains
    /// after the acquire semaphore wait, which happens at that stage.
    pub fn stages(self) -> (vk::PipelineStageFlags, vk::PipelineStageFlags) {
        match self {
            LayoutTransition::ToColorAttachment => (
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            ),
            LayoutTransition::ToPresent => (
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            ),
        }
    }

    pub fn access(self) -> (vk::AccessFlags, vk::AccessFlags) {
        match self {
            LayoutTransition::ToColorAttachment => (
                vk::AccessFlags::empty(),
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            ),
            LayoutTransition::ToPresent => (
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                vk::AccessFlags::empty(),
            ),
        }
    }

    pub fn barrier(self, image: vk::Image) -> vk::ImageMemoryBarrier<'static> {
        let (src_access_mask, dst_access_mask) = self.access();
        vk::ImageMemoryBarrier {
            s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
            src_access_mask,
            dst_access_mask,
            old_layout: self.old_layout(),
            new_layout: self.new_layout(),
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            image,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        }
    }
}

/// One frame's queue submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Submission {
    pub command_buffer: vk::CommandBuffer,
    pub wait: vk::Semaphore,
    pub wait_stage: vk::PipelineStageFlags,
    pub signal: vk::Semaphore,
    pub fence: vk::Fence,
}

pub trait FrameBackend {
    /// Blocks until `fence` signals; no timeout.
    fn wait_for_fence(&self, fence: vk::Fence) -> VkResult<()>;

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()>;

    /// Returns the acquired image index and whether the swap chain is suboptimal.
    fn acquire_next_image(&self, signal: vk::Semaphore) -> VkResult<(u32, bool)>;

    /// Resets `cmd` and begins recording into it.
    fn begin_commands(&self, cmd: vk::CommandBuffer) -> VkResult<()>;

    fn transition_image(&self, cmd: vk::CommandBuffer, image: vk::Image, transition: LayoutTransition);

    fn end_commands(&self, cmd: vk::CommandBuffer) -> VkResult<()>;

    fn submit(&self, submission: &Submission) -> VkResult<()>;

    /// Returns `true` when the presentation engine reports suboptimal.
    fn present(&self, image_index: u32, wait: vk::Semaphore) -> VkResult<bool>;

    fn rendering(&self) -> &dyn RenderingCommands;
}

/// [`FrameBackend`] over a live device and swap chain.
pub struct VkBackend<'a> {
    device: &'a ash::Device,
    queue: vk::Queue,
    swapchain_loader: &'a swapchain::Device,
    swapchain: vk::SwapchainKHR,
    rendering: &'a DynamicRendering,
}

impl<'a> VkBackend<'a> {
    pub fn new(device: &'a DeviceContext, swapchain: &'a SwapchainState) -> Self {
        Self {
            device: device.device(),
            queue: device.queue(),
            swapchain_loader: swapchain.loader(),
            swapchain: swapchain.handle(),
            rendering: device.rendering(),
        }
    }
}

impl FrameBackend for VkBackend<'_> {
    fn wait_for_fence(&self, fence: vk::Fence) -> VkResult<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, u64::MAX) }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        unsafe { self.device.reset_fences(&[fence]) }
    }

    fn acquire_next_image(&self, signal: vk::Semaphore) -> VkResult<(u32, bool)> {
        unsafe {
            self.swapchain_loader
                .acquire_next_image(self.swapchain, u64::MAX, signal, vk::Fence::null())
        }
    }

    fn begin_commands(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            ..Default::default()
        };
        unsafe {
            self.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            self.device.begin_command_buffer(cmd, &begin)
        }
    }

    fn transition_image(&self, cmd: vk::CommandBuffer, image: vk::Image, transition: LayoutTransition) {
        let (src_stage, dst_stage) = transition.stages();
        let barrier = transition.barrier(image);
        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(&barrier),
            );
        }
    }

    fn end_commands(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        unsafe { self.device.end_command_buffer(cmd) }
    }

    fn submit(&self, submission: &Submission) -> VkResult<()> {
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &submission.wait,
            p_wait_dst_stage_mask: &submission.wait_stage,
            command_buffer_count: 1,
            p_command_buffers: &submission.command_buffer,
            signal_semaphore_count: 1,
            p_signal_semaphores: &submission.signal,
            ..Default::default()
        };
        unsafe {
            self.device
                .queue_submit(self.queue, std::slice::from_ref(&submit), submission.fence)
        }
    }

    fn present(&self, image_index: u32, wait: vk::Semaphore) -> VkResult<bool> {
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &self.swapchain,
            p_image_indices: &image_index,
            ..Default::default()
        };
        unsafe { self.swapchain_loader.queue_present(self.queue, &present) }
    }

    fn rendering(&self) -> &dyn RenderingCommands {
        self.rendering
    }
}
