// SPDX-License-Identifier: CEPL-1.0
use std::fmt;

use ash::vk;
use thiserror::Error;

/// Step of the per-frame protocol that produced a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStage {
    WaitFence,
    Acquire,
    Record,
    Submit,
    Present,
}

impl fmt::Display for FrameStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameStage::WaitFence => "wait_for_fences",
            FrameStage::Acquire => "acquire_next_image",
            FrameStage::Record => "record_commands",
            FrameStage::Submit => "queue_submit",
            FrameStage::Present => "queue_present",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("window handle unavailable: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),

    #[error("failed to create instance: {0}")]
    InstanceCreationFailed(vk::Result),

    #[error("failed to create surface: {0}")]
    SurfaceCreationFailed(vk::Result),

    #[error("no physical graphics devices found")]
    NoSuitableDevice,

    #[error("no graphics or present queue for the device")]
    NoSuitableQueue,

    #[error("no support for different graphics ({graphics}) and present ({present}) queue families")]
    SplitQueueFamilies { graphics: u32, present: u32 },

    #[error("required device extension {0} is not supported")]
    MissingExtension(String),

    #[error("failed to create logical device: {0}")]
    DeviceCreationFailed(vk::Result),

    #[error("device entry point {0} could not be resolved")]
    MissingEntryPoint(&'static str),

    #[error("surface reports no supported formats")]
    NoSurfaceFormats,

    #[error("failed to create swap chain: {0}")]
    SwapchainCreationFailed(vk::Result),

    #[error("failed to create swap chain image view: {0}")]
    ImageViewCreationFailed(vk::Result),

    #[error("failed to allocate {what}: {result}")]
    ResourceAllocationFailed {
        what: &'static str,
        result: vk::Result,
    },

    #[error("{stage} failed: {result}")]
    Frame { stage: FrameStage, result: vk::Result },

    #[error("swap chain is out of date; rebuilding it is not supported")]
    SwapchainOutOfDate,

    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),
}

impl EngineError {
    /// Classifies a per-frame failure, singling out an out-of-date swap chain.
    pub fn frame(stage: FrameStage, result: vk::Result) -> Self {
        if result == vk::Result::ERROR_OUT_OF_DATE_KHR {
            EngineError::SwapchainOutOfDate
        } else {
            EngineError::Frame { stage, result }
        }
    }

    pub(crate) fn alloc(what: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| EngineError::ResourceAllocationFailed { what, result }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
