// SPDX-License-Identifier: CEPL-1.0
//! Frame-cycling presentation on Vulkan.
//!
//! Startup builds, in order, the instance and surface, a [`DeviceContext`]
//! with one graphics+present queue, a [`SwapchainState`], and a [`FramePool`]
//! holding one [`Frame`] per swap chain image. [`PresentationEngine::execute`]
//! then cycles through the ring until the window closes:
//!
//! ```text
//! poll events -> wait+reset slot fence -> acquire (signals image_available)
//!   -> record: barrier, FrameHandler::render, barrier
//!   -> submit (waits image_available, signals render_finished + fence)
//!   -> present (waits render_finished) -> advance cursor
//! ```
#![deny(unsafe_op_in_unsafe_fn)]

pub mod backend;
pub mod device;
mod engine;
pub mod error;
pub mod frame;
pub mod instance;
pub mod present;
pub mod swapchain;

pub use backend::{FrameBackend, LayoutTransition, RenderingCommands, Submission, VkBackend};
pub use device::{family_support, select_queue_family, DeviceContext, DynamicRendering, QueueFamilySupport};
pub use engine::{EngineConfig, PresentModePreference, PresentationEngine};
pub use error::{EngineError, EngineResult, FrameStage};
pub use frame::{Frame, FramePool, FrameRing};
pub use present::{FrameHandler, InitContext, PresentationLoop, RenderContext};
pub use swapchain::{SwapchainPlan, SwapchainState, SwapchainSupport};

pub use ash;
