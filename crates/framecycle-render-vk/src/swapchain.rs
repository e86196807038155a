// SPDX-License-Identifier: CEPL-1.0
//! Swap chain negotiation and ownership.
//!
//! The `choose_*` functions are the pure part of the negotiation and operate
//! on whatever the surface reported; [`SwapchainState`] applies their result.

use ash::khr::{surface, swapchain};
use ash::vk;
use framecycle_render::RenderSize;
use tracing::{debug, info};

use crate::device::DeviceContext;
use crate::error::{EngineError, EngineResult};
use crate::instance::InstanceContext;
use crate::PresentModePreference;

/// `currentExtent.width` value meaning "the surface size follows the swap chain".
pub const UNDEFINED_EXTENT: u32 = u32::MAX;

/// 8-bit BGRA in the nonlinear sRGB color space.
pub const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Preferred format if listed anywhere, otherwise the first one reported.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == PREFERRED_SURFACE_FORMAT.format
                && f.color_space == PREFERRED_SURFACE_FORMAT.color_space
        })
        .or_else(|| formats.first().copied())
}

/// MAILBOX when allowed and available, otherwise FIFO (always supported).
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    preference: PresentModePreference,
) -> vk::PresentModeKHR {
    match preference {
        PresentModePreference::LowLatency if modes.contains(&vk::PresentModeKHR::MAILBOX) => {
            vk::PresentModeKHR::MAILBOX
        }
        _ => vk::PresentModeKHR::FIFO,
    }
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, framebuffer: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != UNDEFINED_EXTENT {
        return caps.current_extent;
    }
    let (min, max) = (caps.min_image_extent, caps.max_image_extent);
    vk::Extent2D {
        width: framebuffer.width.max(min.width).min(max.width),
        height: framebuffer.height.max(min.height).min(max.height),
    }
}

/// One more image than the minimum, capped by `max_image_count` when it is
/// nonzero (zero means unbounded).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = caps
        .min_image_count
        .saturating_add(1)
        .max(caps.min_image_count);
    if caps.max_image_count > 0 {
        wanted.min(caps.max_image_count)
    } else {
        wanted
    }
}

/// What the adapter/surface pair supports.
#[derive(Clone, Debug, Default)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// The negotiated swap chain parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainPlan {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainSupport {
    pub fn query(
        surface_loader: &surface::Instance,
        phys: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> EngineResult<Self> {
        let (capabilities, formats, present_modes) = unsafe {
            (
                surface_loader.get_physical_device_surface_capabilities(phys, surface)?,
                surface_loader.get_physical_device_surface_formats(phys, surface)?,
                surface_loader.get_physical_device_surface_present_modes(phys, surface)?,
            )
        };
        debug!(
            "surface support: {} formats, {} present modes, images {}..{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            capabilities.max_image_count
        );
        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    pub fn plan(
        &self,
        framebuffer: RenderSize,
        preference: PresentModePreference,
    ) -> EngineResult<SwapchainPlan> {
        let format = choose_surface_format(&self.formats).ok_or(EngineError::NoSurfaceFormats)?;
        Ok(SwapchainPlan {
            format,
            present_mode: choose_present_mode(&self.present_modes, preference),
            extent: choose_extent(&self.capabilities, framebuffer),
            image_count: choose_image_count(&self.capabilities),
            pre_transform: self.capabilities.current_transform,
        })
    }
}

/// One presentable image and the view rendering goes through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
}

/// The swap chain and its per-image views. Views are destroyed with it.
pub struct SwapchainState {
    device: ash::Device,
    loader: swapchain::Device,
    swapchain: vk::SwapchainKHR,
    plan: SwapchainPlan,
    images: Vec<SwapchainImage>,
}

impl SwapchainState {
    pub fn new(
        ctx: &InstanceContext,
        device: &DeviceContext,
        framebuffer: RenderSize,
        preference: PresentModePreference,
    ) -> EngineResult<Self> {
        let support = SwapchainSupport::query(ctx.surface_loader(), device.physical(), ctx.surface())?;
        let plan = support.plan(framebuffer, preference)?;

        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: ctx.surface(),
            min_image_count: plan.image_count,
            image_format: plan.format.format,
            image_color_space: plan.format.color_space,
            image_extent: plan.extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: vk::SharingMode::EXCLUSIVE,
            pre_transform: plan.pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: plan.present_mode,
            clipped: vk::TRUE,
            old_swapchain: vk::SwapchainKHR::null(),
            ..Default::default()
        };

        let loader = swapchain::Device::new(ctx.instance(), device.device());
        let handle = unsafe { loader.create_swapchain(&swap_info, None) }
            .map_err(EngineError::SwapchainCreationFailed)?;

        // Views are pushed one by one so Drop releases whatever was created.
        let mut state = SwapchainState {
            device: device.device().clone(),
            loader,
            swapchain: handle,
            plan,
            images: Vec::new(),
        };

        let images = unsafe { state.loader.get_swapchain_images(handle) }
            .map_err(EngineError::SwapchainCreationFailed)?;
        state.images.reserve_exact(images.len());
        for image in images {
            let view = unsafe { create_view(&state.device, image, plan.format.format)? };
            state.images.push(SwapchainImage { image, view });
        }

        info!(
            "swapchain ready ({}x{}, {:?}/{:?}, {:?}, {} images)",
            plan.extent.width,
            plan.extent.height,
            plan.format.format,
            plan.format.color_space,
            plan.present_mode,
            state.images.len()
        );
        Ok(state)
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    pub fn loader(&self) -> &swapchain::Device {
        &self.loader
    }

    pub fn format(&self) -> vk::Format {
        self.plan.format.format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.plan.present_mode
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.plan.extent
    }

    pub fn images(&self) -> &[SwapchainImage] {
        &self.images
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }
}

impl Drop for SwapchainState {
    fn drop(&mut self) {
        unsafe {
            for img in self.images.drain(..) {
                self.device.destroy_image_view(img.view, None);
            }
            self.loader.destroy_swapchain(self.swapchain, None);
        }
        debug!("swapchain destroyed");
    }
}

unsafe fn create_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
) -> EngineResult<vk::ImageView> {
    let iv_info = vk::ImageViewCreateInfo {
        s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
        image,
        view_type: vk::ImageViewType::TYPE_2D,
        format,
        components: vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        },
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        },
        ..Default::default()
    };
    unsafe { device.create_image_view(&iv_info, None) }.map_err(EngineError::ImageViewCreationFailed)
}
