// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_void, CStr};

use ash::khr::{dynamic_rendering, portability_subset, swapchain};
use ash::prelude::VkResult;
use ash::{vk, Instance};
use tracing::{debug, info};

use crate::backend::RenderingCommands;
use crate::error::{EngineError, EngineResult};
use crate::instance::InstanceContext;

/// Graphics/present capabilities of one queue family on the chosen adapter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilySupport {
    pub graphics: bool,
    pub present: bool,
}

/// Picks the single family used for both graphics and presentation.
///
/// Families are scanned in index order without stopping early, so when several
/// qualify the highest index wins for each capability. Separate graphics and
/// present families are rejected.
pub fn select_queue_family(families: &[QueueFamilySupport]) -> EngineResult<u32> {
    let mut graphics = None;
    let mut present = None;
    for (i, family) in families.iter().enumerate() {
        if family.graphics {
            graphics = Some(i as u32);
        }
        if family.present {
            present = Some(i as u32);
        }
    }

    match (graphics, present) {
        (Some(g), Some(p)) if g == p => Ok(g),
        (Some(graphics), Some(present)) => Err(EngineError::SplitQueueFamilies { graphics, present }),
        _ => Err(EngineError::NoSuitableQueue),
    }
}

/// Graphics flag and present support per family; a failing present query
/// aborts the scan with its own error.
pub fn family_support<F>(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: F,
) -> EngineResult<Vec<QueueFamilySupport>>
where
    F: FnMut(u32) -> VkResult<bool>,
{
    families
        .iter()
        .enumerate()
        .map(|(i, q)| -> EngineResult<QueueFamilySupport> {
            Ok(QueueFamilySupport {
                graphics: q.queue_flags.contains(vk::QueueFlags::GRAPHICS),
                present: supports_present(i as u32)?,
            })
        })
        .collect()
}

/// `vkCmdBeginRenderingKHR` / `vkCmdEndRenderingKHR`, resolved once per device.
pub struct DynamicRendering {
    loader: dynamic_rendering::Device,
}

impl DynamicRendering {
    const BEGIN: &'static CStr = c"vkCmdBeginRenderingKHR";
    const END: &'static CStr = c"vkCmdEndRenderingKHR";

    fn load(instance: &Instance, device: &ash::Device) -> EngineResult<Self> {
        let get_device_proc_addr = instance.fp_v1_0().get_device_proc_addr;
        for (name, label) in [(Self::BEGIN, "vkCmdBeginRenderingKHR"), (Self::END, "vkCmdEndRenderingKHR")] {
            let addr = unsafe { get_device_proc_addr(device.handle(), name.as_ptr()) };
            if addr.is_none() {
                return Err(EngineError::MissingEntryPoint(label));
            }
        }
        Ok(Self {
            loader: dynamic_rendering::Device::new(instance, device),
        })
    }
}

impl RenderingCommands for DynamicRendering {
    fn begin_rendering(&self, cmd: vk::CommandBuffer, info: &vk::RenderingInfo<'_>) {
        unsafe { self.loader.cmd_begin_rendering(cmd, info) }
    }

    fn end_rendering(&self, cmd: vk::CommandBuffer) {
        unsafe { self.loader.cmd_end_rendering(cmd) }
    }
}

/// Adapter, logical device and the one queue shared by graphics and present.
pub struct DeviceContext {
    physical: vk::PhysicalDevice,
    device: ash::Device,
    queue_family: u32,
    queue: vk::Queue,
    rendering: DynamicRendering,
}

impl DeviceContext {
    pub fn new(ctx: &InstanceContext) -> EngineResult<Self> {
        let instance = ctx.instance();
        let (physical, families) = unsafe { pick_adapter(instance)? };

        let support = family_support(&families, |i| unsafe {
            ctx.surface_loader()
                .get_physical_device_surface_support(physical, i, ctx.surface())
        })?;
        let queue_family = select_queue_family(&support)?;
        info!("queue family {queue_family} selected for graphics + present");

        let device = unsafe { create_device(instance, physical, queue_family)? };
        let rendering = match DynamicRendering::load(instance, &device) {
            Ok(r) => r,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e);
            }
        };
        let queue = unsafe { device.get_device_queue(queue_family, 0) };

        Ok(Self {
            physical,
            device,
            queue_family,
            queue,
            rendering,
        })
    }

    pub fn physical(&self) -> vk::PhysicalDevice {
        self.physical
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    pub fn rendering(&self) -> &DynamicRendering {
        &self.rendering
    }

    /// Blocks until every queue on the device is idle.
    pub fn wait_idle(&self) -> EngineResult<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();
            self.device.destroy_device(None);
        }
        debug!("logical device destroyed");
    }
}

/// First adapter exposing at least one queue family; no ranking is done.
unsafe fn pick_adapter(
    instance: &Instance,
) -> EngineResult<(vk::PhysicalDevice, Vec<vk::QueueFamilyProperties>)> {
    let adapters = unsafe { instance.enumerate_physical_devices()? };
    for phys in adapters {
        let families = unsafe { instance.get_physical_device_queue_family_properties(phys) };
        if families.is_empty() {
            continue;
        }
        let props = unsafe { instance.get_physical_device_properties(phys) };
        let name = props
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        info!(
            "adapter: {name} (api {}.{}, {} queue families)",
            vk::api_version_major(props.api_version),
            vk::api_version_minor(props.api_version),
            families.len()
        );
        return Ok((phys, families));
    }
    Err(EngineError::NoSuitableDevice)
}

unsafe fn create_device(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    queue_family: u32,
) -> EngineResult<ash::Device> {
    let ext_props = unsafe { instance.enumerate_device_extension_properties(phys)? };
    let has = |name: &CStr| {
        ext_props
            .iter()
            .any(|e| e.extension_name_as_c_str().is_ok_and(|n| n == name))
    };

    let mut device_exts = Vec::with_capacity(3);
    for required in [swapchain::NAME, dynamic_rendering::NAME] {
        if !has(required) {
            return Err(EngineError::MissingExtension(required.to_string_lossy().into_owned()));
        }
        device_exts.push(required.as_ptr());
    }
    if has(portability_subset::NAME) {
        device_exts.push(portability_subset::NAME.as_ptr());
        debug!("portability subset enabled");
    }

    let priorities = [1.0_f32];
    let qinfo = vk::DeviceQueueCreateInfo {
        s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
        queue_family_index: queue_family,
        queue_count: 1,
        p_queue_priorities: priorities.as_ptr(),
        ..Default::default()
    };

    let mut dynamic_rendering_feature = vk::PhysicalDeviceDynamicRenderingFeaturesKHR {
        s_type: vk::StructureType::PHYSICAL_DEVICE_DYNAMIC_RENDERING_FEATURES_KHR,
        dynamic_rendering: vk::TRUE,
        ..Default::default()
    };
    let features = vk::PhysicalDeviceFeatures::default();

    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        p_next: (&mut dynamic_rendering_feature) as *mut _ as *const c_void,
        queue_create_info_count: 1,
        p_queue_create_infos: &qinfo,
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        p_enabled_features: &features,
        ..Default::default()
    };

    let device = unsafe { instance.create_device(phys, &dinfo, None) }
        .map_err(EngineError::DeviceCreationFailed)?;
    debug!("logical device created with {} extensions", device_exts.len());
    Ok(device)
}
