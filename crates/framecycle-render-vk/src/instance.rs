// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_void, CStr, CString};

use ash::ext::debug_utils;
use ash::khr::{portability_enumeration, surface};
use ash::{vk, Entry, Instance};
use framecycle_render::SurfaceProvider;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use tracing::{debug, error, info, trace, warn};

use crate::error::{EngineError, EngineResult};
use crate::EngineConfig;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const ENGINE_NAME: &CStr = c"framecycle";

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: the loader hands us a valid callback struct for the duration of the call.
    let p_message = unsafe { (*data).p_message };
    if p_message.is_null() {
        return vk::FALSE;
    }
    let msg = unsafe { CStr::from_ptr(p_message) }.to_string_lossy();

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("[vulkan] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("[vulkan] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!("[vulkan] {msg}");
    } else {
        trace!("[vulkan] {msg}");
    }
    vk::FALSE
}

struct DebugMessenger {
    loader: debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

/// Vulkan instance plus the presentable surface bound to the provider's window.
pub struct InstanceContext {
    _entry: Entry,
    instance: Instance,
    debug: Option<DebugMessenger>,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,
}

impl InstanceContext {
    pub fn new<S: SurfaceProvider + ?Sized>(
        provider: &S,
        config: &EngineConfig,
    ) -> EngineResult<Self> {
        let dh: RawDisplayHandle = provider.display_handle()?.as_raw();
        let wh: RawWindowHandle = provider.window_handle()?.as_raw();

        let entry = unsafe { Entry::load()? };
        let (instance, want_messenger) = unsafe { create_instance(&entry, dh, config)? };

        // From here on the instance must be torn down on every error path.
        let debug = if want_messenger {
            match unsafe { create_debug_messenger(&entry, &instance) } {
                Ok(d) => Some(d),
                Err(e) => {
                    warn!("debug messenger unavailable: {e}");
                    None
                }
            }
        } else {
            None
        };

        let surface_loader = surface::Instance::new(&entry, &instance);
        let surface = match unsafe { ash_window::create_surface(&entry, &instance, dh, wh, None) } {
            Ok(s) => s,
            Err(e) => {
                unsafe {
                    if let Some(d) = &debug {
                        d.loader.destroy_debug_utils_messenger(d.messenger, None);
                    }
                    instance.destroy_instance(None);
                }
                return Err(EngineError::SurfaceCreationFailed(e));
            }
        };

        debug!("surface created");
        Ok(Self {
            _entry: entry,
            instance,
            debug,
            surface_loader,
            surface,
        })
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn surface_loader(&self) -> &surface::Instance {
        &self.surface_loader
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }
}

impl Drop for InstanceContext {
    fn drop(&mut self) {
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some(d) = self.debug.take() {
                d.loader.destroy_debug_utils_messenger(d.messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        debug!("instance destroyed");
    }
}

/// Returns the instance and whether a debug messenger can be attached to it.
unsafe fn create_instance(
    entry: &Entry,
    display_raw: RawDisplayHandle,
    config: &EngineConfig,
) -> EngineResult<(Instance, bool)> {
    let app_name = CString::new(config.app_name.replace('\0', "")).unwrap_or_default();

    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app_name.as_ptr(),
        application_version: vk::make_api_version(0, 1, 0, 0),
        p_engine_name: ENGINE_NAME.as_ptr(),
        engine_version: vk::make_api_version(0, 1, 0, 0),
        api_version: vk::API_VERSION_1_3,
        ..Default::default()
    };

    let mut ext_vec = ash_window::enumerate_required_extensions(display_raw)
        .map_err(EngineError::InstanceCreationFailed)?
        .to_vec();

    let inst_exts = unsafe { entry.enumerate_instance_extension_properties(None)? };
    let has_ext = |name: &CStr| {
        inst_exts
            .iter()
            .any(|e| e.extension_name_as_c_str().is_ok_and(|n| n == name))
    };

    let mut flags = vk::InstanceCreateFlags::empty();
    if has_ext(portability_enumeration::NAME) {
        ext_vec.push(portability_enumeration::NAME.as_ptr());
        flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
        debug!("portability enumeration enabled");
    }

    let mut validation = false;
    let mut want_messenger = false;
    if config.validation {
        let layers = unsafe { entry.enumerate_instance_layer_properties()? };
        validation = layers
            .iter()
            .any(|l| l.layer_name_as_c_str().is_ok_and(|n| n == VALIDATION_LAYER));
        if !validation {
            warn!("validation requested but {VALIDATION_LAYER:?} is not installed");
        } else if has_ext(debug_utils::NAME) {
            ext_vec.push(debug_utils::NAME.as_ptr());
            want_messenger = true;
        }
    }

    let layer_names = [VALIDATION_LAYER.as_ptr()];
    let (enabled_layer_count, pp_enabled_layer_names) = if validation {
        (layer_names.len() as u32, layer_names.as_ptr())
    } else {
        (0u32, std::ptr::null())
    };

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        flags,
        p_application_info: &app_info,
        enabled_extension_count: ext_vec.len() as u32,
        pp_enabled_extension_names: ext_vec.as_ptr(),
        enabled_layer_count,
        pp_enabled_layer_names,
        ..Default::default()
    };

    let instance = unsafe { entry.create_instance(&create_info, None) }
        .map_err(EngineError::InstanceCreationFailed)?;
    info!(
        "Vulkan instance ready ({} extensions, validation={validation})",
        ext_vec.len()
    );
    Ok((instance, want_messenger))
}

unsafe fn create_debug_messenger(entry: &Entry, instance: &Instance) -> EngineResult<DebugMessenger> {
    let loader = debug_utils::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    let messenger = unsafe { loader.create_debug_utils_messenger(&ci, None)? };
    Ok(DebugMessenger { loader, messenger })
}
