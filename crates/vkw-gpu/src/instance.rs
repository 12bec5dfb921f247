//! Vulkan instance creation.

use crate::debug;
use crate::error::{GpuError, Result};
use ash::vk;
use std::ffi::{CStr, CString};
use std::sync::Arc;

/// The standard validation layer.
pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Application metadata handed to the driver.
#[derive(Debug, Clone)]
pub struct AppInfo {
    pub name: String,
    pub version: u32,
    pub engine_name: String,
    pub engine_version: u32,
    pub api_version: u32,
}

impl Default for AppInfo {
    fn default() -> Self {
        Self {
            name: "VulkanApp".to_string(),
            version: vk::make_api_version(0, 0, 0, 0),
            engine_name: "VulkanEngine".to_string(),
            engine_version: vk::make_api_version(0, 0, 0, 0),
            api_version: vk::API_VERSION_1_3,
        }
    }
}

impl AppInfo {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_version(mut self, major: u32, minor: u32, patch: u32) -> Self {
        self.version = vk::make_api_version(0, major, minor, patch);
        self
    }

    pub fn with_engine(mut self, name: impl Into<String>, major: u32, minor: u32, patch: u32) -> Self {
        self.engine_name = name.into();
        self.engine_version = vk::make_api_version(0, major, minor, patch);
        self
    }

    pub fn with_api_version(mut self, api_version: u32) -> Self {
        self.api_version = api_version;
        self
    }
}

/// Requested layers and extensions.
#[derive(Debug, Clone, Default)]
pub struct InstanceInfo {
    pub layers: Vec<CString>,
    pub extensions: Vec<CString>,
}

impl InstanceInfo {
    pub fn with_layer(mut self, layer: &CStr) -> Self {
        self.layers.push(layer.to_owned());
        self
    }

    pub fn with_extension(mut self, extension: &CStr) -> Self {
        self.extensions.push(extension.to_owned());
        self
    }

    pub fn with_extensions<'a>(mut self, extensions: impl IntoIterator<Item = &'a CStr>) -> Self {
        self.extensions
            .extend(extensions.into_iter().map(CStr::to_owned));
        self
    }
}

/// Debug tooling switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugInfo {
    /// Install the debug-utils messenger.
    pub utils: bool,
    /// Enable the Khronos validation layer.
    pub validation: bool,
}

impl Default for DebugInfo {
    fn default() -> Self {
        Self {
            utils: cfg!(debug_assertions),
            validation: cfg!(debug_assertions),
        }
    }
}

impl DebugInfo {
    pub const fn disabled() -> Self {
        Self {
            utils: false,
            validation: false,
        }
    }
}

/// Merge the requested names with an optional debug name and check them against
/// what the driver reports.
fn resolve_names(
    kind: &str,
    requested: &[CString],
    available: &[CString],
    debug_name: Option<&CStr>,
) -> Result<Vec<CString>> {
    let mut resolved: Vec<CString> = Vec::with_capacity(requested.len() + 1);
    for name in requested {
        if !resolved.contains(name) {
            resolved.push(name.clone());
        }
    }

    if let Some(name) = debug_name {
        if available.iter().any(|candidate| candidate.as_c_str() == name) {
            if !resolved.iter().any(|candidate| candidate.as_c_str() == name) {
                resolved.push(name.to_owned());
            }
        } else {
            tracing::warn!("Debug {kind} {name:?} not available");
        }
    }

    let missing: Vec<String> = resolved
        .iter()
        .filter(|name| !available.contains(name))
        .map(|name| name.to_string_lossy().into_owned())
        .collect();
    if !missing.is_empty() {
        for name in &missing {
            tracing::error!("Instance {kind} {name} is not supported");
        }
        return Err(GpuError::UnsupportedCapability(format!(
            "instance {kind}s not supported: {}",
            missing.join(", ")
        )));
    }

    Ok(resolved)
}

fn to_cstring(kind: &str, value: &str) -> Result<CString> {
    CString::new(value)
        .map_err(|e| GpuError::InvalidArgument(format!("{kind} contains a nul byte: {e}")))
}

/// Owner of the Vulkan instance and its debug messenger.
pub struct Instance {
    entry: ash::Entry,
    instance: ash::Instance,
    surface_loader: ash::khr::surface::Instance,
    debug_messenger: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    layers: Vec<CString>,
    extensions: Vec<CString>,
    physical_devices: Vec<vk::PhysicalDevice>,
    api_version: u32,
}

impl Instance {
    /// Load the driver, validate layers and extensions, and create the instance.
    pub fn new(app: &AppInfo, info: &InstanceInfo, debug: DebugInfo) -> Result<Arc<Self>> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            GpuError::UnsupportedCapability(format!("Failed to load Vulkan: {e}"))
        })?;

        let available_layers: Vec<CString> = unsafe { entry.enumerate_instance_layer_properties()? }
            .iter()
            .filter_map(|props| props.layer_name_as_c_str().ok().map(CStr::to_owned))
            .collect();
        let available_extensions: Vec<CString> =
            unsafe { entry.enumerate_instance_extension_properties(None)? }
                .iter()
                .filter_map(|props| props.extension_name_as_c_str().ok().map(CStr::to_owned))
                .collect();

        let layers = resolve_names(
            "layer",
            &info.layers,
            &available_layers,
            debug.validation.then_some(VALIDATION_LAYER),
        )?;
        let extensions = resolve_names(
            "extension",
            &info.extensions,
            &available_extensions,
            debug.utils.then_some(ash::ext::debug_utils::NAME),
        )?;
        let utils_enabled = extensions
            .iter()
            .any(|name| name.as_c_str() == ash::ext::debug_utils::NAME);

        let app_name = to_cstring("application name", &app.name)?;
        let engine_name = to_cstring("engine name", &app.engine_name)?;
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(app.version)
            .engine_name(&engine_name)
            .engine_version(app.engine_version)
            .api_version(app.api_version);

        let layer_names: Vec<*const std::ffi::c_char> =
            layers.iter().map(|name| name.as_ptr()).collect();
        let extension_names: Vec<*const std::ffi::c_char> =
            extensions.iter().map(|name| name.as_ptr()).collect();

        // MoltenVK is only enumerated with the portability flag.
        let flags = if extensions
            .iter()
            .any(|name| name.as_c_str() == ash::khr::portability_enumeration::NAME)
        {
            vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR
        } else {
            vk::InstanceCreateFlags::empty()
        };

        let mut messenger_info = debug::messenger_create_info();
        let mut create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_layer_names(&layer_names)
            .enabled_extension_names(&extension_names)
            .flags(flags);
        if utils_enabled {
            create_info = create_info.push_next(&mut messenger_info);
        }

        let instance = unsafe { entry.create_instance(&create_info, None)? };

        let debug_messenger = if utils_enabled {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let info = debug::messenger_create_info();
            match unsafe { loader.create_debug_utils_messenger(&info, None) } {
                Ok(messenger) => Some((loader, messenger)),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

        let mut this = Self {
            entry,
            instance,
            surface_loader,
            debug_messenger,
            layers,
            extensions,
            physical_devices: Vec::new(),
            api_version: app.api_version,
        };
        this.physical_devices = unsafe { this.instance.enumerate_physical_devices()? };

        tracing::info!(
            layers = this.layers.len(),
            extensions = this.extensions.len(),
            physical_devices = this.physical_devices.len(),
            "Created Vulkan instance for {}",
            app.name
        );

        Ok(Arc::new(this))
    }

    /// Get the loader entry.
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    /// Get the raw instance.
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the surface extension loader.
    pub fn surface_loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }

    /// Physical devices enumerated at creation.
    pub fn physical_devices(&self) -> &[vk::PhysicalDevice] {
        &self.physical_devices
    }

    /// API version requested at creation.
    pub fn api_version(&self) -> u32 {
        self.api_version
    }

    pub fn enabled_layers(&self) -> &[CString] {
        &self.layers
    }

    pub fn enabled_extensions(&self) -> &[CString] {
        &self.extensions
    }

    pub fn is_extension_enabled(&self, name: &CStr) -> bool {
        self.extensions.iter().any(|enabled| enabled.as_c_str() == name)
    }

    /// Whether the debug messenger is installed.
    pub fn has_debug_messenger(&self) -> bool {
        self.debug_messenger.is_some()
    }

    pub fn queue_family_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Vec<vk::QueueFamilyProperties> {
        unsafe {
            self.instance
                .get_physical_device_queue_family_properties(physical_device)
        }
    }

    pub fn memory_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceMemoryProperties {
        unsafe {
            self.instance
                .get_physical_device_memory_properties(physical_device)
        }
    }

    pub fn format_properties(
        &self,
        physical_device: vk::PhysicalDevice,
        format: vk::Format,
    ) -> vk::FormatProperties {
        unsafe {
            self.instance
                .get_physical_device_format_properties(physical_device, format)
        }
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let Some((loader, messenger)) = self.debug_messenger.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&CStr]) -> Vec<CString> {
        list.iter().map(|name| (*name).to_owned()).collect()
    }

    #[test]
    fn debug_names_added_when_available() {
        let available = names(&[VALIDATION_LAYER, c"VK_LAYER_other"]);
        let resolved = resolve_names("layer", &[], &available, Some(VALIDATION_LAYER)).unwrap();
        assert_eq!(resolved, names(&[VALIDATION_LAYER]));
    }

    #[test]
    fn missing_debug_names_are_skipped() {
        let available = names(&[c"VK_KHR_surface"]);
        let requested = names(&[c"VK_KHR_surface"]);
        let resolved = resolve_names(
            "extension",
            &requested,
            &available,
            Some(ash::ext::debug_utils::NAME),
        )
        .unwrap();
        assert_eq!(resolved, requested);
    }

    #[test]
    fn unknown_requests_are_fatal() {
        let available = names(&[c"VK_KHR_surface"]);
        let requested = names(&[c"VK_KHR_surface", c"VK_KHR_missing"]);
        let result = resolve_names("extension", &requested, &available, None);
        assert!(matches!(result, Err(GpuError::UnsupportedCapability(msg)) if msg.contains("VK_KHR_missing")));
    }

    #[test]
    fn duplicates_are_collapsed() {
        let available = names(&[VALIDATION_LAYER]);
        let requested = names(&[VALIDATION_LAYER, VALIDATION_LAYER]);
        let resolved =
            resolve_names("layer", &requested, &available, Some(VALIDATION_LAYER)).unwrap();
        assert_eq!(resolved.len(), 1);
    }

    #[test]
    fn app_info_defaults() {
        let info = AppInfo::default().with_version(1, 2, 3);
        assert_eq!(info.name, "VulkanApp");
        assert_eq!(info.engine_name, "VulkanEngine");
        assert_eq!(vk::api_version_minor(info.version), 2);
        assert_eq!(info.api_version, vk::API_VERSION_1_3);
    }
}
