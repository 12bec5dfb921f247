//! Logical device creation, queue selection and the capability lookup.

use crate::error::{GpuError, Result};
use crate::instance::Instance;
use crate::queue::{build_queue_map, flatten_queues, validate_queues, Queue, QueueFamilyInfo};
use crate::surface::Surface;
use crate::util::find_memory_type;
use ash::vk;
use std::collections::HashMap;
use std::ffi::CStr;
use std::sync::Arc;

/// Everything needed to create a logical device.
///
/// Queue requests are added explicitly by family, by capability, or all at once.
#[derive(Clone)]
pub struct LogicalDeviceInfo {
    pub physical_device: vk::PhysicalDevice,
    pub features: vk::PhysicalDeviceFeatures,
    pub vulkan_12_features: Option<vk::PhysicalDeviceVulkan12Features<'static>>,
    pub vulkan_13_features: Option<vk::PhysicalDeviceVulkan13Features<'static>>,
    pub extensions: Vec<&'static CStr>,
    pub queue_family_info_list: Vec<QueueFamilyInfo>,
    queue_family_properties: Vec<vk::QueueFamilyProperties>,
}

impl LogicalDeviceInfo {
    /// Start a request for `physical_device`.
    pub fn new(instance: &Instance, physical_device: vk::PhysicalDevice) -> Self {
        Self::from_queue_family_properties(
            physical_device,
            instance.queue_family_properties(physical_device),
        )
    }

    /// Start a request against already-queried family properties.
    pub fn from_queue_family_properties(
        physical_device: vk::PhysicalDevice,
        queue_family_properties: Vec<vk::QueueFamilyProperties>,
    ) -> Self {
        Self {
            physical_device,
            features: vk::PhysicalDeviceFeatures::default(),
            vulkan_12_features: None,
            vulkan_13_features: None,
            extensions: Vec::new(),
            queue_family_info_list: Vec::new(),
            queue_family_properties,
        }
    }

    pub fn with_features(mut self, features: vk::PhysicalDeviceFeatures) -> Self {
        self.features = features;
        self
    }

    pub fn with_vulkan_12_features(
        mut self,
        features: vk::PhysicalDeviceVulkan12Features<'static>,
    ) -> Self {
        self.vulkan_12_features = Some(features);
        self
    }

    pub fn with_vulkan_13_features(
        mut self,
        features: vk::PhysicalDeviceVulkan13Features<'static>,
    ) -> Self {
        self.vulkan_13_features = Some(features);
        self
    }

    pub fn with_extension(mut self, extension: &'static CStr) -> Self {
        if !self.extensions.contains(&extension) {
            self.extensions.push(extension);
        }
        self
    }

    /// Driver-reported queue families of the physical device.
    pub fn queue_family_properties(&self) -> &[vk::QueueFamilyProperties] {
        &self.queue_family_properties
    }

    /// Request `count` queues from a specific family.
    ///
    /// The queues are appended to an existing request for the family, or a
    /// new request is made carrying the family's reported flags.
    pub fn add_queues(&mut self, family_index: u32, priority: f32, count: u32) {
        let queues = (0..count).map(|_| crate::queue::QueueInfo { priority });

        if let Some(family) = self
            .queue_family_info_list
            .iter_mut()
            .find(|family| family.family_index == family_index)
        {
            family.queues.extend(queues);
            return;
        }

        let flags = self
            .queue_family_properties
            .get(family_index as usize)
            .map_or_else(vk::QueueFlags::empty, |props| props.queue_flags);
        let mut family = QueueFamilyInfo::new(family_index, flags);
        family.queues.extend(queues);
        self.queue_family_info_list.push(family);
    }

    /// Request `count` queues supporting `flags`.
    ///
    /// A family whose flags match exactly is preferred over one that merely
    /// contains them. Queues already requested are not available again.
    /// Returns the chosen family.
    pub fn add_queues_by_capability(
        &mut self,
        flags: vk::QueueFlags,
        priority: f32,
        count: u32,
    ) -> Option<u32> {
        if count == 0 {
            return None;
        }

        let available: Vec<(u32, vk::QueueFlags, u32)> = (0u32..)
            .zip(&self.queue_family_properties)
            .map(|(family_index, props)| {
                let reserved = self
                    .queue_family_info_list
                    .iter()
                    .find(|family| family.family_index == family_index)
                    .map_or(0, |family| family.queues.len());
                let remaining = (props.queue_count as usize).saturating_sub(reserved);
                (
                    family_index,
                    props.queue_flags,
                    u32::try_from(remaining).unwrap_or(u32::MAX),
                )
            })
            .collect();

        let strong = available
            .iter()
            .find(|(_, family_flags, remaining)| *family_flags == flags && *remaining >= count);
        let weak = || {
            available.iter().find(|(_, family_flags, remaining)| {
                family_flags.contains(flags) && *remaining >= count
            })
        };

        let (family_index, _, _) = *strong.or_else(weak)?;
        self.add_queues(family_index, priority, count);
        Some(family_index)
    }

    /// Replace the request list with every queue of every family.
    pub fn add_all_queues(&mut self, priority: f32) {
        self.queue_family_info_list.clear();
        let counts: Vec<u32> = self
            .queue_family_properties
            .iter()
            .map(|props| props.queue_count)
            .collect();
        for (family_index, count) in (0u32..).zip(counts) {
            self.add_queues(family_index, priority, count);
        }
    }
}

fn validate_extensions(requested: &[&CStr], available: &[vk::ExtensionProperties]) -> Result<()> {
    let missing: Vec<String> = requested
        .iter()
        .filter(|name| {
            !available
                .iter()
                .any(|props| props.extension_name_as_c_str().ok() == Some(**name))
        })
        .map(|name| name.to_string_lossy().into_owned())
        .collect();

    if missing.is_empty() {
        return Ok(());
    }
    for name in &missing {
        tracing::error!("Device extension {name} is not supported");
    }
    Err(GpuError::UnsupportedCapability(format!(
        "device extensions not supported: {}",
        missing.join(", ")
    )))
}

/// A created logical device with its queues.
pub struct LogicalDevice {
    device: ash::Device,
    instance: Arc<Instance>,
    physical_device: vk::PhysicalDevice,
    features: vk::PhysicalDeviceFeatures,
    extensions: Vec<&'static CStr>,
    queue_family_info_list: Vec<QueueFamilyInfo>,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    queues: Vec<Queue>,
    queue_map: HashMap<vk::QueueFlags, Vec<usize>>,
}

impl LogicalDevice {
    /// Validate the request, create the device and materialize every queue.
    pub fn new(instance: Arc<Instance>, info: LogicalDeviceInfo) -> Result<Arc<Self>> {
        validate_queues(&info.queue_family_info_list, &info.queue_family_properties)?;
        let available_extensions = unsafe {
            instance
                .handle()
                .enumerate_device_extension_properties(info.physical_device)?
        };
        validate_extensions(&info.extensions, &available_extensions)?;

        let priorities: Vec<Vec<f32>> = info
            .queue_family_info_list
            .iter()
            .map(QueueFamilyInfo::priorities)
            .collect();
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = info
            .queue_family_info_list
            .iter()
            .zip(&priorities)
            .map(|(family, priorities)| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family.family_index)
                    .queue_priorities(priorities)
            })
            .collect();

        let extension_names: Vec<*const std::ffi::c_char> =
            info.extensions.iter().map(|name| name.as_ptr()).collect();

        let chain_features = info.vulkan_12_features.is_some() || info.vulkan_13_features.is_some();
        let mut vulkan_12_features = info.vulkan_12_features;
        let mut vulkan_13_features = info.vulkan_13_features;
        let mut features2 = vk::PhysicalDeviceFeatures2::default().features(info.features);
        if let Some(features) = vulkan_12_features.as_mut() {
            features2 = features2.push_next(features);
        }
        if let Some(features) = vulkan_13_features.as_mut() {
            features2 = features2.push_next(features);
        }

        let mut create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names);
        if chain_features {
            create_info = create_info.push_next(&mut features2);
        } else {
            create_info = create_info.enabled_features(&info.features);
        }

        let device = unsafe {
            instance
                .handle()
                .create_device(info.physical_device, &create_info, None)?
        };

        let queues: Vec<Queue> = flatten_queues(&info.queue_family_info_list)
            .into_iter()
            .map(|(family_index, queue_index)| Queue::new(&device, family_index, queue_index))
            .collect();
        let queue_map = build_queue_map(&info.queue_family_info_list);
        let memory_properties = instance.memory_properties(info.physical_device);

        tracing::info!(
            queues = queues.len(),
            families = info.queue_family_info_list.len(),
            extensions = info.extensions.len(),
            "Created logical device"
        );

        Ok(Arc::new(Self {
            device,
            instance,
            physical_device: info.physical_device,
            features: info.features,
            extensions: info.extensions,
            queue_family_info_list: info.queue_family_info_list,
            memory_properties,
            queues,
            queue_map,
        }))
    }

    /// Get the raw device.
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn enabled_features(&self) -> &vk::PhysicalDeviceFeatures {
        &self.features
    }

    pub fn enabled_extensions(&self) -> &[&'static CStr] {
        &self.extensions
    }

    /// The queue requests the device was created with.
    pub fn queue_family_info_list(&self) -> &[QueueFamilyInfo] {
        &self.queue_family_info_list
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    /// Memory type index for a resource's `type_bits` with the `required` flags.
    pub fn find_memory_type(&self, type_bits: u32, required: vk::MemoryPropertyFlags) -> Result<u32> {
        find_memory_type(&self.memory_properties, type_bits, required)
    }

    /// Every queue in request order.
    pub fn queues(&self) -> &[Queue] {
        &self.queues
    }

    /// The `index`-th queue supporting at least `flags`, exact matches first.
    pub fn get_queue(&self, flags: vk::QueueFlags, index: usize) -> Result<&Queue> {
        self.queue_map
            .get(&flags)
            .and_then(|queues| queues.get(index))
            .map(|&queue| &self.queues[queue])
            .ok_or_else(|| {
                GpuError::UnsupportedCapability(format!("no queue #{index} supporting {flags:?}"))
            })
    }

    /// All queues supporting at least `flags`, exact matches first.
    pub fn get_queues(&self, flags: vk::QueueFlags) -> Vec<&Queue> {
        self.queue_map
            .get(&flags)
            .map(|queues| queues.iter().map(|&queue| &self.queues[queue]).collect())
            .unwrap_or_default()
    }

    /// First queue whose family can present to `surface`.
    pub fn get_present_queue(&self, surface: &Surface) -> Result<Option<&Queue>> {
        Ok(self.get_present_queues(surface)?.into_iter().next())
    }

    /// Every queue whose family can present to `surface`.
    pub fn get_present_queues(&self, surface: &Surface) -> Result<Vec<&Queue>> {
        let mut supported: HashMap<u32, bool> = HashMap::new();
        let mut present_queues = Vec::new();

        for queue in &self.queues {
            let family = queue.family_index();
            let is_supported = match supported.get(&family) {
                Some(&known) => known,
                None => {
                    let known = surface.supports_queue_family(self.physical_device, family)?;
                    supported.insert(family, known);
                    known
                }
            };
            if is_supported {
                present_queues.push(queue);
            }
        }

        Ok(present_queues)
    }

    /// Block until the device is idle.
    #[cfg_attr(feature = "trace-spans", tracing::instrument(level = "trace", skip_all))]
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    /// Wait for fences; a timeout surfaces as [`GpuError::Timeout`].
    #[cfg_attr(feature = "trace-spans", tracing::instrument(level = "trace", skip_all))]
    pub fn wait_for_fences(&self, fences: &[vk::Fence], wait_all: bool, timeout_ns: u64) -> Result<()> {
        unsafe { self.device.wait_for_fences(fences, wait_all, timeout_ns)? };
        Ok(())
    }

    pub fn reset_fences(&self, fences: &[vk::Fence]) -> Result<()> {
        unsafe { self.device.reset_fences(fences)? };
        Ok(())
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                tracing::warn!("Device wait failed before destruction: {e}");
            }
            self.device.destroy_device(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> LogicalDeviceInfo {
        let gct = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER;
        let properties = [(gct, 4), (vk::QueueFlags::COMPUTE, 2), (vk::QueueFlags::TRANSFER, 2)]
            .into_iter()
            .map(|(queue_flags, queue_count)| vk::QueueFamilyProperties {
                queue_flags,
                queue_count,
                ..Default::default()
            })
            .collect();
        LogicalDeviceInfo::from_queue_family_properties(vk::PhysicalDevice::null(), properties)
    }

    #[test]
    fn exact_capability_match_is_preferred() {
        let mut info = info();
        assert_eq!(
            info.add_queues_by_capability(vk::QueueFlags::COMPUTE, 1.0, 1),
            Some(1)
        );
        assert_eq!(info.queue_family_info_list.len(), 1);
        assert_eq!(info.queue_family_info_list[0].flags, vk::QueueFlags::COMPUTE);
    }

    #[test]
    fn superset_family_used_without_exact_match() {
        let mut info = info();
        assert_eq!(
            info.add_queues_by_capability(
                vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER,
                1.0,
                1
            ),
            Some(0)
        );
    }

    #[test]
    fn reserved_queues_are_subtracted() {
        let mut info = info();
        assert_eq!(
            info.add_queues_by_capability(vk::QueueFlags::COMPUTE, 1.0, 2),
            Some(1)
        );
        // Family 1 is exhausted, so the next compute request falls back to family 0.
        assert_eq!(
            info.add_queues_by_capability(vk::QueueFlags::COMPUTE, 0.5, 1),
            Some(0)
        );
        assert_eq!(
            info.add_queues_by_capability(vk::QueueFlags::GRAPHICS, 1.0, 4),
            None
        );
        assert_eq!(
            info.add_queues_by_capability(vk::QueueFlags::GRAPHICS, 1.0, 3),
            Some(0)
        );
        assert_eq!(info.queue_family_info_list[1].queues.len(), 4);
        assert_eq!(info.add_queues_by_capability(vk::QueueFlags::GRAPHICS, 1.0, 0), None);
    }

    #[test]
    fn explicit_queues_merge_into_existing_family() {
        let mut info = info();
        info.add_queues(2, 0.25, 1);
        info.add_queues(2, 0.75, 1);
        assert_eq!(info.queue_family_info_list.len(), 1);
        assert_eq!(info.queue_family_info_list[0].priorities(), vec![0.25, 0.75]);
        assert_eq!(info.queue_family_info_list[0].flags, vk::QueueFlags::TRANSFER);
    }

    #[test]
    fn add_all_queues_replaces_requests() {
        let mut info = info();
        info.add_queues(1, 1.0, 1);
        info.add_all_queues(0.5);

        let counts: Vec<usize> = info
            .queue_family_info_list
            .iter()
            .map(|family| family.queues.len())
            .collect();
        assert_eq!(counts, vec![4, 2, 2]);
        assert!(validate_queues(&info.queue_family_info_list, info.queue_family_properties()).is_ok());
    }

    #[test]
    fn missing_extensions_are_reported() {
        let mut available = vk::ExtensionProperties::default();
        for (dst, src) in available
            .extension_name
            .iter_mut()
            .zip(ash::khr::swapchain::NAME.to_bytes_with_nul())
        {
            *dst = *src as std::ffi::c_char;
        }

        assert!(validate_extensions(&[ash::khr::swapchain::NAME], &[available]).is_ok());
        assert!(matches!(
            validate_extensions(&[ash::khr::dynamic_rendering::NAME], &[available]),
            Err(GpuError::UnsupportedCapability(_))
        ));
    }
}
