//! Physical device summaries.

use crate::instance::Instance;
use ash::vk;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// What a physical device offers, as far as this crate cares.
#[derive(Debug, Clone)]
pub struct DeviceSummary {
    pub vendor: GpuVendor,
    pub device_name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: u32,
    /// Device-local memory in MB
    pub device_local_memory_mb: u64,
    /// Dynamic rendering is core from Vulkan 1.3.
    pub supports_dynamic_rendering: bool,
    /// Descriptor indexing is core from Vulkan 1.2.
    pub supports_descriptor_indexing: bool,
}

impl DeviceSummary {
    /// Query a physical device.
    pub fn query(instance: &Instance, physical_device: vk::PhysicalDevice) -> Self {
        let properties = unsafe {
            instance
                .handle()
                .get_physical_device_properties(physical_device)
        };
        let memory_properties = instance.memory_properties(physical_device);

        let device_local_memory_mb: u64 = memory_properties
            .memory_heaps
            .iter()
            .take(memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size / (1024 * 1024))
            .sum();

        let api_version = properties.api_version.min(instance.api_version());

        Self {
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            device_name: properties
                .device_name_as_c_str()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            device_type: properties.device_type,
            api_version,
            device_local_memory_mb,
            supports_dynamic_rendering: api_version >= vk::API_VERSION_1_3,
            supports_descriptor_indexing: api_version >= vk::API_VERSION_1_2,
        }
    }

    /// Get a human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}, {:?}) - Vulkan {}.{}.{} - {} MB VRAM",
            self.device_name,
            self.vendor,
            self.device_type,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.device_local_memory_mb,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x8086), GpuVendor::Intel);
        assert_eq!(GpuVendor::from_vendor_id(0x1234), GpuVendor::Other(0x1234));
    }

    #[test]
    fn summary_mentions_version() {
        let summary = DeviceSummary {
            vendor: GpuVendor::Amd,
            device_name: "Test GPU".to_string(),
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            api_version: vk::API_VERSION_1_3,
            device_local_memory_mb: 8192,
            supports_dynamic_rendering: true,
            supports_descriptor_indexing: true,
        };
        let text = summary.summary();
        assert!(text.starts_with("Test GPU (Amd"));
        assert!(text.contains("Vulkan 1.3.0"));
        assert!(text.ends_with("8192 MB VRAM"));
    }
}
