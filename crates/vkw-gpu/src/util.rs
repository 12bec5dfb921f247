//! Stateless helpers for flags, queue families, formats and memory types.

use crate::error::{GpuError, Result};
use crate::instance::Instance;
use ash::vk;
use std::ffi::CStr;

/// Split a bitset into its single-bit flags, lowest bit first.
pub fn separate_flags(bits: u32) -> Vec<u32> {
    (0..u32::BITS)
        .map(|bit| 1u32 << bit)
        .filter(|flag| bits & flag != 0)
        .collect()
}

/// Split queue capability flags into single-capability flags.
pub fn separate_queue_flags(flags: vk::QueueFlags) -> Vec<vk::QueueFlags> {
    separate_flags(flags.as_raw())
        .into_iter()
        .map(vk::QueueFlags::from_raw)
        .collect()
}

/// First family whose flags equal `flags` exactly.
pub fn find_queue_family_index_strong(
    properties: &[vk::QueueFamilyProperties],
    flags: vk::QueueFlags,
) -> Option<u32> {
    find_queue_family_indices_strong(properties, flags)
        .into_iter()
        .next()
}

/// First family whose flags contain `flags`.
pub fn find_queue_family_index_weak(
    properties: &[vk::QueueFamilyProperties],
    flags: vk::QueueFlags,
) -> Option<u32> {
    find_queue_family_indices_weak(properties, flags)
        .into_iter()
        .next()
}

/// Every family whose flags equal `flags` exactly.
pub fn find_queue_family_indices_strong(
    properties: &[vk::QueueFamilyProperties],
    flags: vk::QueueFlags,
) -> Vec<u32> {
    family_indices_where(properties, |family| family.queue_flags == flags)
}

/// Every family whose flags contain `flags`.
pub fn find_queue_family_indices_weak(
    properties: &[vk::QueueFamilyProperties],
    flags: vk::QueueFlags,
) -> Vec<u32> {
    family_indices_where(properties, |family| family.queue_flags.contains(flags))
}

fn family_indices_where(
    properties: &[vk::QueueFamilyProperties],
    predicate: impl Fn(&vk::QueueFamilyProperties) -> bool,
) -> Vec<u32> {
    (0u32..)
        .zip(properties)
        .filter(|(_, family)| predicate(family))
        .map(|(index, _)| index)
        .collect()
}

/// First queue family of `physical_device` that can present to `surface`.
pub fn find_present_queue_index(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
) -> Result<Option<u32>> {
    let family_count = unsafe {
        instance
            .handle()
            .get_physical_device_queue_family_properties(physical_device)
            .len()
    };

    for family_index in 0..u32::try_from(family_count).unwrap_or(u32::MAX) {
        let supported = unsafe {
            instance
                .surface_loader()
                .get_physical_device_surface_support(physical_device, family_index, surface)?
        };
        if supported {
            return Ok(Some(family_index));
        }
    }
    Ok(None)
}

const SRGB_FORMATS: [vk::Format; 4] = [
    vk::Format::B8G8R8A8_SRGB,
    vk::Format::R8G8B8A8_SRGB,
    vk::Format::B8G8R8_SRGB,
    vk::Format::R8G8B8_SRGB,
];

const UNORM_FORMATS: [vk::Format; 4] = [
    vk::Format::B8G8R8A8_UNORM,
    vk::Format::R8G8B8A8_UNORM,
    vk::Format::B8G8R8_UNORM,
    vk::Format::R8G8B8_UNORM,
];

fn select_surface_format(
    available: &[vk::SurfaceFormatKHR],
    priority: &[vk::Format],
) -> Option<vk::SurfaceFormatKHR> {
    priority.iter().find_map(|&wanted| {
        available.iter().copied().find(|candidate| {
            candidate.format == wanted && candidate.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
    })
}

/// Pick the preferred 8-bit sRGB surface format.
pub fn select_srgb_surface_format(
    available: &[vk::SurfaceFormatKHR],
) -> Option<vk::SurfaceFormatKHR> {
    select_surface_format(available, &SRGB_FORMATS)
}

/// Pick the preferred 8-bit UNORM surface format in the sRGB colorspace.
pub fn select_unorm_surface_format(
    available: &[vk::SurfaceFormatKHR],
) -> Option<vk::SurfaceFormatKHR> {
    select_surface_format(available, &UNORM_FORMATS)
}

/// Depth formats in order of preference.
pub const DEPTH_FORMATS: [vk::Format; 5] = [
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D32_SFLOAT,
    vk::Format::D16_UNORM_S8_UINT,
    vk::Format::D16_UNORM,
];

/// Pick the first depth format usable as an optimal-tiling depth attachment.
pub fn select_depth_format(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<vk::Format> {
    pick_depth_format(|format| unsafe {
        instance
            .handle()
            .get_physical_device_format_properties(physical_device, format)
    })
}

fn pick_depth_format(
    format_properties: impl Fn(vk::Format) -> vk::FormatProperties,
) -> Result<vk::Format> {
    DEPTH_FORMATS
        .into_iter()
        .find(|&format| {
            format_properties(format)
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .ok_or_else(|| {
            GpuError::UnsupportedCapability("no depth-stencil attachment format".to_string())
        })
}

/// Whether `format` carries a stencil component next to depth.
pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT
    )
}

/// Lowest memory type allowed by `type_bits` whose flags contain `required`.
pub fn find_memory_type(
    properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32> {
    let count = properties.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32);
    (0..count)
        .find(|&index| {
            (type_bits >> index) & 1 == 1
                && properties.memory_types[index as usize]
                    .property_flags
                    .contains(required)
        })
        .ok_or_else(|| {
            GpuError::UnsupportedCapability(format!(
                "no memory type in {type_bits:#b} with {required:?}"
            ))
        })
}

/// Instance extensions needed to create a presentation surface on this platform.
pub fn surface_extensions() -> Vec<&'static CStr> {
    let mut extensions = vec![ash::khr::surface::NAME];

    #[cfg(target_os = "windows")]
    extensions.push(ash::khr::win32_surface::NAME);

    #[cfg(target_os = "macos")]
    {
        extensions.push(ash::ext::metal_surface::NAME);
        extensions.push(ash::khr::portability_enumeration::NAME);
    }

    #[cfg(all(unix, not(target_os = "macos"), not(target_os = "android")))]
    {
        if std::env::var_os("WAYLAND_DISPLAY").is_some() {
            extensions.push(ash::khr::wayland_surface::NAME);
        } else {
            extensions.push(ash::khr::xlib_surface::NAME);
        }
    }

    #[cfg(target_os = "android")]
    extensions.push(ash::khr::android_surface::NAME);

    extensions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: count,
            ..Default::default()
        }
    }

    fn families() -> Vec<vk::QueueFamilyProperties> {
        vec![
            family(
                vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
                4,
            ),
            family(vk::QueueFlags::COMPUTE, 2),
            family(vk::QueueFlags::TRANSFER, 2),
        ]
    }

    #[test]
    fn separate_flags_ascending() {
        assert_eq!(separate_flags(0), Vec::<u32>::new());
        assert_eq!(separate_flags(0b1011), vec![0b1, 0b10, 0b1000]);
        assert_eq!(separate_flags(1 << 31), vec![1 << 31]);
    }

    #[test]
    fn separate_queue_flags_splits_capabilities() {
        let flags = vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER;
        assert_eq!(
            separate_queue_flags(flags),
            vec![vk::QueueFlags::GRAPHICS, vk::QueueFlags::TRANSFER]
        );
    }

    #[test]
    fn strong_and_weak_family_search() {
        let props = families();
        assert_eq!(
            find_queue_family_index_strong(&props, vk::QueueFlags::COMPUTE),
            Some(1)
        );
        assert_eq!(
            find_queue_family_index_weak(&props, vk::QueueFlags::COMPUTE),
            Some(0)
        );
        assert_eq!(
            find_queue_family_index_strong(
                &props,
                vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER
            ),
            None
        );
        assert_eq!(
            find_queue_family_indices_weak(&props, vk::QueueFlags::TRANSFER),
            vec![0, 2]
        );
        assert_eq!(
            find_queue_family_indices_strong(&props, vk::QueueFlags::TRANSFER),
            vec![2]
        );
    }

    fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn srgb_selection_follows_priority() {
        let available = [
            surface_format(vk::Format::R8G8B8A8_UNORM),
            surface_format(vk::Format::B8G8R8A8_SRGB),
            surface_format(vk::Format::R8G8B8A8_SRGB),
        ];
        assert_eq!(
            select_srgb_surface_format(&available),
            Some(surface_format(vk::Format::B8G8R8A8_SRGB))
        );
        assert_eq!(
            select_unorm_surface_format(&available),
            Some(surface_format(vk::Format::R8G8B8A8_UNORM))
        );
    }

    #[test]
    fn srgb_selection_requires_srgb_colorspace() {
        let available = [vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
        }];
        assert_eq!(select_srgb_surface_format(&available), None);
        assert_eq!(select_srgb_surface_format(&[]), None);
        assert_eq!(
            select_srgb_surface_format(&[surface_format(vk::Format::R16G16B16A16_SFLOAT)]),
            None
        );
    }

    #[test]
    fn depth_format_prefers_first_supported() {
        let picked = pick_depth_format(|format| vk::FormatProperties {
            optimal_tiling_features: if format == vk::Format::D32_SFLOAT {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::FormatFeatureFlags::empty()
            },
            ..Default::default()
        });
        assert_eq!(picked, Ok(vk::Format::D32_SFLOAT));

        let none = pick_depth_format(|_| vk::FormatProperties::default());
        assert!(matches!(none, Err(GpuError::UnsupportedCapability(_))));
    }

    fn memory_properties(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (slot, &property_flags) in properties.memory_types.iter_mut().zip(flags) {
            slot.property_flags = property_flags;
        }
        properties
    }

    #[test]
    fn memory_type_is_lowest_allowed_match() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            host,
            host | vk::MemoryPropertyFlags::HOST_CACHED,
        ]);

        assert_eq!(find_memory_type(&properties, 0b111, host), Ok(1));
        assert_eq!(find_memory_type(&properties, 0b100, host), Ok(2));
        assert_eq!(
            find_memory_type(&properties, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            Ok(0)
        );
        assert!(find_memory_type(&properties, 0b001, host).is_err());
    }

    #[test]
    fn surface_extensions_start_with_khr_surface() {
        let extensions = surface_extensions();
        assert_eq!(extensions[0], ash::khr::surface::NAME);
        assert!(extensions.len() >= 2);
    }
}
