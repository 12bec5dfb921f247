//! Queue requests, materialized queues and the capability lookup.

use crate::error::{GpuError, Result};
use crate::util::separate_queue_flags;
use ash::vk;
use std::collections::HashMap;

/// One requested queue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueInfo {
    pub priority: f32,
}

impl Default for QueueInfo {
    fn default() -> Self {
        Self { priority: 1.0 }
    }
}

/// Queues requested from a single family.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueFamilyInfo {
    pub family_index: u32,
    /// Capabilities the queues are registered under in the lookup.
    pub flags: vk::QueueFlags,
    pub queues: Vec<QueueInfo>,
}

impl QueueFamilyInfo {
    pub fn new(family_index: u32, flags: vk::QueueFlags) -> Self {
        Self {
            family_index,
            flags,
            queues: Vec::new(),
        }
    }

    pub fn with_queues(mut self, priority: f32, count: u32) -> Self {
        self.queues
            .extend((0..count).map(|_| QueueInfo { priority }));
        self
    }

    pub fn priorities(&self) -> Vec<f32> {
        self.queues.iter().map(|queue| queue.priority).collect()
    }
}

/// Check a request list against the driver-reported families.
///
/// Every problem is logged before the error is returned.
pub fn validate_queues(
    families: &[QueueFamilyInfo],
    properties: &[vk::QueueFamilyProperties],
) -> Result<()> {
    if properties.is_empty() {
        tracing::error!("No queue family properties");
        return Err(GpuError::UnsupportedCapability(
            "device reports no queue families".to_string(),
        ));
    }

    let mut invalid = Vec::new();
    let mut unsupported = Vec::new();

    for family in families {
        let Some(property) = properties.get(family.family_index as usize) else {
            invalid.push(format!(
                "queue family index {} out of range (limit {})",
                family.family_index,
                properties.len() - 1
            ));
            continue;
        };

        if family.queues.is_empty() {
            invalid.push(format!(
                "empty queue list for family {}",
                family.family_index
            ));
        }

        if family.queues.len() > property.queue_count as usize {
            invalid.push(format!(
                "too many queues for family {}: {} requested, {} available",
                family.family_index,
                family.queues.len(),
                property.queue_count
            ));
        }

        if !property.queue_flags.contains(family.flags) {
            unsupported.push(format!(
                "family {} does not support {:?} (available {:?})",
                family.family_index, family.flags, property.queue_flags
            ));
        }

        for (index, queue) in family.queues.iter().enumerate() {
            if !(0.0..=1.0).contains(&queue.priority) {
                invalid.push(format!(
                    "invalid priority {} for queue {index} in family {}",
                    queue.priority, family.family_index
                ));
            }
        }
    }

    for problem in invalid.iter().chain(&unsupported) {
        tracing::error!("Invalid queue request: {problem}");
    }

    if !invalid.is_empty() {
        invalid.extend(unsupported);
        Err(GpuError::InvalidArgument(invalid.join("; ")))
    } else if !unsupported.is_empty() {
        Err(GpuError::UnsupportedCapability(unsupported.join("; ")))
    } else {
        Ok(())
    }
}

/// `(family_index, queue_index)` for every requested queue, in request order.
pub fn flatten_queues(families: &[QueueFamilyInfo]) -> Vec<(u32, u32)> {
    families
        .iter()
        .flat_map(|family| {
            (0u32..)
                .take(family.queues.len())
                .map(move |queue_index| (family.family_index, queue_index))
        })
        .collect()
}

/// Capability lookup over the flattened queue list.
///
/// Values index into [`flatten_queues`]. Queues whose family flags equal the
/// key come first, followed by queues of every family that merely contains it.
pub fn build_queue_map(families: &[QueueFamilyInfo]) -> HashMap<vk::QueueFlags, Vec<usize>> {
    let mut map: HashMap<vk::QueueFlags, Vec<usize>> = HashMap::new();

    let mut offsets = Vec::with_capacity(families.len());
    let mut next = 0usize;
    for family in families {
        offsets.push(next);
        next += family.queues.len();
    }

    for (family, &offset) in families.iter().zip(&offsets) {
        map.entry(family.flags)
            .or_default()
            .extend(offset..offset + family.queues.len());
    }

    for (family, &offset) in families.iter().zip(&offsets) {
        let bits = separate_queue_flags(family.flags);
        let full = (1usize << bits.len()) - 1;

        // Every non-empty strict subset of the family's capabilities.
        for subset in 1..full {
            let mask = bits
                .iter()
                .enumerate()
                .filter(|(bit, _)| subset & (1 << bit) != 0)
                .fold(vk::QueueFlags::empty(), |mask, (_, &flag)| mask | flag);

            map.entry(mask)
                .or_default()
                .extend(offset..offset + family.queues.len());
        }
    }

    map
}

/// A device queue with its family and index.
#[derive(Clone)]
pub struct Queue {
    device: ash::Device,
    queue: vk::Queue,
    family_index: u32,
    queue_index: u32,
}

impl Queue {
    pub(crate) fn new(device: &ash::Device, family_index: u32, queue_index: u32) -> Self {
        let queue = unsafe { device.get_device_queue(family_index, queue_index) };
        Self {
            device: device.clone(),
            queue,
            family_index,
            queue_index,
        }
    }

    /// Get the raw queue handle.
    pub fn handle(&self) -> vk::Queue {
        self.queue
    }

    pub fn family_index(&self) -> u32 {
        self.family_index
    }

    pub fn queue_index(&self) -> u32 {
        self.queue_index
    }

    /// Submit work to the queue.
    ///
    /// # Safety
    /// Every handle referenced by `submits` must be valid and the command
    /// buffers must be in the executable state.
    #[cfg_attr(feature = "trace-spans", tracing::instrument(level = "trace", skip_all))]
    pub unsafe fn submit(&self, submits: &[vk::SubmitInfo<'_>], fence: vk::Fence) -> Result<()> {
        self.device.queue_submit(self.queue, submits, fence)?;
        Ok(())
    }

    /// Submit command buffers with a single batch.
    ///
    /// # Safety
    /// See [`Queue::submit`].
    pub unsafe fn submit_command_buffers(
        &self,
        command_buffers: &[vk::CommandBuffer],
        wait_semaphores: &[vk::Semaphore],
        wait_stages: &[vk::PipelineStageFlags],
        signal_semaphores: &[vk::Semaphore],
        fence: vk::Fence,
    ) -> Result<()> {
        let submit_info = vk::SubmitInfo::default()
            .command_buffers(command_buffers)
            .wait_semaphores(wait_semaphores)
            .wait_dst_stage_mask(wait_stages)
            .signal_semaphores(signal_semaphores);

        self.submit(std::slice::from_ref(&submit_info), fence)
    }

    /// Block until the queue is idle.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.queue_wait_idle(self.queue)? };
        Ok(())
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("queue", &self.queue)
            .field("family_index", &self.family_index)
            .field("queue_index", &self.queue_index)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GCT: vk::QueueFlags = vk::QueueFlags::from_raw(
        vk::QueueFlags::GRAPHICS.as_raw()
            | vk::QueueFlags::COMPUTE.as_raw()
            | vk::QueueFlags::TRANSFER.as_raw(),
    );

    fn properties() -> Vec<vk::QueueFamilyProperties> {
        [(GCT, 4), (vk::QueueFlags::COMPUTE, 2), (vk::QueueFlags::TRANSFER, 2)]
            .into_iter()
            .map(|(queue_flags, queue_count)| vk::QueueFamilyProperties {
                queue_flags,
                queue_count,
                ..Default::default()
            })
            .collect()
    }

    fn all_masks() -> Vec<vk::QueueFlags> {
        (1..8).map(vk::QueueFlags::from_raw).collect()
    }

    #[test]
    fn single_queue_is_mapped_under_every_subset() {
        let families = vec![QueueFamilyInfo::new(0, GCT).with_queues(1.0, 1)];
        let map = build_queue_map(&families);

        for mask in all_masks() {
            assert_eq!(map.get(&mask), Some(&vec![0]), "mask {mask:?}");
        }
        assert_eq!(map.len(), 7);
    }

    #[test]
    fn exact_matches_come_first() {
        let families = vec![
            QueueFamilyInfo::new(0, GCT).with_queues(1.0, 2),
            QueueFamilyInfo::new(1, vk::QueueFlags::COMPUTE).with_queues(0.5, 1),
            QueueFamilyInfo::new(2, vk::QueueFlags::TRANSFER).with_queues(0.5, 2),
        ];
        let flat = flatten_queues(&families);
        let map = build_queue_map(&families);

        assert_eq!(flat, vec![(0, 0), (0, 1), (1, 0), (2, 0), (2, 1)]);
        assert_eq!(map[&vk::QueueFlags::COMPUTE], vec![2, 0, 1]);
        assert_eq!(map[&vk::QueueFlags::TRANSFER], vec![3, 4, 0, 1]);
        assert_eq!(map[&GCT], vec![0, 1]);

        for (mask, queues) in &map {
            // Every entry supports at least the key.
            for &queue in queues {
                let family = flat[queue].0 as usize;
                assert!(families[family].flags.contains(*mask));
            }

            // An exactly matching family wins the first slot.
            if let Some(exact) = families.iter().position(|family| family.flags == *mask) {
                assert_eq!(flat[queues[0]].0 as usize, exact);
            }

            // Every queue of every superset family is present.
            for (index, &(family, _)) in flat.iter().enumerate() {
                if families[family as usize].flags.contains(*mask) {
                    assert!(queues.contains(&index));
                }
            }
        }
    }

    #[test]
    fn validation_accepts_well_formed_requests() {
        let families = vec![
            QueueFamilyInfo::new(0, vk::QueueFlags::GRAPHICS).with_queues(1.0, 4),
            QueueFamilyInfo::new(2, vk::QueueFlags::TRANSFER).with_queues(0.0, 1),
        ];
        assert_eq!(validate_queues(&families, &properties()), Ok(()));
    }

    #[test]
    fn validation_rejects_bad_requests() {
        let out_of_range = vec![QueueFamilyInfo::new(7, GCT).with_queues(1.0, 1)];
        assert!(matches!(
            validate_queues(&out_of_range, &properties()),
            Err(GpuError::InvalidArgument(_))
        ));

        let empty = vec![QueueFamilyInfo::new(0, GCT)];
        assert!(matches!(
            validate_queues(&empty, &properties()),
            Err(GpuError::InvalidArgument(_))
        ));

        let too_many = vec![QueueFamilyInfo::new(1, vk::QueueFlags::COMPUTE).with_queues(1.0, 3)];
        assert!(matches!(
            validate_queues(&too_many, &properties()),
            Err(GpuError::InvalidArgument(_))
        ));

        let bad_priority = vec![QueueFamilyInfo::new(0, GCT).with_queues(1.5, 1)];
        assert!(matches!(
            validate_queues(&bad_priority, &properties()),
            Err(GpuError::InvalidArgument(_))
        ));

        let unsupported = vec![QueueFamilyInfo::new(2, GCT).with_queues(1.0, 1)];
        assert!(matches!(
            validate_queues(&unsupported, &properties()),
            Err(GpuError::UnsupportedCapability(_))
        ));

        assert!(validate_queues(&[], &[]).is_err());
    }
}
