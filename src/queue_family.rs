//! Queue family matching.
//!
//! Turns the queue family properties of one physical device into the queue
//! create infos needed to build a logical device. Matching is pure: the only
//! driver interaction is the present-support probe, passed in as a closure so
//! the logic runs the same against a real surface or a test double.

use std::collections::{BTreeMap, BTreeSet};

use ash::vk;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QueueType {
    Compute,
    Transfer,
    Graphics,
}

impl QueueType {
    pub const ALL: [QueueType; 3] = [QueueType::Compute, QueueType::Transfer, QueueType::Graphics];

    pub fn flag(self) -> vk::QueueFlags {
        match self {
            QueueType::Compute => vk::QueueFlags::COMPUTE,
            QueueType::Transfer => vk::QueueFlags::TRANSFER,
            QueueType::Graphics => vk::QueueFlags::GRAPHICS,
        }
    }
}

/// Capabilities of one queue family on the selected device.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueInfo {
    pub family_index: u32,
    pub priorities: Vec<f32>,
    pub types: BTreeSet<QueueType>,
    pub present_supported: bool,
    pub timestamp_supported: bool,
}

/// Owned counterpart of `vk::DeviceQueueCreateInfo`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueCreateInfo {
    pub family_index: u32,
    pub priorities: Vec<f32>,
}

impl QueueCreateInfo {
    /// The returned builder borrows `self.priorities`.
    pub fn to_vk(&self) -> vk::DeviceQueueCreateInfoBuilder<'_> {
        vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(self.family_index)
            .queue_priorities(&self.priorities)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueFamilyMatch {
    pub queue_infos: Vec<QueueInfo>,
    pub compute: Vec<QueueCreateInfo>,
    pub transfer: Vec<QueueCreateInfo>,
    pub graphics: Vec<QueueCreateInfo>,
    pub present: Vec<QueueCreateInfo>,
    /// One entry per distinct family index, ascending.
    pub unique: Vec<QueueCreateInfo>,
}

impl QueueFamilyMatch {
    /// Matches `families` against the requested queue types.
    ///
    /// Returns `Ok(None)` when any requested type, or present support when
    /// `present_support` is given, is served by no family at all. Priorities
    /// are truncated to each family's queue count; an empty slice requests a
    /// single queue at priority `1.0`.
    pub fn find<F>(
        families: &[vk::QueueFamilyProperties],
        requested: &BTreeSet<QueueType>,
        priorities: &[f32],
        mut present_support: Option<F>,
    ) -> anyhow::Result<Option<Self>>
    where
        F: FnMut(u32) -> anyhow::Result<bool>,
    {
        let mut result = Self::default();
        let mut unique = BTreeMap::new();

        for (index, properties) in families.iter().enumerate() {
            let family_index = index as u32;
            let types: BTreeSet<QueueType> = requested
                .iter()
                .copied()
                .filter(|queue_type| properties.queue_flags.contains(queue_type.flag()))
                .collect();
            let present_supported = match present_support.as_mut() {
                Some(probe) => probe(family_index)?,
                None => false,
            };
            if types.is_empty() && !present_supported {
                continue;
            }

            let create_info = QueueCreateInfo {
                family_index,
                priorities: family_priorities(priorities, properties.queue_count),
            };
            for queue_type in &types {
                match queue_type {
                    QueueType::Compute => result.compute.push(create_info.clone()),
                    QueueType::Transfer => result.transfer.push(create_info.clone()),
                    QueueType::Graphics => result.graphics.push(create_info.clone()),
                }
            }
            if present_supported {
                result.present.push(create_info.clone());
            }
            unique
                .entry(family_index)
                .or_insert_with(|| create_info.clone());

            result.queue_infos.push(QueueInfo {
                family_index,
                priorities: create_info.priorities,
                types,
                present_supported,
                timestamp_supported: properties.timestamp_valid_bits > 0,
            });
        }

        let missing_type = requested
            .iter()
            .any(|queue_type| result.for_type(*queue_type).is_empty());
        if missing_type || (present_support.is_some() && result.present.is_empty()) {
            return Ok(None);
        }

        result.unique = unique.into_values().collect();
        Ok(Some(result))
    }

    pub fn for_type(&self, queue_type: QueueType) -> &[QueueCreateInfo] {
        match queue_type {
            QueueType::Compute => &self.compute,
            QueueType::Transfer => &self.transfer,
            QueueType::Graphics => &self.graphics,
        }
    }
}

fn family_priorities(priorities: &[f32], queue_count: u32) -> Vec<f32> {
    if priorities.is_empty() {
        return vec![1.0];
    }
    priorities
        .iter()
        .copied()
        .take(queue_count.max(1) as usize)
        .collect()
}
