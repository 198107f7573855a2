use ash::vk;

use crate::{error::Error, physical_device::PhysicalDeviceQueries};

pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// First of `candidates` whose `tiling` features contain `features`.
pub fn supported_format<Q>(
    queries: &Q,
    physical_device: vk::PhysicalDevice,
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
) -> anyhow::Result<vk::Format>
where
    Q: PhysicalDeviceQueries + ?Sized,
{
    candidates
        .iter()
        .copied()
        .find(|format| {
            let properties = queries.format_properties(physical_device, *format);
            let supported = if tiling == vk::ImageTiling::LINEAR {
                properties.linear_tiling_features
            } else {
                properties.optimal_tiling_features
            };
            supported.contains(features)
        })
        .ok_or_else(|| Error::NoSupportedFormat(candidates.to_vec()).into())
}

/// Depth format usable as an optimally tiled depth/stencil attachment.
pub fn depth_format<Q>(queries: &Q, physical_device: vk::PhysicalDevice) -> anyhow::Result<vk::Format>
where
    Q: PhysicalDeviceQueries + ?Sized,
{
    supported_format(
        queries,
        physical_device,
        &DEPTH_FORMAT_CANDIDATES,
        vk::ImageTiling::OPTIMAL,
        vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
    )
}

pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT
    )
}

/// Highest sample count present in every one of `counts`.
///
/// Typically fed the framebuffer color and depth sample counts from the
/// device limits.
pub fn max_usable_sample_count(counts: &[vk::SampleCountFlags]) -> vk::SampleCountFlags {
    let common = counts
        .iter()
        .copied()
        .reduce(|common, flags| common & flags)
        .unwrap_or(vk::SampleCountFlags::TYPE_1);
    [
        vk::SampleCountFlags::TYPE_64,
        vk::SampleCountFlags::TYPE_32,
        vk::SampleCountFlags::TYPE_16,
        vk::SampleCountFlags::TYPE_8,
        vk::SampleCountFlags::TYPE_4,
        vk::SampleCountFlags::TYPE_2,
    ]
    .into_iter()
    .find(|flag| common.contains(*flag))
    .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

#[cfg(test)]
mod tests {
    use std::ffi::CString;

    use ash::vk::Handle;

    use super::*;

    struct Formats(Vec<(vk::Format, vk::FormatProperties)>);

    impl PhysicalDeviceQueries for Formats {
        fn physical_devices(&self) -> anyhow::Result<Vec<vk::PhysicalDevice>> {
            Ok(vec![vk::PhysicalDevice::from_raw(1)])
        }

        fn properties(&self, _: vk::PhysicalDevice) -> vk::PhysicalDeviceProperties {
            Default::default()
        }

        fn features(&self, _: vk::PhysicalDevice) -> vk::PhysicalDeviceFeatures {
            Default::default()
        }

        fn queue_family_properties(&self, _: vk::PhysicalDevice) -> Vec<vk::QueueFamilyProperties> {
            Vec::new()
        }

        fn memory_properties(&self, _: vk::PhysicalDevice) -> vk::PhysicalDeviceMemoryProperties {
            Default::default()
        }

        fn extension_names(&self, _: vk::PhysicalDevice) -> anyhow::Result<Vec<CString>> {
            Ok(Vec::new())
        }

        fn format_properties(
            &self,
            _: vk::PhysicalDevice,
            format: vk::Format,
        ) -> vk::FormatProperties {
            self.0
                .iter()
                .find(|(candidate, _)| *candidate == format)
                .map(|(_, properties)| *properties)
                .unwrap_or_default()
        }
    }

    fn optimal(features: vk::FormatFeatureFlags) -> vk::FormatProperties {
        vk::FormatProperties {
            optimal_tiling_features: features,
            ..Default::default()
        }
    }

    #[test]
    fn depth_format_skips_unsupported_candidates() {
        let queries = Formats(vec![
            (vk::Format::D32_SFLOAT, optimal(vk::FormatFeatureFlags::SAMPLED_IMAGE)),
            (
                vk::Format::D24_UNORM_S8_UINT,
                optimal(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT),
            ),
        ]);
        let format = depth_format(&queries, vk::PhysicalDevice::from_raw(1)).unwrap();
        assert_eq!(format, vk::Format::D24_UNORM_S8_UINT);
        assert!(has_stencil_component(format));
    }

    #[test]
    fn linear_tiling_reads_linear_features() {
        let queries = Formats(vec![(
            vk::Format::D32_SFLOAT,
            optimal(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT),
        )]);
        let error = supported_format(
            &queries,
            vk::PhysicalDevice::from_raw(1),
            &[vk::Format::D32_SFLOAT],
            vk::ImageTiling::LINEAR,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )
        .unwrap_err();
        assert!(matches!(
            error.downcast_ref::<Error>(),
            Some(Error::NoSupportedFormat(formats)) if formats == &[vk::Format::D32_SFLOAT]
        ));
    }

    #[test]
    fn sample_count_is_highest_common_bit() {
        use vk::SampleCountFlags as Samples;
        let color = Samples::TYPE_1 | Samples::TYPE_2 | Samples::TYPE_4 | Samples::TYPE_8;
        let depth = Samples::TYPE_1 | Samples::TYPE_2 | Samples::TYPE_4;
        assert_eq!(max_usable_sample_count(&[color, depth]), Samples::TYPE_4);
        assert_eq!(max_usable_sample_count(&[]), Samples::TYPE_1);
        assert_eq!(
            max_usable_sample_count(&[Samples::TYPE_2, Samples::TYPE_4]),
            Samples::TYPE_1
        );
    }
}
