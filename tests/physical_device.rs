mod common;

use std::collections::BTreeSet;

use common::{FakeDevice, FakeDriver};
use vulkan_raii::{
    ash::{extensions::khr, vk},
    physical_device::{is_discrete_gpu, supports_required_extensions, PhysicalDevice},
    queue_family::QueueType,
    swapchain::SwapchainParameters,
    Error,
};

fn graphics_only(raw: u64, name: &'static str) -> FakeDevice {
    FakeDevice::new(raw, name).family(vk::QueueFlags::GRAPHICS, 1)
}

#[test]
fn selects_device_with_present_support() {
    let device_a = graphics_only(1, "A");
    let device_b = FakeDevice::new(2, "B")
        .family(vk::QueueFlags::TRANSFER, 2)
        .family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 4)
        .presents_from(&[1]);
    let driver = FakeDriver::new(vec![device_a, device_b]);

    let selection = PhysicalDevice::builder()
        .select(&driver, Some(&driver))
        .unwrap();

    assert_eq!(selection.index, 1);
    assert_eq!(selection.physical_device.name, "B");
    let present = &selection.queues.present;
    assert_eq!(present.len(), 1);
    assert!((present[0].family_index as usize) < selection.physical_device.queue_families.len());
    assert_eq!(present[0].family_index, 1);
    assert_eq!(
        selection
            .queues
            .unique
            .iter()
            .map(|info| info.family_index)
            .collect::<Vec<_>>(),
        [1]
    );
}

#[test]
fn search_continues_past_device_failing_queue_matching() {
    let compute_only = FakeDevice::new(1, "compute").family(vk::QueueFlags::COMPUTE, 1);
    let driver = FakeDriver::new(vec![compute_only, graphics_only(2, "graphics")]);

    let selection = PhysicalDevice::builder()
        .queue_types([QueueType::Graphics])
        .select(&driver, None::<&FakeDriver>)
        .unwrap();

    assert_eq!(selection.physical_device.name, "graphics");
    assert!(selection.queues.present.is_empty());
}

#[test]
fn headless_selection_never_probes_present_support() {
    let driver = FakeDriver::new(vec![graphics_only(1, "A")]);
    PhysicalDevice::builder()
        .select(&driver, None::<&FakeDriver>)
        .unwrap();
    assert!(driver.present_probes.borrow().is_empty());
}

#[test]
fn filter_rejection_moves_on_in_enumeration_order() {
    let integrated = graphics_only(1, "integrated")
        .device_type(vk::PhysicalDeviceType::INTEGRATED_GPU);
    let discrete = graphics_only(2, "discrete");
    let driver = FakeDriver::new(vec![integrated, discrete]);

    let selection = PhysicalDevice::builder()
        .filter(is_discrete_gpu)
        .select(&driver, None::<&FakeDriver>)
        .unwrap();
    assert_eq!(selection.physical_device.name, "discrete");
}

#[test]
fn filter_receives_index_and_required_extensions() {
    let without = graphics_only(1, "without");
    let with = graphics_only(2, "with").extension(khr::Swapchain::name());
    let driver = FakeDriver::new(vec![without, with]);

    let selection = PhysicalDevice::builder()
        .required_extension(khr::Swapchain::name())
        .filter(supports_required_extensions)
        .select(&driver, None::<&FakeDriver>)
        .unwrap();
    assert_eq!(selection.index, 1);
    assert_eq!(
        selection.required_extensions,
        [khr::Swapchain::name().to_owned()]
    );

    let indices = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let seen = indices.clone();
    let error = PhysicalDevice::builder()
        .filter(move |index, _, _| {
            seen.borrow_mut().push(index);
            false
        })
        .select(&driver, None::<&FakeDriver>)
        .unwrap_err();
    assert_eq!(*indices.borrow(), [0, 1]);
    assert!(matches!(
        error.downcast_ref::<Error>(),
        Some(Error::NoSuitablePhysicalDevice)
    ));
}

#[test]
fn driver_failure_names_the_device_being_queried() {
    let driver = FakeDriver::new(vec![
        graphics_only(1, "A"),
        graphics_only(2, "B").failing_extension_query(),
    ]);
    let error = PhysicalDevice::builder()
        .filter(|_, _, _| false)
        .select(&driver, None::<&FakeDriver>)
        .unwrap_err();
    assert_eq!(
        error.to_string(),
        "PhysicalDeviceBuilder::select: querying device 1"
    );
    assert_eq!(
        error.downcast_ref::<vk::Result>(),
        Some(&vk::Result::ERROR_DEVICE_LOST)
    );
}

#[test]
fn empty_enumeration_is_reported_separately() {
    let driver = FakeDriver::default();
    let error = PhysicalDevice::builder()
        .select(&driver, None::<&FakeDriver>)
        .unwrap_err();
    assert!(matches!(
        error.downcast_ref::<Error>(),
        Some(Error::NoPhysicalDevices)
    ));
}

#[test]
fn missing_requested_type_rejects_every_device() {
    let driver = FakeDriver::new(vec![graphics_only(1, "A"), graphics_only(2, "B")]);
    let error = PhysicalDevice::builder()
        .queue_types([QueueType::Graphics, QueueType::Transfer])
        .select(&driver, None::<&FakeDriver>)
        .unwrap_err();
    assert!(matches!(
        error.downcast_ref::<Error>(),
        Some(Error::NoSuitablePhysicalDevice)
    ));
}

#[test]
fn per_purpose_lists_share_unique_entries() {
    let device = FakeDevice::new(1, "A")
        .family(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
            16,
        )
        .family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, 2)
        .family(vk::QueueFlags::TRANSFER, 1)
        .presents_from(&[0]);
    let driver = FakeDriver::new(vec![device]);

    let selection = PhysicalDevice::builder()
        .queue_types(QueueType::ALL)
        .queue_priorities([1.0, 0.5])
        .select(&driver, Some(&driver))
        .unwrap();
    let queues = &selection.queues;

    let distinct: BTreeSet<u32> = [&queues.compute, &queues.transfer, &queues.graphics, &queues.present]
        .into_iter()
        .flatten()
        .map(|info| info.family_index)
        .collect();
    let unique: Vec<u32> = queues.unique.iter().map(|info| info.family_index).collect();
    assert_eq!(unique, distinct.into_iter().collect::<Vec<_>>());
    assert_eq!(unique, [0, 1, 2]);
    assert_eq!(queues.unique[2].priorities, [1.0]);
    assert_eq!(queues.unique[0].priorities, [1.0, 0.5]);
}

#[test]
fn swapchain_parameters_from_selected_device() {
    let device = graphics_only(7, "A").presents_from(&[0]);
    let driver = FakeDriver::new(vec![device]);
    let selection = PhysicalDevice::builder()
        .select(&driver, Some(&driver))
        .unwrap();

    let parameters = SwapchainParameters::query(&driver, selection.handle(), 4000, 600).unwrap();
    assert_eq!(parameters.format, vk::Format::B8G8R8A8_SRGB);
    assert_eq!(parameters.present_mode, vk::PresentModeKHR::FIFO);
    assert_eq!(
        (parameters.extent.width, parameters.extent.height),
        (2048, 600)
    );
    assert_eq!(parameters.min_image_count, 3);
    assert_eq!(parameters.composite_alpha, vk::CompositeAlphaFlagsKHR::OPAQUE);
}
