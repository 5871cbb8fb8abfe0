//! Physical device selection and logical device creation.
//!
//! Selection is deliberately simple: the first device exposing a queue
//! family with graphics support that can also present to the surface wins.
//! There is no scoring or ranking between devices.

use crate::capabilities::DeviceSummary;
use crate::error::{GpuError, Result};
use crate::loader::{resolve_device_tier, ProcTable};
use crate::surface::SurfaceBinding;
use ash::vk;
use std::ffi::{c_char, CStr};

/// What was queried about one queue family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyCandidate {
    pub queue_count: u32,
    pub flags: vk::QueueFlags,
    pub present_supported: bool,
}

impl QueueFamilyCandidate {
    /// Whether this family can both render and present.
    pub fn qualifies(&self) -> bool {
        self.queue_count > 0 && self.flags.contains(vk::QueueFlags::GRAPHICS) && self.present_supported
    }
}

/// A physical device and its queue families, in enumeration order.
#[derive(Debug, Clone)]
pub struct PhysicalDeviceCandidate {
    pub handle: vk::PhysicalDevice,
    pub families: Vec<QueueFamilyCandidate>,
}

/// Outcome of device selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSelection {
    /// Index of the chosen device in enumeration order
    pub device_index: usize,
    pub physical_device: vk::PhysicalDevice,
    /// Family used for both rendering and presentation
    pub family_index: u32,
    pub graphics_queue_index: u32,
    pub present_queue_index: u32,
}

/// Queue handles used by the frame loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceQueues {
    pub graphics: vk::Queue,
    pub present: vk::Queue,
}

/// Pick the first device and first family that can render and present.
pub fn select_queue_family(candidates: &[PhysicalDeviceCandidate]) -> Option<QueueSelection> {
    candidates
        .iter()
        .enumerate()
        .find_map(|(device_index, candidate)| {
            candidate
                .families
                .iter()
                .position(QueueFamilyCandidate::qualifies)
                .map(|family| QueueSelection {
                    device_index,
                    physical_device: candidate.handle,
                    family_index: family as u32,
                    graphics_queue_index: 0,
                    present_queue_index: 0,
                })
        })
}

/// Enumerate physical devices and describe their queue families.
///
/// Logs a per-device report at debug level.
pub fn enumerate_candidates(
    instance: &ash::Instance,
    surface: &SurfaceBinding,
) -> Result<Vec<PhysicalDeviceCandidate>> {
    // SAFETY: the instance is valid for the duration of the call.
    let devices = unsafe { instance.enumerate_physical_devices() }?;
    tracing::debug!("{} physical device(s) found", devices.len());

    let mut candidates = Vec::with_capacity(devices.len());

    for (index, &handle) in devices.iter().enumerate() {
        // SAFETY: `handle` was just enumerated from `instance`.
        let summary = unsafe { DeviceSummary::query(instance, handle) };
        tracing::debug!("Device {index}: {}", summary.summary());
        for extension in &summary.extensions {
            tracing::debug!("  extension: {extension}");
        }

        // SAFETY: as above.
        let properties = unsafe { instance.get_physical_device_queue_family_properties(handle) };

        let mut families = Vec::with_capacity(properties.len());
        for (family, props) in properties.iter().enumerate() {
            let present_supported = surface.supports_present(handle, family as u32)?;
            tracing::debug!(
                "  queue family {family}: count={} flags={:?} present={present_supported}",
                props.queue_count,
                props.queue_flags
            );
            families.push(QueueFamilyCandidate {
                queue_count: props.queue_count,
                flags: props.queue_flags,
                present_supported,
            });
        }

        candidates.push(PhysicalDeviceCandidate { handle, families });
    }

    Ok(candidates)
}

/// Required device extensions.
pub fn required_device_extensions() -> Vec<&'static CStr> {
    vec![ash::khr::swapchain::NAME]
}

/// Create the logical device with one queue on the selected family and
/// verify the device tier.
///
/// # Safety
/// The instance must be valid and `selection` must come from it.
pub unsafe fn create_logical_device(
    instance: &ash::Instance,
    selection: &QueueSelection,
) -> Result<(ash::Device, ProcTable)> {
    let available = unsafe { instance.enumerate_device_extension_properties(selection.physical_device) }?;
    for required in required_device_extensions() {
        let offered = available
            .iter()
            .any(|p| p.extension_name_as_c_str().is_ok_and(|name| name == required));
        if !offered {
            return Err(GpuError::ExtensionNotSupported(
                required.to_string_lossy().into_owned(),
            ));
        }
    }

    let queue_priority = 1.0_f32;
    let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(selection.family_index)
        .queue_priorities(std::slice::from_ref(&queue_priority))];

    let extension_names: Vec<*const c_char> = required_device_extensions()
        .iter()
        .map(|ext| ext.as_ptr())
        .collect();

    let features = vk::PhysicalDeviceFeatures::default();

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .enabled_features(&features);

    let device = unsafe { instance.create_device(selection.physical_device, &device_create_info, None) }?;

    let table = match resolve_device_tier(instance, &device) {
        Ok(table) => table,
        Err(e) => {
            unsafe { device.destroy_device(None) };
            return Err(e);
        }
    };

    tracing::info!(
        "Logical device created on device {} queue family {}",
        selection.device_index,
        selection.family_index
    );

    Ok((device, table))
}
