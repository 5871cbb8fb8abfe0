//! Physical device descriptions for diagnostics.

use crate::memory::host_visible_memory_types;
use ash::vk;
use std::ffi::CStr;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Arm,
    Qualcomm,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x13B5 => Self::Arm,
            0x5143 => Self::Qualcomm,
            other => Self::Other(other),
        }
    }
}

/// Everything the device selector reports about a physical device.
#[derive(Debug, Clone)]
pub struct DeviceSummary {
    pub vendor: GpuVendor,
    pub device_name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: u32,
    pub driver_version: u32,
    /// Host-visible memory types, by index
    pub host_visible_types: Vec<u32>,
    pub extensions: Vec<String>,
}

impl DeviceSummary {
    /// Query a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let (properties, memory_properties, extensions) = unsafe {
            (
                instance.get_physical_device_properties(physical_device),
                instance.get_physical_device_memory_properties(physical_device),
                instance
                    .enumerate_device_extension_properties(physical_device)
                    .unwrap_or_default(),
            )
        };

        let extensions = extensions
            .iter()
            .filter_map(|ext| ext.extension_name_as_c_str().ok())
            .map(|name| name.to_string_lossy().into_owned())
            .collect();

        let device_name = properties
            .device_name_as_c_str()
            .map(CStr::to_string_lossy)
            .map(|name| name.into_owned())
            .unwrap_or_default();

        let host_visible_types = host_visible_memory_types(&memory_properties, u32::MAX);

        Self {
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            device_name,
            device_type: properties.device_type,
            api_version: properties.api_version,
            driver_version: properties.driver_version,
            host_visible_types,
            extensions,
        }
    }

    /// Get a human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}, {:?}) - Vulkan {}.{}.{} - driver {:#x} - host-visible memory types {:?} - {} extensions",
            self.device_name,
            self.vendor,
            self.device_type,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.driver_version,
            self.host_visible_types,
            self.extensions.len(),
        )
    }
}
