//! Vulkan library loading and entry-point tables.
//!
//! Entry points are resolved in three tiers: global (no instance), instance
//! and device. Each tier has a fixed, ordered list of the functions the
//! engine calls; a tier is only considered loaded when every name on its
//! list resolves to a non-null pointer.

use crate::error::{GpuError, Result};
use ash::vk;
use std::ffi::CStr;
use std::fmt;

/// Resolution tier of an entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderTier {
    Global,
    Instance,
    Device,
}

impl fmt::Display for LoaderTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Global => "global",
            Self::Instance => "instance",
            Self::Device => "device",
        };
        f.write_str(name)
    }
}

/// Functions callable before an instance exists.
pub const GLOBAL_ENTRY_POINTS: &[&CStr] = &[
    c"vkEnumerateInstanceExtensionProperties",
    c"vkEnumerateInstanceLayerProperties",
    c"vkCreateInstance",
];

/// Functions resolved against the instance.
pub const INSTANCE_ENTRY_POINTS: &[&CStr] = &[
    c"vkDestroyInstance",
    c"vkDestroySurfaceKHR",
    c"vkCreateDevice",
    c"vkGetDeviceProcAddr",
    c"vkEnumeratePhysicalDevices",
    c"vkEnumerateDeviceExtensionProperties",
    c"vkGetPhysicalDeviceProperties",
    c"vkGetPhysicalDeviceFeatures",
    c"vkGetPhysicalDeviceQueueFamilyProperties",
    c"vkGetPhysicalDeviceMemoryProperties",
    c"vkGetPhysicalDeviceSurfaceSupportKHR",
    c"vkGetPhysicalDeviceSurfaceCapabilitiesKHR",
    c"vkGetPhysicalDeviceSurfaceFormatsKHR",
    c"vkGetPhysicalDeviceSurfacePresentModesKHR",
];

/// Functions resolved against the logical device.
pub const DEVICE_ENTRY_POINTS: &[&CStr] = &[
    c"vkGetDeviceQueue",
    c"vkDeviceWaitIdle",
    c"vkQueueWaitIdle",
    c"vkDestroyDevice",
    c"vkCreateSwapchainKHR",
    c"vkDestroySwapchainKHR",
    c"vkGetSwapchainImagesKHR",
    c"vkAcquireNextImageKHR",
    c"vkQueuePresentKHR",
    c"vkCreateImageView",
    c"vkDestroyImageView",
    c"vkCreateRenderPass",
    c"vkDestroyRenderPass",
    c"vkCreateFramebuffer",
    c"vkDestroyFramebuffer",
    c"vkCreateShaderModule",
    c"vkDestroyShaderModule",
    c"vkCreatePipelineLayout",
    c"vkDestroyPipelineLayout",
    c"vkCreateGraphicsPipelines",
    c"vkDestroyPipeline",
    c"vkCreateSemaphore",
    c"vkDestroySemaphore",
    c"vkCreateCommandPool",
    c"vkDestroyCommandPool",
    c"vkAllocateCommandBuffers",
    c"vkFreeCommandBuffers",
    c"vkBeginCommandBuffer",
    c"vkEndCommandBuffer",
    c"vkCmdPipelineBarrier",
    c"vkCmdClearColorImage",
    c"vkCmdBeginRenderPass",
    c"vkCmdBindPipeline",
    c"vkCmdBindVertexBuffers",
    c"vkCmdDraw",
    c"vkCmdEndRenderPass",
    c"vkQueueSubmit",
    c"vkCreateBuffer",
    c"vkDestroyBuffer",
    c"vkGetBufferMemoryRequirements",
    c"vkAllocateMemory",
    c"vkFreeMemory",
    c"vkBindBufferMemory",
    c"vkMapMemory",
    c"vkFlushMappedMemoryRanges",
    c"vkUnmapMemory",
];

/// Entry points of one tier, verified to resolve.
///
/// The function pointers themselves are owned by the `ash` dispatch tables;
/// this only records which names were checked, in order.
#[derive(Clone)]
pub struct ProcTable {
    tier: LoaderTier,
    entries: Vec<&'static CStr>,
}

impl ProcTable {
    /// Resolve every name in `names` through `lookup`.
    ///
    /// Fails on the first name that resolves to null.
    pub fn resolve<F>(tier: LoaderTier, names: &[&'static CStr], mut lookup: F) -> Result<Self>
    where
        F: FnMut(&CStr) -> vk::PFN_vkVoidFunction,
    {
        let mut entries = Vec::with_capacity(names.len());

        for &name in names {
            if lookup(name).is_none() {
                return Err(GpuError::MissingEntryPoint {
                    tier,
                    name: name.to_string_lossy().into_owned(),
                });
            }
            entries.push(name);
        }

        tracing::debug!("Resolved {} {} entry points", entries.len(), tier);

        Ok(Self { tier, entries })
    }

    /// Tier this table was resolved for.
    pub fn tier(&self) -> LoaderTier {
        self.tier
    }

    /// Number of resolved entry points.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for ProcTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcTable")
            .field("tier", &self.tier)
            .field("entries", &self.entries.len())
            .finish()
    }
}

/// The dynamically loaded Vulkan loader library.
pub struct VulkanLibrary {
    entry: ash::Entry,
    global: ProcTable,
}

impl VulkanLibrary {
    /// Load the system Vulkan loader and verify the global tier.
    pub fn load() -> Result<Self> {
        // SAFETY: loading the system loader runs its initialisation routines;
        // nothing else in the process touches it concurrently.
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::LibraryLoad(e.to_string()))?;

        let get_instance_proc_addr = entry.static_fn().get_instance_proc_addr;
        let global = ProcTable::resolve(LoaderTier::Global, GLOBAL_ENTRY_POINTS, |name| {
            // SAFETY: `name` is NUL-terminated and a null instance selects global commands.
            unsafe { get_instance_proc_addr(vk::Instance::null(), name.as_ptr()) }
        })?;

        tracing::info!("Vulkan library loaded");

        Ok(Self { entry, global })
    }

    /// The ash entry point.
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    /// The verified global tier.
    pub fn global_table(&self) -> &ProcTable {
        &self.global
    }

    /// Verify the instance tier.
    pub fn resolve_instance_tier(&self, instance: &ash::Instance) -> Result<ProcTable> {
        let get_instance_proc_addr = self.entry.static_fn().get_instance_proc_addr;
        let handle = instance.handle();
        ProcTable::resolve(LoaderTier::Instance, INSTANCE_ENTRY_POINTS, |name| {
            // SAFETY: `handle` is a live instance and `name` is NUL-terminated.
            unsafe { get_instance_proc_addr(handle, name.as_ptr()) }
        })
    }
}

/// Verify the device tier.
pub fn resolve_device_tier(instance: &ash::Instance, device: &ash::Device) -> Result<ProcTable> {
    let get_device_proc_addr = instance.fp_v1_0().get_device_proc_addr;
    let handle = device.handle();
    ProcTable::resolve(LoaderTier::Device, DEVICE_ENTRY_POINTS, |name| {
        // SAFETY: `handle` is a live device created from `instance`.
        unsafe { get_device_proc_addr(handle, name.as_ptr()) }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe extern "system" fn stub() {}

    #[test]
    fn resolves_all_names_in_order() {
        let mut looked_up = Vec::new();
        let table = ProcTable::resolve(LoaderTier::Global, GLOBAL_ENTRY_POINTS, |name| {
            looked_up.push(name.to_owned());
            Some(stub)
        })
        .unwrap();
        assert_eq!(table.tier(), LoaderTier::Global);
        assert_eq!(table.len(), GLOBAL_ENTRY_POINTS.len());
        assert!(looked_up.iter().map(|name| name.as_c_str()).eq(GLOBAL_ENTRY_POINTS.iter().copied()));
    }

    #[test]
    fn missing_entry_point_names_tier_and_symbol() {
        let err = ProcTable::resolve(LoaderTier::Device, DEVICE_ENTRY_POINTS, |name| {
            if name == c"vkQueuePresentKHR" {
                None
            } else {
                Some(stub)
            }
        })
        .unwrap_err();

        match err {
            GpuError::MissingEntryPoint { tier, name } => {
                assert_eq!(tier, LoaderTier::Device);
                assert_eq!(name, "vkQueuePresentKHR");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn tier_lists_have_no_duplicates() {
        for list in [GLOBAL_ENTRY_POINTS, INSTANCE_ENTRY_POINTS, DEVICE_ENTRY_POINTS] {
            let mut names: Vec<_> = list.to_vec();
            names.sort();
            names.dedup();
            assert_eq!(names.len(), list.len());
        }
    }
}
