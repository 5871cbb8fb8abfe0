//! Vulkan instance creation.

use crate::error::{GpuError, Result};
use crate::loader::{ProcTable, VulkanLibrary};
use ash::vk;
use raw_window_handle::RawDisplayHandle;
use std::ffi::{c_char, CStr, CString};

/// Validation layers to enable when validation is requested.
pub fn validation_layers() -> Vec<&'static CStr> {
    vec![c"VK_LAYER_KHRONOS_validation"]
}

/// Instance extensions needed to present to windows of `display`.
///
/// Always contains `VK_KHR_surface` plus the platform surface extension.
pub fn required_instance_extensions(display: RawDisplayHandle) -> Result<Vec<&'static CStr>> {
    let names = ash_window::enumerate_required_extensions(display)
        .map_err(|e| GpuError::SurfaceCreation(format!("Unsupported display: {e}")))?;

    // SAFETY: ash-window hands out pointers into 'static extension name constants.
    let mut extensions: Vec<&'static CStr> = names
        .iter()
        .map(|&ptr| unsafe { CStr::from_ptr(ptr) })
        .collect();

    if !extensions.contains(&ash::khr::surface::NAME) {
        extensions.insert(0, ash::khr::surface::NAME);
    }

    Ok(extensions)
}

/// Names in `required` that are absent from `available`, in order.
pub fn missing_names(required: &[&CStr], available: &[String]) -> Vec<String> {
    required
        .iter()
        .map(|name| name.to_string_lossy())
        .filter(|name| !available.iter().any(|a| a == name))
        .map(|name| name.into_owned())
        .collect()
}

fn available_extensions(entry: &ash::Entry) -> Result<Vec<String>> {
    // SAFETY: global command, entry is loaded.
    let properties = unsafe { entry.enumerate_instance_extension_properties(None) }?;
    Ok(properties
        .iter()
        .filter_map(|p| p.extension_name_as_c_str().ok())
        .map(|name| name.to_string_lossy().into_owned())
        .collect())
}

fn available_layers(entry: &ash::Entry) -> Result<Vec<String>> {
    // SAFETY: global command, entry is loaded.
    let properties = unsafe { entry.enumerate_instance_layer_properties() }?;
    Ok(properties
        .iter()
        .filter_map(|p| p.layer_name_as_c_str().ok())
        .map(|name| name.to_string_lossy().into_owned())
        .collect())
}

/// Create a Vulkan instance and verify the instance tier.
///
/// Every required extension and (when `enable_validation` is set) every
/// validation layer must be offered by the loader; anything missing is an
/// error rather than a warning.
pub fn create_instance(
    library: &VulkanLibrary,
    app_name: &str,
    engine_name: &str,
    enable_validation: bool,
    display: RawDisplayHandle,
) -> Result<(ash::Instance, ProcTable)> {
    let entry = library.entry();

    let extensions = available_extensions(entry)?;
    tracing::debug!("{} instance extensions available", extensions.len());
    for name in &extensions {
        tracing::debug!("  extension: {name}");
    }

    let layers = available_layers(entry)?;
    tracing::debug!("{} instance layers available", layers.len());
    for name in &layers {
        tracing::debug!("  layer: {name}");
    }

    let required_extensions = required_instance_extensions(display)?;
    if let Some(name) = missing_names(&required_extensions, &extensions).into_iter().next() {
        return Err(GpuError::ExtensionNotSupported(name));
    }

    let required_layers = if enable_validation {
        validation_layers()
    } else {
        Vec::new()
    };
    if let Some(name) = missing_names(&required_layers, &layers).into_iter().next() {
        return Err(GpuError::LayerNotPresent(name));
    }

    let app_name = CString::new(app_name)
        .map_err(|_| GpuError::InvalidState("Application name contains NUL".to_string()))?;
    let engine_name = CString::new(engine_name)
        .map_err(|_| GpuError::InvalidState("Engine name contains NUL".to_string()))?;

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 1, 0, 0))
        .engine_name(&engine_name)
        .engine_version(vk::make_api_version(0, 1, 0, 0))
        .api_version(vk::API_VERSION_1_0);

    let extension_names: Vec<*const c_char> =
        required_extensions.iter().map(|ext| ext.as_ptr()).collect();
    let layer_names: Vec<*const c_char> = required_layers.iter().map(|l| l.as_ptr()).collect();

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names);

    // SAFETY: all pointers in `create_info` outlive the call.
    let instance = unsafe { entry.create_instance(&create_info, None) }?;

    let table = match library.resolve_instance_tier(&instance) {
        Ok(table) => table,
        Err(e) => {
            // SAFETY: nothing has been created from the instance yet.
            unsafe { instance.destroy_instance(None) };
            return Err(e);
        }
    };

    tracing::info!(
        "Vulkan instance created ({} extensions, {} layers)",
        required_extensions.len(),
        required_layers.len()
    );

    Ok((instance, table))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_names_reports_absent_entries_in_order() {
        let available = vec!["VK_KHR_surface".to_string(), "VK_KHR_win32_surface".to_string()];
        let required = [
            c"VK_KHR_surface",
            c"VK_KHR_xlib_surface",
            c"VK_LAYER_KHRONOS_validation",
        ];
        assert_eq!(
            missing_names(&required, &available),
            vec!["VK_KHR_xlib_surface", "VK_LAYER_KHRONOS_validation"]
        );
    }

    #[test]
    fn nothing_missing_when_all_offered() {
        let available = vec!["VK_LAYER_KHRONOS_validation".to_string()];
        assert!(missing_names(&validation_layers(), &available).is_empty());
        assert!(missing_names(&[], &[]).is_empty());
    }
}
