//! Swapchain management.
//!
//! The swapchain always has exactly [`SWAPCHAIN_IMAGE_COUNT`] images. It is
//! rebuilt in place whenever the surface changes: the old image views go
//! first, the new swapchain is created with the old one as its predecessor,
//! and only then is the old handle released.

use crate::backend::{GpuBackend, SwapchainDesc};
use crate::error::{GpuError, Result};
use ash::prelude::VkResult;
use ash::vk;

/// Number of swapchain images the engine works with.
pub const SWAPCHAIN_IMAGE_COUNT: usize = 2;

/// Preferred surface format.
pub const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Result of acquiring a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image was acquired and `image_available` will be signaled.
    Acquired { index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface; nothing was acquired.
    OutOfDate,
    /// No image became available within the timeout.
    TimedOut,
}

/// Result of presenting a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainStatus {
    Optimal,
    Suboptimal,
    OutOfDate,
}

impl SwapchainStatus {
    /// Whether the swapchain should be rebuilt.
    pub fn needs_rebuild(self) -> bool {
        !matches!(self, Self::Optimal)
    }
}

/// Classify a raw acquire result.
pub fn classify_acquire(result: VkResult<(u32, bool)>) -> Result<AcquireOutcome> {
    match result {
        Ok((index, suboptimal)) => Ok(AcquireOutcome::Acquired { index, suboptimal }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
        Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => Ok(AcquireOutcome::TimedOut),
        Err(vk::Result::ERROR_DEVICE_LOST) => Err(GpuError::DeviceLost),
        Err(e) => Err(GpuError::from(e)),
    }
}

/// Classify a raw present result.
pub fn classify_present(result: VkResult<bool>) -> Result<SwapchainStatus> {
    match result {
        Ok(false) => Ok(SwapchainStatus::Optimal),
        Ok(true) => Ok(SwapchainStatus::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(SwapchainStatus::OutOfDate),
        Err(vk::Result::ERROR_DEVICE_LOST) => Err(GpuError::DeviceLost),
        Err(e) => Err(GpuError::from(e)),
    }
}

/// Select the surface format.
///
/// A single `UNDEFINED` entry means the surface has no preference. Otherwise
/// the first `B8G8R8A8_UNORM` entry is used and must be sRGB non-linear.
pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> Result<vk::SurfaceFormatKHR> {
    if let [only] = available {
        if only.format == vk::Format::UNDEFINED {
            return Ok(PREFERRED_SURFACE_FORMAT);
        }
    }

    match available
        .iter()
        .find(|f| f.format == PREFERRED_SURFACE_FORMAT.format)
    {
        Some(format) if format.color_space == PREFERRED_SURFACE_FORMAT.color_space => Ok(*format),
        Some(format) => Err(GpuError::UnsupportedSurfaceFormat(format!(
            "{:?} offered with colour space {:?}",
            format.format, format.color_space
        ))),
        None => Err(GpuError::UnsupportedSurfaceFormat(format!(
            "{:?} not offered ({} formats available)",
            PREFERRED_SURFACE_FORMAT.format,
            available.len()
        ))),
    }
}

/// Select the present mode: mailbox, then immediate, then FIFO.
pub fn select_present_mode(available: &[vk::PresentModeKHR]) -> Result<vk::PresentModeKHR> {
    [
        vk::PresentModeKHR::MAILBOX,
        vk::PresentModeKHR::IMMEDIATE,
        vk::PresentModeKHR::FIFO,
    ]
    .into_iter()
    .find(|mode| available.contains(mode))
    .ok_or(GpuError::UnsupportedPresentMode)
}

/// Select the swapchain extent.
///
/// When the surface leaves the size to the swapchain (`u32::MAX` width) the
/// design extent is clamped to the supported range; otherwise the surface's
/// current extent is used verbatim.
pub fn select_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    design_extent: vk::Extent2D,
) -> Result<vk::Extent2D> {
    let extent = if capabilities.current_extent.width == u32::MAX {
        vk::Extent2D {
            width: design_extent.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: design_extent.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    } else {
        capabilities.current_extent
    };

    if extent.width == 0 || extent.height == 0 {
        return Err(GpuError::SwapchainCreation(format!(
            "Zero-sized extent {}x{}",
            extent.width, extent.height
        )));
    }

    Ok(extent)
}

/// Select the image usage.
///
/// Colour attachment is required; transfer destination is added when the
/// surface allows it so images can be cleared directly.
pub fn select_usage(capabilities: &vk::SurfaceCapabilitiesKHR) -> Result<vk::ImageUsageFlags> {
    let supported = capabilities.supported_usage_flags;
    if !supported.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT) {
        return Err(GpuError::UnsupportedImageUsage);
    }

    let mut usage = vk::ImageUsageFlags::COLOR_ATTACHMENT;
    if supported.contains(vk::ImageUsageFlags::TRANSFER_DST) {
        usage |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    Ok(usage)
}

/// Swapchain wrapper.
#[derive(Debug, Clone)]
pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub images: [vk::Image; SWAPCHAIN_IMAGE_COUNT],
    pub views: [vk::ImageView; SWAPCHAIN_IMAGE_COUNT],
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub usage: vk::ImageUsageFlags,
    pub present_mode: vk::PresentModeKHR,
    /// Incremented on every rebuild
    pub generation: u64,
}

impl Swapchain {
    /// Image `index`, if in range.
    pub fn image(&self, index: u32) -> Option<vk::Image> {
        self.images.get(index as usize).copied()
    }

    /// View of image `index`, if in range.
    pub fn view(&self, index: u32) -> Option<vk::ImageView> {
        self.views.get(index as usize).copied()
    }

    /// Destroy every image view. Calling this again is a no-op.
    pub fn destroy_views<B: GpuBackend>(&mut self, backend: &B) {
        for view in &mut self.views {
            if *view != vk::ImageView::null() {
                backend.destroy_image_view(*view);
                *view = vk::ImageView::null();
            }
        }
    }

    /// Destroy the views and the swapchain. Calling this again is a no-op.
    ///
    /// The device must be idle.
    pub fn destroy<B: GpuBackend>(&mut self, backend: &B) {
        self.destroy_views(backend);
        if self.handle != vk::SwapchainKHR::null() {
            backend.destroy_swapchain(self.handle);
            self.handle = vk::SwapchainKHR::null();
        }
    }
}

/// Create the swapchain, or rebuild it from `previous`.
///
/// On failure the previous swapchain is still released, so the caller ends
/// up with no swapchain rather than a half-destroyed one.
pub fn rebuild_swapchain<B: GpuBackend>(
    backend: &B,
    design_extent: vk::Extent2D,
    previous: Option<Swapchain>,
) -> Result<Swapchain> {
    let mut previous = previous;

    if let Err(e) = backend.wait_idle() {
        if let Some(mut old) = previous {
            old.destroy(backend);
        }
        return Err(e);
    }

    if let Some(old) = previous.as_mut() {
        old.destroy_views(backend);
    }

    let result = create_swapchain(backend, design_extent, previous.as_ref());

    if let Some(mut old) = previous {
        old.destroy(backend);
    }

    result
}

fn create_swapchain<B: GpuBackend>(
    backend: &B,
    design_extent: vk::Extent2D,
    previous: Option<&Swapchain>,
) -> Result<Swapchain> {
    let capabilities = backend.surface_capabilities()?;
    let formats = backend.surface_formats()?;
    let present_modes = backend.surface_present_modes()?;

    let surface_format = select_surface_format(&formats)?;
    let extent = select_extent(&capabilities, design_extent)?;
    let usage = select_usage(&capabilities)?;
    let present_mode = select_present_mode(&present_modes)?;

    let desc = SwapchainDesc {
        min_image_count: SWAPCHAIN_IMAGE_COUNT as u32,
        surface_format,
        extent,
        usage,
        pre_transform: capabilities.current_transform,
        present_mode,
        old_swapchain: previous.map_or(vk::SwapchainKHR::null(), |p| p.handle),
    };

    let handle = backend.create_swapchain(&desc)?;

    let images = match backend.swapchain_images(handle) {
        Ok(images) => images,
        Err(e) => {
            backend.destroy_swapchain(handle);
            return Err(e);
        }
    };

    let images: [vk::Image; SWAPCHAIN_IMAGE_COUNT] = match images.try_into() {
        Ok(images) => images,
        Err(images) => {
            backend.destroy_swapchain(handle);
            return Err(GpuError::SwapchainImageCount {
                expected: SWAPCHAIN_IMAGE_COUNT,
                actual: images.len(),
            });
        }
    };

    let mut views = [vk::ImageView::null(); SWAPCHAIN_IMAGE_COUNT];
    for i in 0..SWAPCHAIN_IMAGE_COUNT {
        match backend.create_image_view(images[i], surface_format.format) {
            Ok(view) => views[i] = view,
            Err(e) => {
                for &view in &views[..i] {
                    backend.destroy_image_view(view);
                }
                backend.destroy_swapchain(handle);
                return Err(e);
            }
        }
    }

    let generation = previous.map_or(0, |p| p.generation + 1);

    tracing::info!(
        "Swapchain created: {}x{} {:?} {:?} (generation {generation})",
        extent.width,
        extent.height,
        surface_format.format,
        present_mode
    );

    Ok(Swapchain {
        handle,
        images,
        views,
        format: surface_format,
        extent,
        usage,
        present_mode,
        generation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn caps(current: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 900,
                height: 4096,
            },
            supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            ..Default::default()
        }
    }

    const DESIGN: vk::Extent2D = vk::Extent2D {
        width: 1000,
        height: 800,
    };

    #[test]
    fn undefined_format_means_preferred() {
        let formats = [format(vk::Format::UNDEFINED, vk::ColorSpaceKHR::SRGB_NONLINEAR)];
        assert_eq!(select_surface_format(&formats).unwrap(), PREFERRED_SURFACE_FORMAT);
    }

    #[test]
    fn first_unorm_entry_is_used() {
        let formats = [
            format(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(select_surface_format(&formats).unwrap(), PREFERRED_SURFACE_FORMAT);
    }

    #[test]
    fn unorm_with_wrong_color_space_is_rejected() {
        let formats = [
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert!(matches!(
            select_surface_format(&formats),
            Err(GpuError::UnsupportedSurfaceFormat(_))
        ));
    }

    #[test]
    fn missing_or_empty_formats_are_rejected() {
        let formats = [format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR)];
        assert!(select_surface_format(&formats).is_err());
        assert!(select_surface_format(&[]).is_err());
    }

    #[test]
    fn present_mode_preference_order() {
        use vk::PresentModeKHR as M;
        assert_eq!(select_present_mode(&[M::FIFO, M::MAILBOX, M::IMMEDIATE]).unwrap(), M::MAILBOX);
        assert_eq!(select_present_mode(&[M::FIFO, M::IMMEDIATE]).unwrap(), M::IMMEDIATE);
        assert_eq!(select_present_mode(&[M::FIFO_RELAXED, M::FIFO]).unwrap(), M::FIFO);
        assert!(matches!(
            select_present_mode(&[M::FIFO_RELAXED]),
            Err(GpuError::UnsupportedPresentMode)
        ));
    }

    #[test]
    fn current_extent_is_used_verbatim() {
        let extent = select_extent(&caps((640, 480)), DESIGN).unwrap();
        assert_eq!((extent.width, extent.height), (640, 480));
    }

    #[test]
    fn undefined_extent_clamps_design_resolution() {
        let extent = select_extent(&caps((u32::MAX, u32::MAX)), DESIGN).unwrap();
        assert_eq!((extent.width, extent.height), (900, 800));
    }

    #[test]
    fn zero_extent_is_an_error() {
        assert!(select_extent(&caps((0, 0)), DESIGN).is_err());
    }

    #[test]
    fn usage_requires_color_attachment() {
        let mut c = caps((640, 480));
        assert_eq!(select_usage(&c).unwrap(), vk::ImageUsageFlags::COLOR_ATTACHMENT);

        c.supported_usage_flags |= vk::ImageUsageFlags::TRANSFER_DST;
        assert_eq!(
            select_usage(&c).unwrap(),
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST
        );

        c.supported_usage_flags = vk::ImageUsageFlags::TRANSFER_DST;
        assert!(matches!(select_usage(&c), Err(GpuError::UnsupportedImageUsage)));
    }

    #[test]
    fn acquire_results_are_classified() {
        assert_eq!(
            classify_acquire(Ok((1, false))).unwrap(),
            AcquireOutcome::Acquired {
                index: 1,
                suboptimal: false
            }
        );
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            AcquireOutcome::OutOfDate
        );
        assert_eq!(
            classify_acquire(Err(vk::Result::TIMEOUT)).unwrap(),
            AcquireOutcome::TimedOut
        );
        assert!(matches!(
            classify_acquire(Err(vk::Result::ERROR_DEVICE_LOST)),
            Err(GpuError::DeviceLost)
        ));
    }

    #[test]
    fn present_results_are_classified() {
        assert_eq!(classify_present(Ok(false)).unwrap(), SwapchainStatus::Optimal);
        assert_eq!(classify_present(Ok(true)).unwrap(), SwapchainStatus::Suboptimal);
        assert_eq!(
            classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            SwapchainStatus::OutOfDate
        );
        assert!(!SwapchainStatus::Optimal.needs_rebuild());
        assert!(SwapchainStatus::Suboptimal.needs_rebuild());
        assert!(classify_present(Err(vk::Result::ERROR_SURFACE_LOST_KHR)).is_err());
    }
}
