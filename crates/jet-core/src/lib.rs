//! Core types and collaborators for the Jet engine.
//!
//! This crate provides the foundation the render device builds on:
//! - Compiled-in engine constants
//! - The engine-wide error type
//! - File access used to load pre-compiled shader binaries

pub mod error;
pub mod fs;

pub use error::{Error, Result};
pub use fs::{AccessMode, FileContents};

/// Engine-wide constants
pub mod constants {
    /// Width of the design resolution in pixels
    pub const DESIGN_WIDTH: u32 = 1000;
    /// Height of the design resolution in pixels
    pub const DESIGN_HEIGHT: u32 = 800;
    /// Application name reported to the driver
    pub const APP_NAME: &str = "Tech Demo";
    /// Engine name reported to the driver
    pub const ENGINE_NAME: &str = "JetEngine";
    /// Pre-compiled vertex shader of the hello-triangle pass
    pub const HELLO_TRIANGLE_VS: &str = "Test/HelloTriangle.vs.spirv";
    /// Pre-compiled pixel shader of the hello-triangle pass
    pub const HELLO_TRIANGLE_PS: &str = "Test/HelloTriangle.ps.spirv";
}
