//! Jet Engine Demo
//!
//! Opens a window and presents one frame per redraw: either a plain clear
//! whose colour alternates with the swapchain image, or a single quad /
//! triangle drawn from pre-compiled SPIR-V.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p jet-demo -- [OPTIONS]
//! ```
//!
//! ## Options
//!
//! - `--clear`: Clear-colour frames only (default)
//! - `--quad`: Draw a quad as a triangle strip
//! - `--triangle`: Draw a single triangle
//! - `--shader-dir <DIR>`: Directory holding `Test/HelloTriangle.*.spirv` (default: `assets`)
//! - `--no-validation`: Disable the Khronos validation layer
//! - `-h, --help`: Print help message
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod runner;

use std::path::PathBuf;

use tracing_subscriber::EnvFilter;
#[cfg(feature = "profiling-tracy")]
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::runner::DemoRunner;

/// What every frame draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawMode {
    Clear,
    Quad,
    Triangle,
}

/// Demo configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub draw_mode: DrawMode,
    pub shader_dir: PathBuf,
    pub validation: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            draw_mode: DrawMode::Clear,
            shader_dir: PathBuf::from("assets"),
            validation: cfg!(debug_assertions),
        }
    }
}

impl AppConfig {
    /// Build the configuration from command line arguments.
    pub fn from_args(args: impl IntoIterator<Item = String>) -> anyhow::Result<Self> {
        let mut config = Self::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--clear" => config.draw_mode = DrawMode::Clear,
                "--quad" => config.draw_mode = DrawMode::Quad,
                "--triangle" => config.draw_mode = DrawMode::Triangle,
                "--no-validation" => config.validation = false,
                "--shader-dir" => {
                    let dir = args
                        .next()
                        .ok_or_else(|| anyhow::anyhow!("--shader-dir needs a directory"))?;
                    config.shader_dir = PathBuf::from(dir);
                }
                other => anyhow::bail!("Unknown argument: {other}"),
            }
        }

        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    if std::env::args().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return Ok(());
    }

    init_logging();

    let config = AppConfig::from_args(std::env::args().skip(1))?;
    tracing::info!("{} starting ({:?})", jet_core::constants::APP_NAME, config.draw_mode);

    let event_loop = jet_platform::create_event_loop()?;
    let mut runner = DemoRunner::new(config);

    if let Err(e) = event_loop.run_app(&mut runner) {
        tracing::error!("Event loop error: {e}");
    }

    runner.exit_status()
}

fn init_logging() {
    #[cfg(feature = "profiling-tracy")]
    {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,jet_gpu=trace,jet_demo=trace"));

        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .with(tracing_tracy::TracyLayer::default())
            .init();
    }
    #[cfg(not(feature = "profiling-tracy"))]
    {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .init();
    }
}

fn print_help() {
    eprintln!(
        "Jet Engine Demo

USAGE:
    cargo run -p jet-demo -- [OPTIONS]

OPTIONS:
    --clear                 Clear-colour frames only (default)
    --quad                  Draw a quad as a triangle strip
    --triangle              Draw a single triangle
    --shader-dir <DIR>      Directory holding Test/HelloTriangle.*.spirv
                            Default: assets
    --no-validation         Disable the Khronos validation layer
    -h, --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}
