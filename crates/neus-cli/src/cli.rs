use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use log::LevelFilter;

#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

/// Renders an analytic sphere scene from orbiting cameras and stores the maps.
#[derive(Parser, Debug)]
#[command(name = "neus-render")]
#[command(about = "NeuS volume rendering of an analytic SDF scene")]
pub struct Args {
    /// JSON configuration; defaults apply to every missing key
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output `.npz` file holding one entry per view and map
    #[arg(short, long, default_value = "render.npz")]
    pub output: PathBuf,

    /// Number of views on the orbit
    #[arg(long, default_value = "4")]
    pub views: usize,

    /// Image width in pixels, overrides `data.val_image_size`
    #[arg(long)]
    pub width: Option<i64>,

    /// Image height in pixels, overrides `data.val_image_size`
    #[arg(long)]
    pub height: Option<i64>,

    /// Distance of the cameras from the origin
    #[arg(long, default_value = "3.0")]
    pub orbit_radius: f64,

    /// Radius of the rendered sphere, inside the unit bounding sphere
    #[arg(long, default_value = "0.6")]
    pub sphere_radius: f64,

    /// Training progress to render at (drives the scheduled `s_var`)
    #[arg(long, default_value = "1.0")]
    pub progress: f64,

    /// Render on the CPU even when CUDA is available
    #[arg(long)]
    pub cpu: bool,

    #[arg(long, default_value = "info", help = "Set the logging level")]
    pub log_level: LogLevel,
}
