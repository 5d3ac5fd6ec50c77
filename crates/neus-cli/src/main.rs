use std::f64::consts::PI;

use anyhow::{ensure, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use neus_core::camera::{intrinsics, look_at_pose, PinholeCamera};
use neus_core::config::NeusConfig;
use neus_core::fields::analytic::{ConstantBackground, NormalShadedColor, SphereSdf};
use neus_core::fields::BackgroundField;
use neus_renderer::{NeusRenderer, SceneFields};
use neus_utils::var_store::ListParameters;
use tch::nn::VarStore;
use tch::{Device, Kind, Tensor};

mod cli;
mod logger;

use cli::Args;
use logger::init_logger;

/// Mask channels of the sphere, enough for the default mask bands and supersampling channels.
const SPHERE_MASK_CHANNELS: i64 = 16;

fn load_config(args: &Args) -> Result<NeusConfig> {
    let mut cfg = match &args.config {
        Some(path) => NeusConfig::from_json_file(path)?,
        None => NeusConfig::default(),
    };
    let [height, width] = cfg.data.val_image_size;
    cfg.data.val_image_size = [args.height.unwrap_or(height), args.width.unwrap_or(width)];
    cfg.validate()?;
    Ok(cfg)
}

fn scene(cfg: &NeusConfig, sphere_radius: f64) -> SceneFields {
    let sdf = SphereSdf::new([0.0, 0.0, 0.0], sphere_radius)
        .with_mask(SPHERE_MASK_CHANNELS, 10.0)
        .with_active_levels(cfg.model.render.supersample_activate_level);
    let background = cfg.model.background.enabled.then(|| {
        Box::new(ConstantBackground { rgb: [0.25, 0.35, 0.5], density: 2.0 }) as Box<dyn BackgroundField>
    });
    SceneFields {
        sdf: Box::new(sdf),
        rgb: Box::new(NormalShadedColor { albedo: [0.85, 0.6, 0.4], ambient: 0.15 }),
        background,
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(args.log_level.clone().into());

    ensure!(args.views > 0, "at least one view is needed");
    ensure!(
        args.sphere_radius > 0.0 && args.sphere_radius < 1.0,
        "the sphere radius must lie in (0, 1), got {}",
        args.sphere_radius
    );
    ensure!(args.orbit_radius > 1.0, "cameras must orbit outside the unit sphere");

    let device = if !args.cpu && tch::Cuda::is_available() {
        info!("CUDA is available. Using GPU for rendering.");
        Device::Cuda(0)
    } else {
        info!("Using CPU for rendering.");
        Device::Cpu
    };

    let cfg = load_config(&args)?;
    info!("Configuration:\n{}", cfg.to_json_pretty()?);

    let vs = VarStore::new(device);
    let renderer = NeusRenderer::new(&vs.root(), &cfg, scene(&cfg, args.sphere_radius), Box::new(PinholeCamera))?;
    vs.log_parameters();

    let image_size = cfg.data.val_image_size;
    let intr = intrinsics(image_size[1] as f64, image_size).unsqueeze(0).to_device(device);
    let num_images = cfg.data.num_images.unwrap_or(1);

    let pb = ProgressBar::new(args.views as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let mut maps: Vec<(String, Tensor)> = Vec::new();
    for view in 0..args.views {
        pb.set_message(format!("view {view}"));
        let angle = 2.0 * PI * view as f64 / args.views as f64;
        let eye = [args.orbit_radius * angle.cos(), args.orbit_radius * angle.sin(), 0.5];
        let pose = look_at_pose(eye, [0.0, 0.0, 0.0], [0.0, 0.0, 1.0]).unsqueeze(0).to_device(device);
        let sample_idx = Tensor::from_slice(&[view as i64 % num_images]).to_device(device);

        let output = renderer.inference(&pose, &intr, Some(&sample_idx), args.progress)?;
        info!(
            "View {view}: mean opacity {:.3}, mean rgb {:.3}",
            output.opacity_map.mean(Kind::Float).double_value(&[]),
            output.rgb_map.mean(Kind::Float).double_value(&[]),
        );
        for (name, map) in output.maps() {
            maps.push((format!("view{view}_{name}"), map.to_device(Device::Cpu)));
        }
        pb.inc(1);
    }
    pb.finish_with_message("rendering complete");

    Tensor::write_npz(&maps, &args.output)?;
    info!("Saved {} maps to '{}'", maps.len(), args.output.display());
    Ok(())
}
