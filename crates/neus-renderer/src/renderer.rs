use anyhow::{bail, ensure, Context, Result};
use log::{debug, info};
use neus_core::camera::{slice_by_ray_idx, Camera, CameraView, RayBundle};
use neus_core::config::NeusConfig;
use neus_core::embedding::AppearanceEmbedding;
use neus_core::fields::{BackgroundField, ColorField, SdfField};
use neus_utils::tensor::validate_tensor;
use tch::{nn, Tensor};

use crate::alpha::SVar;
use crate::bounds::get_dist_bounds;
use crate::composite::{alpha_compositing_weights, composite, over_white};
use crate::context::RenderContext;
use crate::output::{BackgroundOutput, ObjectOutput, RayOutput};

/// SDF value written over samples of rays that miss the bounding sphere.
const OUTSIDE_SDF: f64 = 1000.0;

/// The networks a renderer queries.
pub struct SceneFields {
    pub sdf: Box<dyn SdfField>,
    pub rgb: Box<dyn ColorField>,
    pub background: Option<Box<dyn BackgroundField>>,
}

/// NeuS volume renderer over an SDF field, a color field and an optional background field.
///
/// Optional behaviour (background, white backdrop, appearance codes, scheduled `s_var`,
/// supersampling, mask maps) is selected by the configuration.
pub struct NeusRenderer {
    pub(crate) cfg: NeusConfig,
    pub(crate) sdf: Box<dyn SdfField>,
    pub(crate) rgb: Box<dyn ColorField>,
    pub(crate) background: Option<Box<dyn BackgroundField>>,
    pub(crate) appear_embed: Option<AppearanceEmbedding>,
    pub(crate) camera: Box<dyn Camera>,
    pub(crate) s_var: SVar,
    pub(crate) outside_val: f64,
}

impl NeusRenderer {
    /// Builds a renderer, registering its parameters (`s_var`, appearance codes) under `p`.
    ///
    /// Fails when the configuration is invalid or does not fit the supplied fields.
    pub fn new(p: &nn::Path, cfg: &NeusConfig, fields: SceneFields, camera: Box<dyn Camera>) -> Result<Self> {
        cfg.validate()?;
        let SceneFields { sdf, rgb, background } = fields;

        match (cfg.model.background.enabled, background.is_some()) {
            (true, false) => bail!("background rendering is enabled but no background field was given"),
            (false, true) => bail!("a background field was given but background rendering is disabled"),
            _ => {}
        }

        let required = cfg.required_mask_channels();
        ensure!(
            sdf.mask_channels() >= required,
            "the configured mask channels need {required} SDF mask channels, the field has {}",
            sdf.mask_channels()
        );

        let appear_embed = if cfg.model.appear_embed.enabled {
            let num_images = cfg.data.num_images.context("appearance embeddings need data.num_images")?;
            Some(AppearanceEmbedding::new(
                p,
                num_images,
                cfg.model.appear_embed.dim,
                cfg.model.background.enabled,
            )?)
        } else {
            None
        };

        let s_var_cfg = &cfg.model.object.s_var;
        let s_var = if s_var_cfg.scheduled {
            SVar::Scheduled
        } else {
            SVar::Learned(p.var("s_var", &[], nn::Init::Const(s_var_cfg.init_val)))
        };

        let outside_val = if cfg.model.object.inside_out { -OUTSIDE_SDF } else { OUTSIDE_SDF };

        let render = &cfg.model.render;
        info!(
            "NeuS renderer: {} coarse + {} x {} fine samples, {} background samples{}",
            render.num_samples.coarse,
            render.num_sample_hierarchy,
            render.num_samples.fine,
            if cfg.model.background.enabled { render.num_samples.background } else { 0 },
            if cfg.model.background.white { ", white backdrop" } else { "" },
        );
        info!(
            "s_var: {}, supersampling: {}",
            if s_var_cfg.scheduled { "scheduled".to_string() } else { format!("learned from {}", s_var_cfg.init_val) },
            if render.supersampling {
                format!("{} rays from level {}", render.supersamples, render.supersample_activate_level)
            } else {
                "off".to_string()
            },
        );

        Ok(Self { cfg: cfg.clone(), sdf, rgb, background, appear_embed, camera, s_var, outside_val })
    }

    /// Current `s_var` (a scalar tensor).
    pub fn s_var(&self, progress: f64) -> Tensor {
        self.s_var.value(progress, tch::Device::Cpu)
    }

    /// Overwrite value for the SDF of rays that miss the bounding sphere.
    pub fn outside_val(&self) -> f64 {
        self.outside_val
    }

    /// Training entry point: renders the pixels `ray_idx` (`[B,R]`) of training views.
    ///
    /// # Arguments
    /// * `pose` - World-to-camera poses `[B,3,4]`
    /// * `intr` - Intrinsics `[B,3,3]`
    /// * `sample_idx` - Image index of every view `[B]`, needed by appearance codes
    /// * `ray_idx` - Flat pixel indices `[B,R]`
    /// * `ctx` - Render context; sample jitter also needs `model.render.stratified`
    pub fn forward(
        &self,
        pose: &Tensor,
        intr: &Tensor,
        sample_idx: Option<&Tensor>,
        ray_idx: &Tensor,
        ctx: &RenderContext,
    ) -> RayOutput {
        let view = CameraView::new(pose.shallow_clone(), intr.shallow_clone(), self.cfg.data.train_image_size);
        let ctx = RenderContext { stratified: ctx.stratified && self.cfg.model.render.stratified, ..*ctx };
        self.render_pixels(&view, ray_idx, sample_idx, &ctx)
    }

    /// Renders the pixels `ray_idx` (`[B,R]`) of `view`.
    pub fn render_pixels(
        &self,
        view: &CameraView,
        ray_idx: &Tensor,
        sample_idx: Option<&Tensor>,
        ctx: &RenderContext,
    ) -> RayOutput {
        let (center, ray) = self.camera.center_and_ray(view);
        let center = slice_by_ray_idx(&center, ray_idx);
        let ray = slice_by_ray_idx(&ray, ray_idx);
        let rays = RayBundle::new(center, ray, Some(ray_idx.shallow_clone()));
        self.render_rays(&rays, sample_idx, Some(view), ctx)
    }

    /// Renders a batch of rays.
    ///
    /// Supersampling needs the camera `view` and the rays' pixel indices; without them it is skipped.
    pub fn render_rays(
        &self,
        rays: &RayBundle,
        sample_idx: Option<&Tensor>,
        view: Option<&CameraView>,
        ctx: &RenderContext,
    ) -> RayOutput {
        let bounds = get_dist_bounds(&rays.center, &rays.ray_unit);
        let (app, app_outside) = self.appearance_embedding(sample_idx, rays.num_rays());

        let object = self.render_rays_object(rays, &bounds, app.as_ref(), ctx);
        let background = self
            .background
            .as_ref()
            .map(|field| self.render_rays_background(field.as_ref(), rays, &bounds.far, app_outside.as_ref(), ctx));
        let (rgb, dists, weights) = self.composite_samples(&object, background.as_ref());

        debug!("Ray batch: rgb {:?}, dists {:?}, weights {:?}", rgb.size(), dists.size(), weights.size());

        let rgb = match (view, &rays.ray_idx) {
            (Some(view), Some(ray_idx)) => {
                self.supersample(rgb, &object, &weights, ray_idx, view, sample_idx, ctx)
            }
            _ => rgb,
        };

        RayOutput {
            rgb,
            opacity: object.opacity,
            outside: bounds.outside,
            dists,
            weights,
            gradient: object.gradient,
            gradients: object.gradients,
            hessians: object.hessians,
            mask: object.mask,
            depth: None,
            mask_image: None,
        }
    }

    /// Merges object and background samples (object first) and composites their color.
    ///
    /// # Returns
    /// * `(Tensor, Tensor, Tensor)` - Color `[B,R,3]`, distances `[B,R,N,1]` and weights `[B,R,N,1]`
    pub(crate) fn composite_samples(
        &self,
        object: &ObjectOutput,
        background: Option<&BackgroundOutput>,
    ) -> (Tensor, Tensor, Tensor) {
        let (rgbs, dists, alphas) = match background {
            Some(bg) => (
                Tensor::cat(&[&object.rgbs, &bg.rgbs], 2),
                Tensor::cat(&[&object.dists, &bg.dists], 2),
                Tensor::cat(&[&object.alphas, &bg.alphas], 2),
            ),
            None => (object.rgbs.shallow_clone(), object.dists.shallow_clone(), object.alphas.shallow_clone()),
        };
        let weights = alpha_compositing_weights(&alphas);
        let rgb = composite(&rgbs, &weights);
        let rgb = if self.cfg.model.background.white { over_white(&rgb, &weights) } else { rgb };
        (rgb, dists, weights)
    }

    /// Appearance codes for `num_rays` rays of every view in `sample_idx`.
    ///
    /// Panics when appearance codes are enabled and `sample_idx` is missing.
    pub(crate) fn appearance_embedding(
        &self,
        sample_idx: Option<&Tensor>,
        num_rays: i64,
    ) -> (Option<Tensor>, Option<Tensor>) {
        let Some(embedding) = &self.appear_embed else {
            return (None, None);
        };
        let sample_idx = sample_idx.expect("appearance embeddings need the image index of every view");
        validate_tensor(sample_idx, &[-1], "sample_idx");

        let render = &self.cfg.model.render;
        let (app, app_outside) =
            embedding.lookup(sample_idx, num_rays, render.num_object_samples(), render.num_samples.background);
        (Some(app), app_outside)
    }
}
