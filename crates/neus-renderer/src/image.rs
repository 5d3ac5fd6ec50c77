use anyhow::{Context, Result};
use log::debug;
use neus_core::camera::{CameraView, RayBundle};
use neus_utils::collection::RayCollection;
use neus_utils::data::IterChunks;
use neus_utils::tensor::{norm_last, validate_tensor};
use tch::{Kind, Tensor};

use crate::composite::composite;
use crate::context::RenderContext;
use crate::output::{ImageOutput, RayOutput};
use crate::renderer::NeusRenderer;

/// Reshapes per-pixel values `[B,H*W,C]` into an image batch `[B,C,H,W]`.
pub fn to_full_image(values: &Tensor, image_size: [i64; 2]) -> Tensor {
    let [height, width] = image_size;
    let size = values.size();
    validate_tensor(values, &[-1, height * width, -1], "values");
    values.reshape(&[size[0], height, width, size[2]]).permute(&[0, 3, 1, 2])
}

impl NeusRenderer {
    /// Renders every pixel of `view` in tiles of `rand_rays` rays and stitches the tiles back together.
    ///
    /// Outside training, each tile also gets its camera depth and, when mask rendering is on, its composited
    /// mask. Tiles are detached before they are joined.
    pub fn render_image(&self, view: &CameraView, sample_idx: Option<&Tensor>, ctx: &RenderContext) -> Result<RayOutput> {
        let (center, ray) = self.camera.center_and_ray(view);
        let batch_size = center.size()[0];
        let num_pixels = view.num_pixels();
        let ray_idx = Tensor::arange(num_pixels, (Kind::Int64, center.device()))
            .unsqueeze(0)
            .expand(&[batch_size, num_pixels], false);

        let render = &self.cfg.model.render;
        let chunks = IterChunks::f_new(&[center, ray, ray_idx], render.rand_rays, 1)?;
        debug!("Rendering {} pixels in {} tiles", num_pixels, chunks.num_chunks());

        let mut tiles = Vec::with_capacity(chunks.num_chunks() as usize);
        for chunk in chunks {
            let [center, ray, ray_idx] = &chunk.xs[..] else {
                unreachable!("chunks carry the three ray tensors");
            };
            let rays = RayBundle::new(center.shallow_clone(), ray.shallow_clone(), Some(ray_idx.shallow_clone()));
            let mut output = self.render_rays(&rays, sample_idx, Some(view), ctx);

            if !ctx.training {
                let dist = composite(&output.dists, &output.weights);
                output.depth = Some(dist / norm_last(ray));
                if render.render_mask {
                    let num_object_samples = render.num_object_samples();
                    output.mask_image = output
                        .mask
                        .as_ref()
                        .map(|mask| composite(mask, &output.weights.narrow(2, 0, num_object_samples)));
                }
            }
            tiles.push(output.detach());
        }
        Ok(RayOutput::cat_rays(&tiles))
    }

    /// Gradient-free render of full validation images.
    ///
    /// # Arguments
    /// * `pose` - World-to-camera poses `[B,3,4]`
    /// * `intr` - Intrinsics `[B,3,3]`
    /// * `sample_idx` - Image index of every view `[B]`, needed by appearance codes
    /// * `progress` - Training progress the render corresponds to
    pub fn inference(
        &self,
        pose: &Tensor,
        intr: &Tensor,
        sample_idx: Option<&Tensor>,
        progress: f64,
    ) -> Result<ImageOutput> {
        tch::no_grad(|| {
            let image_size = self.cfg.data.val_image_size;
            let view = CameraView::new(pose.shallow_clone(), intr.shallow_clone(), image_size);
            let ctx = RenderContext::inference(progress);
            let rays = self.render_image(&view, sample_idx, &ctx)?;

            let rot = pose.narrow(-1, 0, 3);
            let gradient = rays.gradient.as_ref().context("inference render is missing the composited gradient")?;
            let normal_cam = -gradient.matmul(&rot.transpose(-1, -2));

            let opacity = rays.opacity.as_ref().context("inference render is missing the opacity")?;
            let depth = rays.depth.as_ref().context("inference render is missing the depth")?;

            let mut mask_maps = Vec::new();
            if self.cfg.model.render.render_mask {
                let mask_image = rays.mask_image.as_ref().context("mask rendering is on but the field produced no mask")?;
                for band in &self.cfg.model.render.mask_bands {
                    let (band_mask, _) = mask_image.narrow(-1, band.channels.start, band.channels.len()).max_dim(-1, true);
                    mask_maps.push((band.name.clone(), to_full_image(&band_mask, image_size)));
                }
            }

            Ok(ImageOutput {
                rgb_map: to_full_image(&rays.rgb, image_size),
                opacity_map: to_full_image(opacity, image_size),
                depth_map: to_full_image(depth, image_size),
                normal_map: to_full_image(&normal_cam, image_size),
                mask_maps,
                rays,
            })
        })
    }
}
