use log::{debug, log_enabled, Level};
use neus_core::camera::{CameraView, RayBundle};
use neus_utils::tensor::validate_tensor_type;
use tch::{Kind, Tensor};

use crate::bounds::get_dist_bounds;
use crate::composite::composite;
use crate::context::RenderContext;
use crate::output::ObjectOutput;
use crate::renderer::NeusRenderer;

/// Ray selection distribution `(score + 1e-6) / (sum(score) + 1e-6)` over the rays of each view.
///
/// # Arguments
/// * `score` - Per-ray detail score `[B,R]`, clamped to be non-negative
///
/// # Returns
/// * `Tensor` - `[B,R]`
pub fn selection_probability(score: &Tensor) -> Tensor {
    let score = score.clamp_min(0.0);
    (&score + 1e-6) / (score.sum_dim_intlist([1i64].as_slice(), true, Kind::Float) + 1e-6)
}

/// Averages supersampled colors into the rays they were drawn for.
///
/// A ray drawn `k` times ends up as `(rgb + sum of its k supersamples) / (1 + k)`; rays never drawn keep
/// their color.
///
/// # Arguments
/// * `rgb` - Primary colors `[B,R,3]`
/// * `ss_rgb` - Supersampled colors `[B,S,3]`
/// * `ss_idxs` - Ray slot (within `R`) of every supersample `[B,S]`
pub fn blend_supersamples(rgb: &Tensor, ss_rgb: &Tensor, ss_idxs: &Tensor) -> Tensor {
    validate_tensor_type(ss_idxs, Kind::Int64, "ss_idxs");
    let channels = rgb.size()[2];
    let index = ss_idxs.unsqueeze(-1);
    let sums = rgb.zeros_like().scatter_add(1, &index.expand(&[-1, -1, channels], false), ss_rgb);
    let counts = rgb.narrow(2, 0, 1).zeros_like().scatter_add(1, &index, &ss_rgb.narrow(2, 0, 1).ones_like());
    (rgb + sums) / (counts + 1.0)
}

impl NeusRenderer {
    /// Whether the configuration and the SDF field's current level allow supersampling.
    pub fn supersampling_active(&self) -> bool {
        let render = &self.cfg.model.render;
        render.supersampling && render.supersamples > 0 && self.sdf.active_levels() >= render.supersample_activate_level
    }

    /// Re-renders rays picked in proportion to their composited mask score at random sub-pixel positions
    /// and averages the results into `rgb`.
    ///
    /// Only color is refined. Opacity, gradients and Hessians of the batch stay those of the primary pass.
    /// Returns `rgb` untouched when supersampling is inactive or the field has no mask.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn supersample(
        &self,
        rgb: Tensor,
        object: &ObjectOutput,
        weights: &Tensor,
        ray_idx: &Tensor,
        view: &CameraView,
        sample_idx: Option<&Tensor>,
        ctx: &RenderContext,
    ) -> Tensor {
        if !self.supersampling_active() {
            return rgb;
        }
        let Some(mask) = &object.mask else {
            return rgb;
        };
        let render = &self.cfg.model.render;

        let num_object_samples = object.dists.size()[2];
        let mask = composite(mask, &weights.narrow(2, 0, num_object_samples));
        let channels = render.supersample_channels;
        let (score, _) = mask.narrow(-1, channels.start, channels.len()).max_dim(-1, false);
        let probability = selection_probability(&score.detach());
        if log_enabled!(Level::Debug) {
            debug!(
                "Supersampling probability: mean {:.3e}, std {:.3e}, max {:.3e}",
                probability.mean(Kind::Float).double_value(&[]),
                probability.std(true).double_value(&[]),
                probability.max().double_value(&[])
            );
        }

        let ss_idxs = probability.multinomial(render.supersamples, true);
        let ss_ray_idx = ray_idx.gather(1, &ss_idxs, false);
        let (center, ray) = self.camera.center_and_ray_supersampled(view, &ss_ray_idx, 1);
        let ss_rays = RayBundle::new(center, ray, Some(ss_ray_idx));

        let ss_bounds = get_dist_bounds(&ss_rays.center, &ss_rays.ray_unit);
        let (app, app_outside) = self.appearance_embedding(sample_idx, ss_rays.num_rays());
        let ss_object = self.render_rays_object(&ss_rays, &ss_bounds, app.as_ref(), ctx);
        let ss_background = self.background.as_ref().map(|field| {
            self.render_rays_background(field.as_ref(), &ss_rays, &ss_bounds.far, app_outside.as_ref(), ctx)
        });
        let (ss_rgb, _, _) = self.composite_samples(&ss_object, ss_background.as_ref());

        blend_supersamples(&rgb, &ss_rgb, &ss_idxs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blend_averages_repeated_draws() {
        let rgb = Tensor::from_slice(&[0.0f32, 0.0, 0.0, 0.5, 0.5, 0.5, 1.0, 1.0, 1.0]).view([1, 3, 3]);
        let ss_rgb = Tensor::from_slice(&[0.3f32, 0.3, 0.3, 0.6, 0.6, 0.6, 0.1, 0.2, 0.3]).view([1, 3, 3]);
        let ss_idxs = Tensor::from_slice(&[0i64, 0, 2]).view([1, 3]);

        let blended = blend_supersamples(&rgb, &ss_rgb, &ss_idxs);
        let expected = Tensor::from_slice(&[0.3f32, 0.3, 0.3, 0.5, 0.5, 0.5, 0.55, 0.6, 0.65]).view([1, 3, 3]);
        assert!(blended.allclose(&expected, 1e-6, 1e-6, false));
    }

    #[test]
    fn test_selection_probability() {
        let score = Tensor::from_slice(&[0.0f32, 1.0, 3.0, -2.0]).view([1, 4]);
        let probability = selection_probability(&score);
        assert!((probability.sum(Kind::Float).double_value(&[]) - 1.0).abs() < 1e-5);
        assert!((probability.double_value(&[0, 2]) - 0.75).abs() < 1e-5);
        assert!(probability.min().double_value(&[]) > 0.0);

        let draws = probability.multinomial(1000, true);
        assert_eq!(draws.size(), &[1, 1000]);
        assert_eq!(draws.kind(), Kind::Int64);
        let hits = draws.eq(2).sum(Kind::Int64).int64_value(&[]);
        assert!(hits > 600, "hits = {hits}");
    }
}
