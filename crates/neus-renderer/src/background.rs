use neus_core::camera::{points_from_dist, RayBundle};
use neus_core::fields::BackgroundField;
use tch::Tensor;

use crate::alpha::volume_rendering_alphas;
use crate::context::RenderContext;
use crate::output::BackgroundOutput;
use crate::renderer::NeusRenderer;
use crate::sampler::sample_dists_background;

impl NeusRenderer {
    /// Background pass beyond the far bound `[B,R,1]`, with density turned into opacity.
    pub fn render_rays_background(
        &self,
        field: &dyn BackgroundField,
        rays: &RayBundle,
        far: &Tensor,
        app_outside: Option<&Tensor>,
        ctx: &RenderContext,
    ) -> BackgroundOutput {
        let num_samples = self.cfg.model.render.num_samples.background;
        let dists = tch::no_grad(|| sample_dists_background(far, num_samples, ctx.stratified));
        let points = points_from_dist(&rays.center, &rays.ray_unit, &dists);
        let rays_unit = rays.ray_unit.unsqueeze(-2).expand_as(&points);

        let (rgbs, densities) = field.forward(&points, &rays_unit, app_outside);
        let alphas = volume_rendering_alphas(&densities, &dists, None);
        BackgroundOutput { rgbs, dists, alphas }
    }
}
