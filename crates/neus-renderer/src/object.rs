use log::debug;
use neus_core::camera::{points_from_dist, RayBundle};
use neus_core::fields::SdfOutput;
use neus_utils::tensor::normalize;
use tch::Tensor;

use crate::alpha::neus_alphas;
use crate::bounds::DistanceBounds;
use crate::composite::{accumulate, alpha_compositing_weights, composite};
use crate::context::RenderContext;
use crate::output::ObjectOutput;
use crate::renderer::NeusRenderer;
use crate::sampler::sample_dists_all;

impl NeusRenderer {
    /// Foreground pass: samples inside the bounds, queries SDF and color, and converts SDF to NeuS alphas.
    ///
    /// Samples on rays that miss the bounding sphere get the outside SDF value, so they stay transparent
    /// whatever the field returns there.
    pub fn render_rays_object(
        &self,
        rays: &RayBundle,
        bounds: &DistanceBounds,
        app: Option<&Tensor>,
        ctx: &RenderContext,
    ) -> ObjectOutput {
        let render = &self.cfg.model.render;
        let dists = sample_dists_all(
            self.sdf.as_ref(),
            &rays.center,
            &rays.ray_unit,
            &bounds.near,
            &bounds.far,
            &render.num_samples,
            render.num_sample_hierarchy,
            ctx.stratified,
        );
        let points = points_from_dist(&rays.center, &rays.ray_unit, &dists);

        let SdfOutput { sdf, feats, mask } = self.sdf.forward(&points);
        let outside = bounds.outside.unsqueeze(-1).expand_as(&sdf);
        let sdfs = sdf.masked_fill(&outside, self.outside_val);

        let rays_unit = rays.ray_unit.unsqueeze(-2).expand_as(&points).contiguous();
        let (gradients, hessians) = self.sdf.compute_gradients(&points, ctx.needs_hessians(), Some(&sdfs));
        let normals = normalize(&gradients);
        let rgbs = self.rgb.forward(&points, &normals, &rays_unit, &feats, app);

        let inv_s = self.s_var.inv_s(ctx.progress, points.device());
        let anneal_ratio = ctx.anneal_ratio(self.cfg.model.object.s_var.anneal_end);
        let alphas = neus_alphas(&rays.ray_unit, &sdfs, &gradients, &dists, Some(&bounds.far), &inv_s, anneal_ratio);

        let (opacity, gradient) = if ctx.training {
            (None, None)
        } else {
            let weights = alpha_compositing_weights(&alphas);
            (Some(accumulate(&weights)), Some(composite(&gradients, &weights)))
        };

        debug!("Object samples: points {:?}, alphas {:?}", points.size(), alphas.size());

        ObjectOutput {
            rgbs,
            sdfs: sdfs.squeeze_dim(-1),
            dists,
            alphas,
            opacity,
            gradient,
            gradients,
            hessians,
            mask,
        }
    }
}
