use neus_utils::collection::{cat_field, RayCollection};
use tch::Tensor;

/// Per-sample results of the foreground pass.
#[derive(Debug)]
pub struct ObjectOutput {
    /// `[B,R,N,3]`
    pub rgbs: Tensor,
    /// `[B,R,N]`, with rays outside the bounding sphere overwritten by the outside value.
    pub sdfs: Tensor,
    /// `[B,R,N,1]`
    pub dists: Tensor,
    /// `[B,R,N]`
    pub alphas: Tensor,
    /// Object-only opacity `[B,R,1]`. Inference only.
    pub opacity: Option<Tensor>,
    /// Object-only composited SDF gradient `[B,R,3]`. Inference only.
    pub gradient: Option<Tensor>,
    /// `[B,R,N,3]`
    pub gradients: Tensor,
    /// Hessian diagonal `[B,R,N,3]`, when second-order terms were requested.
    pub hessians: Option<Tensor>,
    /// Mask logits `[B,R,N,K]`, for fields that produce them.
    pub mask: Option<Tensor>,
}

/// Per-sample results of the background pass.
#[derive(Debug)]
pub struct BackgroundOutput {
    /// `[B,R,Nb,3]`
    pub rgbs: Tensor,
    /// `[B,R,Nb,1]`
    pub dists: Tensor,
    /// `[B,R,Nb]`
    pub alphas: Tensor,
}

/// Composited result of a batch of rays.
///
/// Per-sample tensors hold object samples first, then background samples.
#[derive(Debug)]
pub struct RayOutput {
    /// `[B,R,3]`
    pub rgb: Tensor,
    /// `[B,R,1]`, inference only.
    pub opacity: Option<Tensor>,
    /// `[B,R,1]` bool
    pub outside: Tensor,
    /// `[B,R,No+Nb,1]`
    pub dists: Tensor,
    /// `[B,R,No+Nb,1]`
    pub weights: Tensor,
    /// `[B,R,3]`, inference only.
    pub gradient: Option<Tensor>,
    /// `[B,R,No,3]`
    pub gradients: Tensor,
    /// `[B,R,No,3]`
    pub hessians: Option<Tensor>,
    /// `[B,R,No,K]`
    pub mask: Option<Tensor>,
    /// Camera depth `[B,R,1]`. Filled in by the image assembler.
    pub depth: Option<Tensor>,
    /// Composited mask `[B,R,K]`. Filled in by the image assembler when mask rendering is on.
    pub mask_image: Option<Tensor>,
}

impl RayCollection for RayOutput {
    fn detach(&self) -> Self {
        RayOutput {
            rgb: self.rgb.detach(),
            opacity: RayCollection::detach(&self.opacity),
            outside: self.outside.detach(),
            dists: self.dists.detach(),
            weights: self.weights.detach(),
            gradient: RayCollection::detach(&self.gradient),
            gradients: self.gradients.detach(),
            hessians: RayCollection::detach(&self.hessians),
            mask: RayCollection::detach(&self.mask),
            depth: RayCollection::detach(&self.depth),
            mask_image: RayCollection::detach(&self.mask_image),
        }
    }

    fn cat_rays(parts: &[Self]) -> Self {
        let opt = |t: &Option<Tensor>| t.as_ref().map(|t| t.shallow_clone());
        RayOutput {
            rgb: cat_field(parts, |p| p.rgb.shallow_clone()),
            opacity: cat_field(parts, |p| opt(&p.opacity)),
            outside: cat_field(parts, |p| p.outside.shallow_clone()),
            dists: cat_field(parts, |p| p.dists.shallow_clone()),
            weights: cat_field(parts, |p| p.weights.shallow_clone()),
            gradient: cat_field(parts, |p| opt(&p.gradient)),
            gradients: cat_field(parts, |p| p.gradients.shallow_clone()),
            hessians: cat_field(parts, |p| opt(&p.hessians)),
            mask: cat_field(parts, |p| opt(&p.mask)),
            depth: cat_field(parts, |p| opt(&p.depth)),
            mask_image: cat_field(parts, |p| opt(&p.mask_image)),
        }
    }
}

/// Full-image render, with per-ray results laid out in pixel order.
#[derive(Debug)]
pub struct ImageOutput {
    pub rays: RayOutput,
    /// `[B,3,H,W]`
    pub rgb_map: Tensor,
    /// `[B,1,H,W]`
    pub opacity_map: Tensor,
    /// `[B,1,H,W]`
    pub depth_map: Tensor,
    /// Camera-space normals `[B,3,H,W]`.
    pub normal_map: Tensor,
    /// One `[B,1,H,W]` map per configured mask band, when mask rendering is on.
    pub mask_maps: Vec<(String, Tensor)>,
}

impl ImageOutput {
    /// All maps by name, in a fixed order.
    pub fn maps(&self) -> Vec<(String, &Tensor)> {
        let mut maps = vec![
            ("rgb_map".to_string(), &self.rgb_map),
            ("opacity_map".to_string(), &self.opacity_map),
            ("depth_map".to_string(), &self.depth_map),
            ("normal_map".to_string(), &self.normal_map),
        ];
        maps.extend(self.mask_maps.iter().map(|(name, map)| (format!("{name}_map"), map)));
        maps
    }
}
