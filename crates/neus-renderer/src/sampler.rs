use log::debug;
use neus_core::camera::points_from_dist;
use neus_core::config::NumSamples;
use neus_core::fields::SdfField;
use neus_utils::tensor::validate_tensor;
use tch::{Device, Kind, Tensor};

use crate::alpha::interval_alphas;
use crate::composite::alpha_compositing_weights;

/// Bin positions in `[0,1)`, one per interval: bin midpoints, or uniformly jittered inside each bin when
/// `stratified` is set.
///
/// # Returns
/// * `Tensor` - Strictly increasing fractions `[B,R,N,1]`
pub fn unit_samples(batch_size: i64, num_rays: i64, intvs: i64, stratified: bool, device: Device) -> Tensor {
    let options = (Kind::Float, device);
    let shape = [batch_size, num_rays, intvs, 1];
    let offsets = if stratified { Tensor::rand(&shape, options) } else { Tensor::full(&shape, 0.5, options) };
    (offsets + Tensor::arange(intvs, options).view([1, 1, intvs, 1])) / intvs as f64
}

/// Evenly spaced distances between `near` and `far` (`[B,R,1]` each).
///
/// # Returns
/// * `Tensor` - Ascending distances `[B,R,N,1]`
pub fn sample_dists(near: &Tensor, far: &Tensor, intvs: i64, stratified: bool) -> Tensor {
    let size = near.size();
    validate_tensor(far, &size, "far");
    let fractions = unit_samples(size[0], size[1], intvs, stratified, near.device());
    let near = near.unsqueeze(-1);
    let far = far.unsqueeze(-1);
    fractions * (&far - &near) + near
}

/// Background distances beyond `far`, spaced uniformly in inverse distance.
///
/// # Returns
/// * `Tensor` - Ascending distances `[B,R,N,1]`, starting just past `far`
pub fn sample_dists_background(far: &Tensor, intvs: i64, stratified: bool) -> Tensor {
    let size = far.size();
    // runs from 1 down to 0
    let inv_dists = -unit_samples(size[0], size[1], intvs, stratified, far.device()) + 1.0;
    far.unsqueeze(-1) / (inv_dists + 1e-5)
}

/// Draws `intvs_fine` distances from the piecewise-constant density given by `weights` over the bins.
///
/// Uses deterministic mid-grid uniforms, so the same weights always yield the same samples.
///
/// # Arguments
/// * `bins` - Bin edges `[B,R,N,1]`
/// * `weights` - Non-negative weight of every bin `[B,R,N-1]`
/// * `intvs_fine` - Number of samples to draw
///
/// # Returns
/// * `Tensor` - Samples `[B,R,Nf,1]`, ascending along each ray
pub fn sample_dists_from_pdf(bins: &Tensor, weights: &Tensor, intvs_fine: i64) -> Tensor {
    let size = bins.size();
    let (batch_size, num_rays, num_edges) = (size[0], size[1], size[2]);
    validate_tensor(weights, &[batch_size, num_rays, num_edges - 1], "weights");

    let pdf = weights / weights.abs().sum_dim_intlist([-1i64].as_slice(), true, Kind::Float).clamp_min(1e-12);
    let cdf = pdf.cumsum(-1, Kind::Float);
    let cdf = Tensor::cat(&[cdf.narrow(-1, 0, 1).zeros_like(), cdf], -1);

    let grid = Tensor::linspace(0.0, 1.0, intvs_fine + 1, (Kind::Float, bins.device()));
    let unif = (grid.narrow(0, 0, intvs_fine) + grid.narrow(0, 1, intvs_fine)) * 0.5;
    let unif = unif.view([1, 1, intvs_fine]).expand(&[batch_size, num_rays, intvs_fine], false);

    // right-sided bin search: how many cdf entries are <= u
    let idx = cdf
        .unsqueeze(-2)
        .le_tensor(&unif.unsqueeze(-1))
        .sum_dim_intlist([-1i64].as_slice(), false, Kind::Int64);
    let low = (&idx - 1i64).clamp_min(0);
    let high = idx.clamp_max(num_edges - 1);

    let bins = bins.squeeze_dim(-1);
    let dist_min = bins.gather(2, &low, false);
    let dist_max = bins.gather(2, &high, false);
    let cdf_low = cdf.gather(2, &low, false);
    let cdf_high = cdf.gather(2, &high, false);

    let t = (&unif - &cdf_low) / (cdf_high - &cdf_low + 1e-8);
    (&dist_min + t * (dist_max - &dist_min)).unsqueeze(-1)
}

/// One refinement round: interval alphas from the current SDF samples at steepness `inv_s`, turned into
/// compositing weights and resampled.
///
/// # Returns
/// * `Tensor` - New distances `[B,R,Nf,1]`
pub fn sample_dists_hierarchical(dists: &Tensor, sdfs: &Tensor, inv_s: f64, intvs_fine: i64) -> Tensor {
    let alphas = interval_alphas(dists, sdfs, inv_s);
    let weights = alpha_compositing_weights(&alphas).squeeze_dim(-1);
    sample_dists_from_pdf(dists, &weights, intvs_fine)
}

/// Coarse samples in `[near, far]` refined by `num_sample_hierarchy` rounds of SDF-driven importance sampling.
///
/// Round `h` uses steepness `64 * 2^h`. The running SDF values are re-ordered with the merge permutation so
/// that only new samples are queried; the last round skips the query.
///
/// # Arguments
/// * `sdf` - The field steering the refinement
/// * `center`, `ray_unit` - Rays `[B,R,3]`
/// * `near`, `far` - Bounds `[B,R,1]`
///
/// # Returns
/// * `Tensor` - Sorted distances `[B,R,coarse + fine * hierarchy,1]`
#[allow(clippy::too_many_arguments)]
pub fn sample_dists_all(
    sdf: &dyn SdfField,
    center: &Tensor,
    ray_unit: &Tensor,
    near: &Tensor,
    far: &Tensor,
    num_samples: &NumSamples,
    num_sample_hierarchy: i64,
    stratified: bool,
) -> Tensor {
    tch::no_grad(|| {
        let mut dists = sample_dists(near, far, num_samples.coarse, stratified);
        if num_sample_hierarchy <= 0 {
            return dists;
        }

        let mut sdfs = sdf.sdf(&points_from_dist(center, ray_unit, &dists));
        for h in 0..num_sample_hierarchy {
            let inv_s = 64.0 * 2f64.powi(h as i32);
            let dists_fine = sample_dists_hierarchical(&dists, &sdfs, inv_s, num_samples.fine);
            let (sorted, sort_idx) = Tensor::cat(&[&dists, &dists_fine], 2).sort(2, false);
            dists = sorted;
            if h != num_sample_hierarchy - 1 {
                let sdfs_fine = sdf.sdf(&points_from_dist(center, ray_unit, &dists_fine));
                sdfs = Tensor::cat(&[&sdfs, &sdfs_fine], 2).gather(2, &sort_idx, false);
            }
        }
        debug!("hierarchical samples: {:?}", dists.size());
        dists
    })
}
