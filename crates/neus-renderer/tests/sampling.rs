use neus_core::config::NumSamples;
use neus_core::fields::analytic::SphereSdf;
use neus_renderer::bounds::get_dist_bounds;
use neus_renderer::sampler::{sample_dists, sample_dists_all};
use tch::{Kind, Tensor};

// Three rays from z = -3 towards the origin, slightly fanned out
fn rays() -> (Tensor, Tensor) {
    let center = Tensor::from_slice(&[0.0f32, 0.0, -3.0]).view([1, 1, 3]).expand(&[1, 3, 3], false).contiguous();
    let ray_unit = Tensor::from_slice(&[0.0f32, 0.0, 1.0, 0.02, 0.0, 0.9998, 0.0, -0.03, 0.99955]).view([1, 3, 3]);
    (center, ray_unit)
}

fn count_within(dists: &Tensor, low: f64, high: f64) -> i64 {
    (dists.ge(low).logical_and(&dists.le(high))).sum(Kind::Int64).int64_value(&[])
}

#[test]
fn test_no_hierarchy_returns_coarse_samples() {
    let (center, ray_unit) = rays();
    let bounds = get_dist_bounds(&center, &ray_unit);
    let sphere = SphereSdf::new([0.0, 0.0, 0.0], 0.5);
    let num_samples = NumSamples { coarse: 16, fine: 8, background: 8 };

    let dists = sample_dists_all(&sphere, &center, &ray_unit, &bounds.near, &bounds.far, &num_samples, 0, false);
    let coarse = sample_dists(&bounds.near, &bounds.far, 16, false);
    assert_eq!(dists.size(), &[1, 3, 16, 1]);
    assert!(dists.allclose(&coarse, 1e-6, 1e-6, false));
}

#[test]
fn test_hierarchical_samples_gather_at_the_surface() {
    let (center, ray_unit) = rays();
    let bounds = get_dist_bounds(&center, &ray_unit);
    let sphere = SphereSdf::new([0.0, 0.0, 0.0], 0.5);
    let num_samples = NumSamples { coarse: 16, fine: 16, background: 8 };

    let dists = sample_dists_all(&sphere, &center, &ray_unit, &bounds.near, &bounds.far, &num_samples, 2, true);
    assert_eq!(dists.size(), &[1, 3, 48, 1]);

    // sorted along every ray and inside the bounds
    let steps = dists.narrow(2, 1, 47) - dists.narrow(2, 0, 47);
    assert!(steps.min().double_value(&[]) >= 0.0);
    let near = bounds.near.unsqueeze(-1);
    let far = bounds.far.unsqueeze(-1);
    assert_eq!(dists.lt_tensor(&near).sum(Kind::Int64).int64_value(&[]), 0);
    assert_eq!(dists.gt_tensor(&far).sum(Kind::Int64).int64_value(&[]), 0);

    // the straight ray enters the sphere at 2.5; uniform samples put about 3 of 48 near it
    let straight = dists.narrow(1, 0, 1);
    let near_surface = count_within(&straight, 2.25, 2.75);
    assert!(near_surface >= 20, "only {near_surface} samples near the surface");
    assert!(!dists.requires_grad());
}
