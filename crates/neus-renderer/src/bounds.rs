use neus_utils::tensor::{dot_last, validate_tensor};
use tch::Tensor;

/// Sampling range of every ray inside the bounding sphere, `[B,R,1]` each.
#[derive(Debug)]
pub struct DistanceBounds {
    pub near: Tensor,
    pub far: Tensor,
    /// Rays that never enter the sphere. Their bounds are the `(1.0, 1.2)` placeholder.
    pub outside: Tensor,
}

/// Near distance assigned to rays that miss the bounding sphere.
pub const OUTSIDE_NEAR: f64 = 1.0;
/// Far distance assigned to rays that miss the bounding sphere.
pub const OUTSIDE_FAR: f64 = 1.2;

/// Both roots of the ray/sphere intersection around the origin.
///
/// # Arguments
/// * `center` - Ray origins `[B,R,3]`
/// * `ray_unit` - Unit ray directions `[B,R,3]`
/// * `radius` - Sphere radius
///
/// # Returns
/// * `(Tensor, Tensor, Tensor)` - Near and far roots and the miss flag, `[B,R,1]` each.
///   Roots of missing rays are meaningless but finite.
pub fn intersect_with_sphere(center: &Tensor, ray_unit: &Tensor, radius: f64) -> (Tensor, Tensor, Tensor) {
    let ctc = dot_last(center, center, true);
    let ctv = dot_last(center, ray_unit, true);
    let discriminant = ctv.square() - (ctc - radius * radius);
    let outside = discriminant.lt(0.0);
    let root = discriminant.clamp_min(0.0).sqrt();
    let near = ctv.neg() - &root;
    let far = -ctv + root;
    (near, far, outside)
}

/// Resolves near/far sampling bounds against the unit sphere.
///
/// `near` is never negative, so rays starting inside the sphere sample from their origin.
pub fn get_dist_bounds(center: &Tensor, ray_unit: &Tensor) -> DistanceBounds {
    validate_tensor(center, &[-1, -1, 3], "center");
    validate_tensor(ray_unit, &center.size(), "ray_unit");

    tch::no_grad(|| {
        let (near, far, outside) = intersect_with_sphere(center, ray_unit, 1.0);
        let near = near.clamp_min(0.0).masked_fill(&outside, OUTSIDE_NEAR);
        let far = far.masked_fill(&outside, OUTSIDE_FAR);
        DistanceBounds { near, far, outside }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{Device, Kind};

    fn rays(values: &[f32]) -> Tensor {
        Tensor::from_slice(values).view([1, -1, 3])
    }

    #[test]
    fn test_bounds_of_hitting_and_missing_rays() {
        let center = rays(&[0.0, 0.0, -3.0, 0.0, 2.0, -3.0, 0.0, 0.0, 0.0]);
        let ray_unit = rays(&[0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0]);
        let bounds = get_dist_bounds(&center, &ray_unit);

        assert_eq!(bounds.near.size(), &[1, 3, 1]);
        // straight through the origin
        assert!((bounds.near.double_value(&[0, 0, 0]) - 2.0).abs() < 1e-6);
        assert!((bounds.far.double_value(&[0, 0, 0]) - 4.0).abs() < 1e-6);
        assert_eq!(bounds.outside.int64_value(&[0, 0, 0]), 0);

        // passes the sphere at distance 2
        assert_eq!(bounds.outside.int64_value(&[0, 1, 0]), 1);
        assert_eq!(bounds.near.double_value(&[0, 1, 0]), OUTSIDE_NEAR);
        assert!((bounds.far.double_value(&[0, 1, 0]) - OUTSIDE_FAR).abs() < 1e-6);

        // starts at the center: near is clamped to 0
        assert_eq!(bounds.near.double_value(&[0, 2, 0]), 0.0);
        assert!((bounds.far.double_value(&[0, 2, 0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_bounds_never_nan() {
        let center = Tensor::randn(&[2, 64, 3], (Kind::Float, Device::Cpu)) * 3.0;
        let ray_unit = neus_utils::tensor::normalize(&Tensor::randn(&[2, 64, 3], (Kind::Float, Device::Cpu)));
        let bounds = get_dist_bounds(&center, &ray_unit);
        assert_eq!(bounds.near.isnan().any().int64_value(&[]), 0);
        assert_eq!(bounds.far.isnan().any().int64_value(&[]), 0);
        assert!(bounds.near.min().double_value(&[]) >= 0.0);
        assert!(!bounds.near.requires_grad());
    }
}
