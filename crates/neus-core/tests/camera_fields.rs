use neus_core::camera::{intrinsics, look_at_pose, points_from_dist, Camera, CameraView, PinholeCamera, RayBundle};
use neus_core::fields::analytic::SphereSdf;
use neus_core::fields::SdfField;
use tch::{Device, Kind, Tensor};

// Orbit views around the origin, batched along dimension 0
fn orbit_view(image_size: [i64; 2], radius: f64, angles: &[f64]) -> CameraView {
    let poses: Vec<Tensor> = angles
        .iter()
        .map(|a| look_at_pose([radius * a.cos(), radius * a.sin(), 0.5], [0.0, 0.0, 0.0], [0.0, 0.0, 1.0]))
        .collect();
    let intr = intrinsics(image_size[1] as f64, image_size).unsqueeze(0).expand(&[angles.len() as i64, 3, 3], false);
    CameraView::new(Tensor::stack(&poses, 0), intr.contiguous(), image_size)
}

#[test]
fn test_orbit_center_ray_hits_sphere_surface() {
    let view = orbit_view([9, 9], 3.0, &[0.0, 1.3, 2.9]);
    let (center, ray) = PinholeCamera.center_and_ray(&view);
    let rays = RayBundle::new(center, ray, None);
    assert_eq!(rays.batch_size(), 3);
    assert_eq!(rays.num_rays(), 81);

    // every camera sits at distance sqrt(9 + 0.25) from the origin
    let dist = rays.center.narrow(1, 0, 1).square().sum_dim_intlist([-1i64].as_slice(), false, Kind::Float).sqrt();
    assert!(dist.allclose(&dist.full_like((9.25f64).sqrt()), 1e-4, 1e-4, false));

    // march the middle ray to the sphere: it hits at |eye| - 1
    let mid_center = rays.center.narrow(1, 40, 1);
    let mid_dir = rays.ray_unit.narrow(1, 40, 1);
    let hit = Tensor::full(&[3, 1, 1, 1], (9.25f64).sqrt() - 1.0, (Kind::Float, Device::Cpu));
    let points = points_from_dist(&mid_center, &mid_dir, &hit);
    let sdf = SphereSdf::new([0.0, 0.0, 0.0], 1.0).sdf(&points);
    assert!(sdf.abs().max().double_value(&[]) < 1e-4);
}

#[test]
fn test_supersampled_rays_follow_their_pixels() {
    let view = orbit_view([6, 8], 2.5, &[0.4]);
    let (_, ray) = PinholeCamera.center_and_ray(&view);
    let ray_idx = Tensor::from_slice(&[0i64, 13, 47]).view([1, 3]);
    let (_, ray_ss) = PinholeCamera.center_and_ray_supersampled(&view, &ray_idx, 4);
    assert_eq!(ray_ss.size(), &[1, 12, 3]);

    // a sub-pixel ray stays within half a pixel of the pixel center ray, measured in the image plane
    let centers = ray
        .index_select(1, &ray_idx.view([-1]))
        .unsqueeze(2)
        .expand(&[1, 3, 4, 3], false)
        .reshape(&[1, 12, 3]);
    let diff = (&ray_ss - &centers).abs().max().double_value(&[]);
    let pixel = 1.0 / 8.0;
    assert!(diff <= pixel * 0.5 * 3f64.sqrt() + 1e-5, "diff = {diff}");
}
