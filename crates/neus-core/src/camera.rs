use neus_utils::tensor::{normalize, validate_tensor, validate_tensor_type};
use tch::{Kind, Tensor};

/// Represents a batch of rays with centers, raw directions and unit directions.
///
/// All per-ray tensors are laid out `[B,R,...]`.
pub struct RayBundle {
    pub center: Tensor,
    /// Unnormalized direction; its length converts ray distance into camera depth.
    pub ray: Tensor,
    pub ray_unit: Tensor,
    /// Flat pixel index of every ray, `[B,R]`. Needed to place supersamples inside the right pixel.
    pub ray_idx: Option<Tensor>,
}

impl RayBundle {
    pub fn new(center: Tensor, ray: Tensor, ray_idx: Option<Tensor>) -> Self {
        validate_tensor(&center, &[-1, -1, 3], "center");
        validate_tensor(&ray, &[-1, -1, 3], "ray");
        let ray_unit = normalize(&ray);
        RayBundle { center, ray, ray_unit, ray_idx }
    }

    pub fn batch_size(&self) -> i64 {
        self.center.size()[0]
    }

    pub fn num_rays(&self) -> i64 {
        self.center.size()[1]
    }
}

/// The camera a batch of rays was generated from.
pub struct CameraView {
    /// World-to-camera `[R|t]`, `[B,3,4]`.
    pub pose: Tensor,
    /// Pinhole intrinsics, `[B,3,3]`.
    pub intr: Tensor,
    /// `[height, width]`.
    pub image_size: [i64; 2],
}

impl CameraView {
    pub fn new(pose: Tensor, intr: Tensor, image_size: [i64; 2]) -> Self {
        validate_tensor(&pose, &[-1, 3, 4], "pose");
        validate_tensor(&intr, &[pose.size()[0], 3, 3], "intr");
        CameraView { pose, intr, image_size }
    }

    pub fn num_pixels(&self) -> i64 {
        self.image_size[0] * self.image_size[1]
    }
}

pub trait Camera: Send {
    /// Generates one ray through the center of every pixel.
    ///
    /// # Returns
    /// * `(Tensor, Tensor)` - Ray centers and unnormalized directions, both `[B,H*W,3]`
    fn center_and_ray(&self, view: &CameraView) -> (Tensor, Tensor);

    /// Generates `num_samples` rays through random positions inside each pixel listed in `ray_idx`.
    ///
    /// # Arguments
    /// * `view` - The camera
    /// * `ray_idx` - Flat pixel indices `[B,S]`
    /// * `num_samples` - Sub-pixel rays per listed pixel
    ///
    /// # Returns
    /// * `(Tensor, Tensor)` - Ray centers and unnormalized directions, both `[B,S*num_samples,3]`
    fn center_and_ray_supersampled(&self, view: &CameraView, ray_idx: &Tensor, num_samples: i64) -> (Tensor, Tensor);
}

/// A pinhole camera with world-to-camera poses in the OpenCV convention (x right, y down, z forward).
#[derive(Debug, Default, Clone, Copy)]
pub struct PinholeCamera;

impl PinholeCamera {
    /// Unprojects pixel coordinates `[B,N,2]` into world-space rays.
    fn rays_from_pixels(&self, view: &CameraView, xy: &Tensor) -> (Tensor, Tensor) {
        let xy_hom = Tensor::cat(&[xy.shallow_clone(), xy.narrow(-1, 0, 1).ones_like()], -1);
        let grid_cam = xy_hom.matmul(&view.intr.inverse().transpose(-1, -2));

        let rot = view.pose.narrow(-1, 0, 3);
        let trans = view.pose.narrow(-1, 3, 1);
        // x_world = R^T (x_cam - t)
        let grid_world = (&grid_cam - trans.transpose(-1, -2)).matmul(&rot);
        let center = -rot.transpose(-1, -2).matmul(&trans).transpose(-1, -2);
        let center = center.expand_as(&grid_world).contiguous();
        let ray = &grid_world - &center;
        (center, ray)
    }
}

impl Camera for PinholeCamera {
    fn center_and_ray(&self, view: &CameraView) -> (Tensor, Tensor) {
        let [height, width] = view.image_size;
        let batch_size = view.pose.size()[0];
        let options = (Kind::Float, view.pose.device());

        let xy = tch::no_grad(|| {
            let y_range = Tensor::arange(height, options) + 0.5;
            let x_range = Tensor::arange(width, options) + 0.5;
            let xs = x_range.view([1, width]).expand(&[height, width], false);
            let ys = y_range.view([height, 1]).expand(&[height, width], false);
            Tensor::stack(&[xs, ys], -1)
                .reshape(&[1, height * width, 2])
                .expand(&[batch_size, height * width, 2], false)
        });

        self.rays_from_pixels(view, &xy)
    }

    fn center_and_ray_supersampled(&self, view: &CameraView, ray_idx: &Tensor, num_samples: i64) -> (Tensor, Tensor) {
        let width = view.image_size[1];
        let batch_size = ray_idx.size()[0];
        let options = (Kind::Float, view.pose.device());

        let xy = tch::no_grad(|| {
            let idx = ray_idx
                .to_kind(Kind::Float)
                .unsqueeze(-1)
                .expand(&[-1, -1, num_samples], false)
                .reshape(&[batch_size, -1]);
            let xs = idx.fmod(width as f64);
            let ys = (&idx - &xs) / width as f64;
            let num_rays = idx.size()[1];
            Tensor::stack(&[xs, ys], -1) + Tensor::rand(&[batch_size, num_rays, 2], options)
        });

        self.rays_from_pixels(view, &xy)
    }
}

/// Points along rays: `center + dist * ray_unit`.
///
/// # Arguments
/// * `center` - `[B,R,3]`
/// * `ray_unit` - `[B,R,3]`
/// * `dists` - `[B,R,N,1]`
///
/// # Returns
/// * `Tensor` - `[B,R,N,3]`
pub fn points_from_dist(center: &Tensor, ray_unit: &Tensor, dists: &Tensor) -> Tensor {
    center.unsqueeze(-2) + dists * ray_unit.unsqueeze(-2)
}

/// Picks the rays listed in `ray_idx` (`[B,R]`) out of a full-image tensor `[B,H*W,C]`.
pub fn slice_by_ray_idx(var: &Tensor, ray_idx: &Tensor) -> Tensor {
    validate_tensor_type(ray_idx, Kind::Int64, "ray_idx");
    let channels = var.size()[2];
    let index = ray_idx.unsqueeze(-1).expand(&[-1, -1, channels], false);
    var.gather(1, &index, false)
}

/// World-to-camera pose `[3,4]` for a camera at `eye` looking at `target`.
///
/// `up` only fixes the roll; the camera's y axis points away from it (image rows grow downwards).
pub fn look_at_pose(eye: [f64; 3], target: [f64; 3], up: [f64; 3]) -> Tensor {
    let sub = |a: [f64; 3], b: [f64; 3]| [a[0] - b[0], a[1] - b[1], a[2] - b[2]];
    let cross = |a: [f64; 3], b: [f64; 3]| {
        [a[1] * b[2] - a[2] * b[1], a[2] * b[0] - a[0] * b[2], a[0] * b[1] - a[1] * b[0]]
    };
    let unit = |a: [f64; 3]| {
        let n = (a[0] * a[0] + a[1] * a[1] + a[2] * a[2]).sqrt().max(1e-12);
        [a[0] / n, a[1] / n, a[2] / n]
    };
    let dot = |a: [f64; 3], b: [f64; 3]| a[0] * b[0] + a[1] * b[1] + a[2] * b[2];

    let z = unit(sub(target, eye));
    let x = unit(cross(z, up));
    let y = cross(z, x);
    let t = [-dot(x, eye), -dot(y, eye), -dot(z, eye)];

    let rows: Vec<f32> = [x, y, z]
        .iter()
        .zip(t.iter())
        .flat_map(|(r, t)| [r[0], r[1], r[2], *t])
        .map(|v| v as f32)
        .collect();
    Tensor::from_slice(&rows).reshape(&[3, 4])
}

/// Pinhole intrinsics `[3,3]` with the principal point at the image center.
pub fn intrinsics(focal: f64, image_size: [i64; 2]) -> Tensor {
    let [height, width] = image_size;
    let values = [
        focal, 0.0, width as f64 / 2.0,
        0.0, focal, height as f64 / 2.0,
        0.0, 0.0, 1.0,
    ];
    let values: Vec<f32> = values.iter().map(|v| *v as f32).collect();
    Tensor::from_slice(&values).reshape(&[3, 3])
}

#[cfg(test)]
mod tests {
    use super::*;
    use neus_utils::tensor::norm_last;

    fn identity_view(image_size: [i64; 2]) -> CameraView {
        let pose = Tensor::eye(3, (Kind::Float, tch::Device::Cpu));
        let pose = Tensor::cat(&[pose, Tensor::zeros(&[3, 1], (Kind::Float, tch::Device::Cpu))], 1).unsqueeze(0);
        // unit focal length and principal point at the origin: camera coords equal pixel coords
        let intr = Tensor::eye(3, (Kind::Float, tch::Device::Cpu)).unsqueeze(0);
        CameraView::new(pose, intr, image_size)
    }

    #[test]
    fn test_identity_camera_rays() {
        let view = identity_view([2, 3]);
        let (center, ray) = PinholeCamera.center_and_ray(&view);

        assert_eq!(center.size(), &[1, 6, 3]);
        assert_eq!(ray.size(), &[1, 6, 3]);
        assert!(center.allclose(&center.zeros_like(), 1e-6, 1e-6, false));
        // pixel (x=1, y=1) is index 4
        assert!((ray.double_value(&[0, 4, 0]) - 1.5).abs() < 1e-5);
        assert!((ray.double_value(&[0, 4, 1]) - 1.5).abs() < 1e-5);
        assert!((ray.double_value(&[0, 4, 2]) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_supersampled_rays_stay_inside_pixel() {
        let view = identity_view([4, 5]);
        let ray_idx = Tensor::from_slice(&[7i64, 19]).view([1, 2]);
        let (_, ray) = PinholeCamera.center_and_ray_supersampled(&view, &ray_idx, 3);
        assert_eq!(ray.size(), &[1, 6, 3]);

        for s in 0..3 {
            // index 7 is (x=2, y=1)
            let x = ray.double_value(&[0, s, 0]);
            let y = ray.double_value(&[0, s, 1]);
            assert!((2.0..3.0).contains(&x), "x = {x}");
            assert!((1.0..2.0).contains(&y), "y = {y}");
        }
        // index 19 is (x=4, y=3)
        let x = ray.double_value(&[0, 4, 0]);
        let y = ray.double_value(&[0, 4, 1]);
        assert!((4.0..5.0).contains(&x) && (3.0..4.0).contains(&y));
    }

    #[test]
    fn test_look_at_camera_center_and_axis() {
        let image_size = [5, 5];
        let pose = look_at_pose([0.0, 0.0, -3.0], [0.0, 0.0, 0.0], [0.0, 1.0, 0.0]).unsqueeze(0);
        let intr = intrinsics(10.0, image_size).unsqueeze(0);
        let view = CameraView::new(pose, intr, image_size);
        let (center, ray) = PinholeCamera.center_and_ray(&view);

        assert!((center.double_value(&[0, 0, 2]) + 3.0).abs() < 1e-5);
        // the middle pixel looks straight at the target
        let mid = normalize(&ray.narrow(1, 12, 1));
        assert!((mid.double_value(&[0, 0, 2]) - 1.0).abs() < 1e-5);
        assert!(norm_last(&ray).min().double_value(&[]) > 0.99);
    }

    #[test]
    fn test_points_and_slicing() {
        let center = Tensor::zeros(&[1, 2, 3], (Kind::Float, tch::Device::Cpu));
        let ray_unit = Tensor::from_slice(&[0.0f32, 0.0, 1.0, 1.0, 0.0, 0.0]).view([1, 2, 3]);
        let dists = Tensor::from_slice(&[1.0f32, 2.0, 3.0, 4.0]).view([1, 2, 2, 1]);
        let points = points_from_dist(&center, &ray_unit, &dists);
        assert_eq!(points.size(), &[1, 2, 2, 3]);
        assert_eq!(points.double_value(&[0, 0, 1, 2]), 2.0);
        assert_eq!(points.double_value(&[0, 1, 1, 0]), 4.0);

        let var = Tensor::arange(12, (Kind::Float, tch::Device::Cpu)).view([1, 4, 3]);
        let picked = slice_by_ray_idx(&var, &Tensor::from_slice(&[3i64, 1]).view([1, 2]));
        assert_eq!(picked.double_value(&[0, 0, 0]), 9.0);
        assert_eq!(picked.double_value(&[0, 1, 2]), 5.0);
    }
}
