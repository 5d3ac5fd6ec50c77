//! Closed-form fields. They stand in for trained networks in tests and in the CLI.

use neus_utils::tensor::{dot_last, norm_last};
use tch::{Device, Kind, Tensor};

use super::{BackgroundField, ColorField, GradientMode, SdfField, SdfOutput};

fn vec3(v: [f64; 3], device: Device) -> Tensor {
    Tensor::from_slice(&[v[0] as f32, v[1] as f32, v[2] as f32]).to_device(device)
}

/// A sphere, negative inside unless `inside_out` is set.
///
/// Features are the query point followed by its signed distance. The optional mask has
/// `mask_channels` channels that fall off with distance to the surface, sharper for higher channels.
#[derive(Debug, Clone)]
pub struct SphereSdf {
    center: [f64; 3],
    radius: f64,
    inside_out: bool,
    mask_channels: i64,
    mask_sharpness: f64,
    active_levels: i64,
    gradient_mode: GradientMode,
}

impl SphereSdf {
    pub fn new(center: [f64; 3], radius: f64) -> Self {
        Self {
            center,
            radius,
            inside_out: false,
            mask_channels: 0,
            mask_sharpness: 10.0,
            active_levels: 0,
            gradient_mode: GradientMode::Numerical { eps: 1e-3 },
        }
    }

    pub fn inside_out(mut self, inside_out: bool) -> Self {
        self.inside_out = inside_out;
        self
    }

    pub fn with_mask(mut self, channels: i64, sharpness: f64) -> Self {
        self.mask_channels = channels;
        self.mask_sharpness = sharpness;
        self
    }

    pub fn with_active_levels(mut self, levels: i64) -> Self {
        self.active_levels = levels;
        self
    }

    pub fn with_gradient_mode(mut self, mode: GradientMode) -> Self {
        self.gradient_mode = mode;
        self
    }

    fn signed_distance(&self, points: &Tensor) -> Tensor {
        let center = vec3(self.center, points.device()).to_kind(points.kind());
        let sdf = norm_last(&(points - center)) - self.radius;
        if self.inside_out {
            -sdf
        } else {
            sdf
        }
    }
}

impl SdfField for SphereSdf {
    fn forward(&self, points: &Tensor) -> SdfOutput {
        let sdf = self.signed_distance(points);
        let feats = Tensor::cat(&[points.shallow_clone(), sdf.shallow_clone()], -1);
        let mask = (self.mask_channels > 0).then(|| {
            let levels = (Tensor::arange(self.mask_channels, (Kind::Float, points.device())) + 1.0)
                / self.mask_channels as f64;
            (-(sdf.abs() * self.mask_sharpness) * levels).exp()
        });
        SdfOutput { sdf, feats, mask }
    }

    fn sdf(&self, points: &Tensor) -> Tensor {
        self.signed_distance(points)
    }

    fn gradient_mode(&self) -> GradientMode {
        self.gradient_mode
    }

    fn active_levels(&self) -> i64 {
        self.active_levels
    }

    fn mask_channels(&self) -> i64 {
        self.mask_channels
    }
}

/// The same signed distance everywhere: a scene without a surface.
#[derive(Debug, Clone, Copy)]
pub struct ConstantSdf {
    pub value: f64,
}

impl SdfField for ConstantSdf {
    fn forward(&self, points: &Tensor) -> SdfOutput {
        let sdf = points.narrow(-1, 0, 1).full_like(self.value);
        let feats = sdf.shallow_clone();
        SdfOutput { sdf, feats, mask: None }
    }
}

/// Lambertian shading lit from the camera: `albedo * (ambient + (1 - ambient) * max(0, -n.v))`.
#[derive(Debug, Clone, Copy)]
pub struct NormalShadedColor {
    pub albedo: [f64; 3],
    pub ambient: f64,
}

impl ColorField for NormalShadedColor {
    fn forward(&self, _points: &Tensor, normals: &Tensor, view_dirs: &Tensor, _feats: &Tensor, _app: Option<&Tensor>) -> Tensor {
        let lambert = (-dot_last(normals, view_dirs, true)).relu() * (1.0 - self.ambient) + self.ambient;
        lambert * vec3(self.albedo, normals.device())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConstantColor {
    pub rgb: [f64; 3],
}

impl ColorField for ConstantColor {
    fn forward(&self, points: &Tensor, _normals: &Tensor, _view_dirs: &Tensor, _feats: &Tensor, _app: Option<&Tensor>) -> Tensor {
        vec3(self.rgb, points.device()).expand_as(points).contiguous()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConstantBackground {
    pub rgb: [f64; 3],
    pub density: f64,
}

impl BackgroundField for ConstantBackground {
    fn forward(&self, points: &Tensor, _view_dirs: &Tensor, _app: Option<&Tensor>) -> (Tensor, Tensor) {
        let rgb = vec3(self.rgb, points.device()).expand_as(points).contiguous();
        let density = points.narrow(-1, 0, 1).full_like(self.density);
        (rgb, density)
    }
}
