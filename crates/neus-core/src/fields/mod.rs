pub mod analytic;

use tch::{Kind, Tensor};

/// What an SDF field returns for a batch of points `[...,3]`.
#[derive(Debug)]
pub struct SdfOutput {
    /// Signed distance `[...,1]`.
    pub sdf: Tensor,
    /// Geometry features handed to the color field `[...,F]`.
    pub feats: Tensor,
    /// Auxiliary per-point mask logits `[...,K]`, for fields that track local detail.
    pub mask: Option<Tensor>,
}

/// How [`SdfField::compute_gradients`] differentiates the field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GradientMode {
    /// Autograd through the field.
    Analytical,
    /// Central differences with step `eps`.
    Numerical { eps: f64 },
}

pub trait SdfField: Send {
    /// Evaluates signed distance, features and the optional mask at `points`.
    fn forward(&self, points: &Tensor) -> SdfOutput;

    /// Signed distance only. Used by the sampler, which never needs features.
    fn sdf(&self, points: &Tensor) -> Tensor {
        self.forward(points).sdf
    }

    fn gradient_mode(&self) -> GradientMode {
        GradientMode::Numerical { eps: 1e-3 }
    }

    /// Computes the SDF gradient and, when `training` is set, the diagonal of its Hessian.
    ///
    /// # Arguments
    /// * `points` - Query points `[...,3]`
    /// * `training` - Keep the derivative graph and produce second-order terms
    /// * `sdf` - Already evaluated SDF at `points`, reused by central differences
    ///
    /// # Returns
    /// * `(Tensor, Option<Tensor>)` - Gradient `[...,3]` and Hessian diagonal `[...,3]`
    fn compute_gradients(&self, points: &Tensor, training: bool, sdf: Option<&Tensor>) -> (Tensor, Option<Tensor>) {
        match self.gradient_mode() {
            GradientMode::Analytical => analytical_gradients(self, points, training),
            GradientMode::Numerical { eps } => numerical_gradients(self, points, training, sdf, eps),
        }
    }

    /// Number of resolution levels currently enabled. Fields without a coarse-to-fine schedule report 0.
    fn active_levels(&self) -> i64 {
        0
    }

    /// Channels in [`SdfOutput::mask`], 0 when the field produces none.
    fn mask_channels(&self) -> i64 {
        0
    }
}

pub trait ColorField: Send {
    /// Per-point color `[...,3]` from positions, normals, unit view directions, SDF features
    /// and the optional appearance code.
    fn forward(&self, points: &Tensor, normals: &Tensor, view_dirs: &Tensor, feats: &Tensor, app: Option<&Tensor>)
        -> Tensor;
}

pub trait BackgroundField: Send {
    /// Color `[...,3]` and density `[...,1]` of the scene outside the bounding sphere.
    fn forward(&self, points: &Tensor, view_dirs: &Tensor, app: Option<&Tensor>) -> (Tensor, Tensor);
}

/// Central differences along each axis. The Hessian diagonal is only produced when `training` is set.
pub fn numerical_gradients<F: SdfField + ?Sized>(
    field: &F,
    points: &Tensor,
    training: bool,
    sdf: Option<&Tensor>,
    eps: f64,
) -> (Tensor, Option<Tensor>) {
    let offsets = Tensor::from_slice(&[
        1.0f32, 0.0, 0.0, -1.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, -1.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, 0.0, -1.0,
    ])
    .view([6, 3])
    .to_device(points.device());
    let offsets = offsets * eps;

    // [...,6,3] -> [...,6]
    let shifted = points.unsqueeze(-2) + offsets;
    let sdf_shifted = field.sdf(&shifted).squeeze_dim(-1);
    let pos = sdf_shifted.slice(-1, 0, 6, 2);
    let neg = sdf_shifted.slice(-1, 1, 6, 2);

    let gradient = (&pos - &neg) / (2.0 * eps);
    let hessian = training.then(|| {
        let center = match sdf {
            Some(sdf) => sdf.shallow_clone(),
            None => field.sdf(points),
        };
        (&pos + &neg - center * 2.0) / (eps * eps)
    });
    (gradient, hessian)
}

/// Autograd gradient of the field. With `training` the graph is kept so the gradient
/// (and the Hessian diagonal) stays differentiable; otherwise the result is detached.
pub fn analytical_gradients<F: SdfField + ?Sized>(field: &F, points: &Tensor, training: bool) -> (Tensor, Option<Tensor>) {
    tch::with_grad(|| {
        let x = points.detach().set_requires_grad(true);
        let sdf = field.sdf(&x);
        let gradient = Tensor::run_backward(&[sdf.sum(Kind::Float)], &[&x], true, true).remove(0);

        if !training {
            return (gradient.detach(), None);
        }

        let diagonal: Vec<Tensor> = (0..3)
            .map(|axis| {
                let component = gradient.select(-1, axis).sum(Kind::Float);
                let second = Tensor::run_backward(&[component], &[&x], true, true).remove(0);
                second.select(-1, axis)
            })
            .collect();
        (gradient, Some(Tensor::stack(&diagonal, -1)))
    })
}
