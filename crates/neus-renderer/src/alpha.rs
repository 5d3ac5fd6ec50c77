//! SDF-to-opacity conversion (NeuS) and density-to-opacity conversion for the background.

use neus_utils::tensor::{dot_last, validate_tensor};
use tch::{Device, Kind, Tensor};

/// Stabilizer of the CDF ratio in both NeuS variants.
const CDF_EPS: f64 = 1e-5;
/// Length of the last interval when no far bound is given.
const FAR_SENTINEL: f64 = 1e10;

/// Differences between consecutive entries of the last dimension.
fn intervals(dists: &Tensor) -> Tensor {
    let n = dists.size().last().copied().unwrap_or(0) - 1;
    dists.narrow(-1, 1, n) - dists.narrow(-1, 0, n)
}

/// Steepness of the logistic density. `inv_s = exp(s_var)`.
#[derive(Debug)]
pub enum SVar {
    /// A trained scalar.
    Learned(Tensor),
    /// Derived from training progress on every call.
    Scheduled,
}

impl SVar {
    pub fn value(&self, progress: f64, device: Device) -> Tensor {
        match self {
            SVar::Learned(s_var) => s_var.shallow_clone(),
            SVar::Scheduled => Tensor::from(scheduled_s_var(progress) as f32).to_device(device),
        }
    }

    pub fn inv_s(&self, progress: f64, device: Device) -> Tensor {
        self.value(progress, device).exp()
    }
}

/// `12 + 5 / (1 - e^(2.5 p + 0.4))`, with `e` rounded to 2.7183.
///
/// Not clamped: the value keeps rising with progress.
pub fn scheduled_s_var(progress: f64) -> f64 {
    12.0 + 5.0 / (1.0 - 2.7183f64.powf(2.5 * progress + 0.4))
}

/// Annealed cosine between ray and SDF gradient.
///
/// At `anneal_ratio = 0` the cosine is softened to `-relu(0.5 - 0.5 cos)`, which keeps
/// back-facing samples contributing early in training; at 1 it is `-relu(-cos)`.
/// The result is never positive.
pub fn iter_cos(true_cos: &Tensor, anneal_ratio: f64) -> Tensor {
    let soft = (true_cos * -0.5 + 0.5).relu() * (1.0 - anneal_ratio);
    let hard = true_cos.neg().relu() * anneal_ratio;
    -(soft + hard)
}

fn neus_interval_alphas(mid_sdfs: &Tensor, cos: &Tensor, intervals: &Tensor, inv_s: &Tensor) -> Tensor {
    let half_step = cos * intervals * 0.5;
    let est_prev_sdf = mid_sdfs - &half_step;
    let est_next_sdf = mid_sdfs + &half_step;
    let prev_cdf = (est_prev_sdf * inv_s).sigmoid();
    let next_cdf = (est_next_sdf * inv_s).sigmoid();
    ((&prev_cdf - next_cdf) / (prev_cdf + CDF_EPS)).clamp(0.0, 1.0)
}

/// Per-sample NeuS opacity.
///
/// # Arguments
/// * `ray_unit` - Unit ray directions `[B,R,3]`
/// * `sdfs` - Signed distance at every sample `[B,R,N,1]`
/// * `gradients` - SDF gradients `[B,R,N,3]`
/// * `dists` - Sample distances, ascending `[B,R,N,1]`
/// * `dist_far` - Far bound `[B,R,1]` closing the last interval, `1e10` when absent
/// * `inv_s` - Logistic steepness (scalar tensor)
/// * `anneal_ratio` - Curvature annealing blend in `[0,1]`
///
/// # Returns
/// * `Tensor` - Alphas in `[0,1]`, `[B,R,N]`
pub fn neus_alphas(
    ray_unit: &Tensor,
    sdfs: &Tensor,
    gradients: &Tensor,
    dists: &Tensor,
    dist_far: Option<&Tensor>,
    inv_s: &Tensor,
    anneal_ratio: f64,
) -> Tensor {
    let size = dists.size();
    validate_tensor(sdfs, &size, "sdfs");
    validate_tensor(gradients, &[size[0], size[1], size[2], 3], "gradients");
    validate_tensor(ray_unit, &[size[0], size[1], 3], "ray_unit");

    let sdfs = sdfs.squeeze_dim(-1);
    let true_cos = dot_last(&ray_unit.unsqueeze(-2), gradients, false);
    let iter_cos = iter_cos(&true_cos, anneal_ratio);

    let dist_far = match dist_far {
        Some(far) => far.unsqueeze(-1),
        None => dists.narrow(2, 0, 1).full_like(FAR_SENTINEL),
    };
    let dists = Tensor::cat(&[dists.shallow_clone(), dist_far], 2).squeeze_dim(-1);
    neus_interval_alphas(&sdfs, &iter_cos, &intervals(&dists), inv_s)
}

/// Opacity of every interval between consecutive samples, from SDF values alone.
///
/// The cosine is the finite-difference slope of the SDF. Each interval takes the smaller of its own
/// slope and the previous interval's (0 for the first), so a sign flip of the slope never opens
/// an interval on its own.
///
/// # Arguments
/// * `dists` - Sample distances, ascending `[B,R,N,1]`
/// * `sdfs` - Signed distance at the samples `[B,R,N,1]`
/// * `inv_s` - Logistic steepness
///
/// # Returns
/// * `Tensor` - Interval alphas `[B,R,N-1]`
pub fn interval_alphas(dists: &Tensor, sdfs: &Tensor, inv_s: f64) -> Tensor {
    validate_tensor(sdfs, &dists.size(), "sdfs");
    let num_samples = dists.size()[2];
    let sdfs = sdfs.squeeze_dim(-1);
    let dists = dists.squeeze_dim(-1);

    let prev_sdfs = sdfs.narrow(-1, 0, num_samples - 1);
    let next_sdfs = sdfs.narrow(-1, 1, num_samples - 1);
    let prev_dists = dists.narrow(-1, 0, num_samples - 1);
    let next_dists = dists.narrow(-1, 1, num_samples - 1);

    let mid_sdfs = (&prev_sdfs + &next_sdfs) * 0.5;
    let intervals = &next_dists - &prev_dists;
    let cos = (&next_sdfs - &prev_sdfs) / (&intervals + 1e-5);
    let prev_cos = Tensor::cat(&[cos.narrow(-1, 0, 1).zeros_like(), cos.narrow(-1, 0, num_samples - 2)], -1);
    let cos = cos.minimum(&prev_cos);

    let inv_s = Tensor::from(inv_s as f32).to_device(dists.device());
    neus_interval_alphas(&mid_sdfs, &cos, &intervals, &inv_s)
}

/// Standard volume rendering opacity `1 - exp(-density * delta)`.
///
/// # Arguments
/// * `densities` - `[B,R,N,1]`
/// * `dists` - Sample distances `[B,R,N,1]`
/// * `dist_far` - Far bound `[B,R,1]` closing the last interval, `1e10` when absent
///
/// # Returns
/// * `Tensor` - `[B,R,N]`
pub fn volume_rendering_alphas(densities: &Tensor, dists: &Tensor, dist_far: Option<&Tensor>) -> Tensor {
    validate_tensor(densities, &dists.size(), "densities");
    let dist_far = match dist_far {
        Some(far) => far.unsqueeze(-1),
        None => dists.narrow(2, 0, 1).full_like(FAR_SENTINEL),
    };
    let dists = Tensor::cat(&[dists.shallow_clone(), dist_far], 2).squeeze_dim(-1);
    let sigma_delta = densities.squeeze_dim(-1) * intervals(&dists);
    -(sigma_delta.neg().exp()) + 1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(values: &[f32]) -> Tensor {
        Tensor::from_slice(values).view([1, 1, -1, 1])
    }

    #[test]
    fn test_iter_cos_annealing() {
        let true_cos = Tensor::from_slice(&[-1.0f32, 0.0, 1.0]);
        let early = iter_cos(&true_cos, 0.0);
        let late = iter_cos(&true_cos, 1.0);
        assert!(early.allclose(&Tensor::from_slice(&[-1.0f32, -0.5, 0.0]), 1e-6, 1e-6, false));
        assert!(late.allclose(&Tensor::from_slice(&[-1.0f32, 0.0, 0.0]), 1e-6, 1e-6, false));

        let halfway = iter_cos(&true_cos, 0.5);
        assert!((halfway.double_value(&[1]) + 0.25).abs() < 1e-6);
        assert!(halfway.max().double_value(&[]) <= 0.0);
    }

    #[test]
    fn test_scheduled_s_var() {
        assert!((scheduled_s_var(0.0) - (12.0 + 5.0 / (1.0 - 2.7183f64.powf(0.4)))).abs() < 1e-12);
        assert!(scheduled_s_var(0.0) < scheduled_s_var(0.5));
        assert!(scheduled_s_var(0.5) < scheduled_s_var(1.0));

        let s = SVar::Scheduled.value(1.0, Device::Cpu);
        assert!((s.double_value(&[]) - scheduled_s_var(1.0)).abs() < 1e-5);
        let learned = SVar::Learned(Tensor::from(0.5f32));
        assert!((learned.inv_s(0.3, Device::Cpu).double_value(&[]) - 0.5f64.exp()).abs() < 1e-5);
    }

    #[test]
    fn test_interval_alphas_concentrate_on_crossing() {
        let dists = column(&[0.0, 1.0, 2.0, 3.0]);
        let sdfs = column(&[5.0, 1.0, -1.0, -5.0]);
        let alphas = interval_alphas(&dists, &sdfs, 64.0);
        assert_eq!(alphas.size(), &[1, 1, 3]);
        assert!(alphas.double_value(&[0, 0, 1]) >= 0.9);
        assert!(alphas.double_value(&[0, 0, 0]) < 1e-3);
        assert!(alphas.double_value(&[0, 0, 2]) < 1e-3);
    }

    #[test]
    fn test_neus_alphas_concentrate_on_crossing() {
        let dists = column(&[0.0, 1.0, 2.0, 3.0]);
        let sdfs = column(&[2.0, 1.0, 0.0, -1.0]);
        let ray_unit = Tensor::from_slice(&[0.0f32, 0.0, 1.0]).view([1, 1, 3]);
        let gradients = Tensor::from_slice(&[0.0f32, 0.0, -1.0]).view([1, 1, 1, 3]).expand(&[1, 1, 4, 3], false);
        let inv_s = Tensor::from(64.0f32);
        let far = Tensor::from_slice(&[3.5f32]).view([1, 1, 1]);

        let alphas = neus_alphas(&ray_unit, &sdfs, &gradients, &dists, Some(&far), &inv_s, 1.0);
        assert_eq!(alphas.size(), &[1, 1, 4]);
        assert!(alphas.double_value(&[0, 0, 2]) >= 0.9);
        for i in [0, 1, 3] {
            assert!(alphas.double_value(&[0, 0, i]) < 1e-3, "alpha {i}");
        }
    }

    #[test]
    fn test_alphas_bounded_for_tiny_intervals() {
        let dists = (Tensor::rand(&[2, 8, 32, 1], (Kind::Float, Device::Cpu)) * 1e-7).cumsum(2, Kind::Float);
        let sdfs = Tensor::randn(&[2, 8, 32, 1], (Kind::Float, Device::Cpu));
        let gradients = Tensor::randn(&[2, 8, 32, 3], (Kind::Float, Device::Cpu));
        let ray_unit = neus_utils::tensor::normalize(&Tensor::randn(&[2, 8, 3], (Kind::Float, Device::Cpu)));
        let far = dists.select(2, 31) + 1e-7;

        for anneal_ratio in [0.0, 0.3, 1.0] {
            let alphas =
                neus_alphas(&ray_unit, &sdfs, &gradients, &dists, Some(&far), &Tensor::from(1000.0f32), anneal_ratio);
            assert_eq!(alphas.isnan().any().int64_value(&[]), 0);
            assert!(alphas.min().double_value(&[]) >= 0.0);
            assert!(alphas.max().double_value(&[]) <= 1.0);
        }
        let alphas = interval_alphas(&dists, &sdfs, 4096.0);
        assert!(alphas.min().double_value(&[]) >= 0.0);
        assert!(alphas.max().double_value(&[]) <= 1.0);
    }

    #[test]
    fn test_volume_rendering_alphas() {
        let dists = column(&[0.0, 0.5, 1.5]);
        let densities = column(&[2.0, 0.0, 1.0]);
        let alphas = volume_rendering_alphas(&densities, &dists, None);
        assert!((alphas.double_value(&[0, 0, 0]) - (1.0 - (-1.0f64).exp())).abs() < 1e-6);
        assert_eq!(alphas.double_value(&[0, 0, 1]), 0.0);
        // the last interval reaches the far sentinel
        assert!((alphas.double_value(&[0, 0, 2]) - 1.0).abs() < 1e-6);
    }
}
