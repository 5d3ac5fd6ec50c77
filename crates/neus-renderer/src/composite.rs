use neus_utils::tensor::validate_tensor;
use tch::{Kind, Tensor};

/// Front-to-back compositing weights `alpha_i * prod_{j<i} (1 - alpha_j)`.
///
/// # Arguments
/// * `alphas` - Per-sample opacity `[B,R,N]`
///
/// # Returns
/// * `Tensor` - Weights `[B,R,N,1]`
pub fn alpha_compositing_weights(alphas: &Tensor) -> Tensor {
    validate_tensor(alphas, &[-1, -1, -1], "alphas");
    let num_samples = alphas.size()[2];
    let alphas_front = Tensor::cat(&[alphas.narrow(2, 0, 1).zeros_like(), alphas.narrow(2, 0, num_samples - 1)], 2);
    let visibility = (-alphas_front + 1.0).cumprod(2, Kind::Float);
    (alphas * visibility).unsqueeze(-1)
}

/// Weighted sum of a per-sample quantity `[B,R,N,C]` over the samples of each ray, giving `[B,R,C]`.
pub fn composite(quantities: &Tensor, weights: &Tensor) -> Tensor {
    (quantities * weights).sum_dim_intlist([-2i64].as_slice(), false, Kind::Float)
}

/// Accumulated opacity `[B,R,1]`, i.e. the composite of a constant 1.
pub fn accumulate(weights: &Tensor) -> Tensor {
    weights.sum_dim_intlist([-2i64].as_slice(), false, Kind::Float)
}

/// Composites `rgb` over a white backdrop using whatever opacity the weights leave unclaimed.
pub fn over_white(rgb: &Tensor, weights: &Tensor) -> Tensor {
    rgb + (-accumulate(weights) + 1.0)
}
