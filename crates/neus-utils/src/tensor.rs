use tch::{Kind, Tensor};

/// Checks the rank and sizes of `tensor`. A `-1` in `expected_dims` accepts any size for that dimension.
#[cfg(debug_assertions)]
pub fn validate_tensor(tensor: &Tensor, expected_dims: &[i64], name: &str) {
    let actual_dims = tensor.size();
    assert_eq!(
        actual_dims.len(),
        expected_dims.len(),
        "{} has {} dimensions, expected {}",
        name,
        actual_dims.len(),
        expected_dims.len()
    );

    for (i, (&actual, &expected)) in actual_dims.iter().zip(expected_dims.iter()).enumerate() {
        if expected < 0 {
            continue;
        }
        assert_eq!(
            actual,
            expected,
            "{} dimension {} is {}, expected {}",
            name,
            i,
            actual,
            expected
        );
    }
}

#[cfg(not(debug_assertions))]
pub fn validate_tensor(_tensor: &Tensor, _expected_dims: &[i64], _name: &str) {
    // No-op in release builds
}

#[cfg(debug_assertions)]
pub fn validate_tensor_type(tensor: &Tensor, expected_kind: Kind, name: &str) {
    assert_eq!(tensor.kind(), expected_kind, "{name}: Expected tensor kind `{:?}`, got `{:?}`", expected_kind, tensor.kind());
}

#[cfg(not(debug_assertions))]
pub fn validate_tensor_type(_tensor: &Tensor, _expected_kind: Kind, _name: &str) {
    // No-op in release builds
}

/// Euclidean norm over the last dimension, keeping it as a trailing singleton.
pub fn norm_last(x: &Tensor) -> Tensor {
    (x * x).sum_dim_intlist([-1i64].as_slice(), true, Kind::Float).sqrt()
}

/// Scales vectors along the last dimension to unit length.
///
/// Zero vectors stay zero: the norm is clamped to `1e-12` before dividing, the
/// same floor libtorch's `normalize` uses.
pub fn normalize(x: &Tensor) -> Tensor {
    x / norm_last(x).clamp_min(1e-12)
}

/// Dot product over the last dimension.
pub fn dot_last(a: &Tensor, b: &Tensor, keepdim: bool) -> Tensor {
    (a * b).sum_dim_intlist([-1i64].as_slice(), keepdim, Kind::Float)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::Device;

    #[test]
    fn test_normalize_unit_length() {
        let x = Tensor::from_slice(&[3.0f32, 0.0, 4.0, 0.0, 0.0, 0.0]).reshape(&[2, 3]);
        let n = normalize(&x);

        assert!((n.double_value(&[0, 0]) - 0.6).abs() < 1e-6);
        assert!((n.double_value(&[0, 2]) - 0.8).abs() < 1e-6);
        // zero vectors must not turn into NaN
        assert_eq!(n.double_value(&[1, 0]), 0.0);
        assert_eq!(n.isnan().any().int64_value(&[]), 0);
    }

    #[test]
    fn test_norm_and_dot_keep_leading_dims() {
        let a = Tensor::ones(&[2, 5, 3], (Kind::Float, Device::Cpu));
        assert_eq!(norm_last(&a).size(), &[2, 5, 1]);
        assert_eq!(dot_last(&a, &a, false).size(), &[2, 5]);
        assert!((dot_last(&a, &a, false).double_value(&[1, 4]) - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_validate_tensor_wildcard() {
        let a = Tensor::zeros(&[2, 7, 3], (Kind::Float, Device::Cpu));
        validate_tensor(&a, &[2, -1, 3], "a");
        validate_tensor_type(&a, Kind::Float, "a");
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "dimension 2 is 3, expected 4")]
    fn test_validate_tensor_mismatch() {
        let a = Tensor::zeros(&[2, 7, 3], (Kind::Float, Device::Cpu));
        validate_tensor(&a, &[2, -1, 4], "a");
    }
}
