use tch::Tensor;

/// A collection of per-ray tensors that can be produced tile by tile and stitched back together.
///
/// Every tensor in the collection carries rays on dimension 1 (`[B,R,...]`).
pub trait RayCollection: Sized {
    /// Detaches all tensors from the autograd graph.
    fn detach(&self) -> Self;

    /// Concatenates tiles along the ray dimension.
    ///
    /// Panics if `parts` is empty.
    fn cat_rays(parts: &[Self]) -> Self;
}

impl RayCollection for Tensor {
    fn detach(&self) -> Self {
        Tensor::detach(self)
    }

    fn cat_rays(parts: &[Self]) -> Self {
        assert!(!parts.is_empty(), "cannot concatenate an empty set of tiles");
        Tensor::cat(parts, 1)
    }
}

impl RayCollection for Option<Tensor> {
    fn detach(&self) -> Self {
        self.as_ref().map(|t| t.detach())
    }

    /// A quantity is present in the result only when every tile carries it.
    fn cat_rays(parts: &[Self]) -> Self {
        let tensors: Option<Vec<&Tensor>> = parts.iter().map(|p| p.as_ref()).collect();
        tensors.filter(|ts| !ts.is_empty()).map(|ts| Tensor::cat(&ts, 1))
    }
}

/// Collects one field out of every tile and concatenates it along the ray dimension.
pub fn cat_field<T, C, F>(tiles: &[T], field: F) -> C
where
    C: RayCollection,
    F: Fn(&T) -> C,
{
    let parts: Vec<C> = tiles.iter().map(field).collect();
    C::cat_rays(&parts)
}
