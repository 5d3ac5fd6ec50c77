use tch::{TchError, Tensor};

/// `IterChunks` walks a set of parallel tensors in fixed-size chunks along one dimension.
/// Every tensor in the set is narrowed to the same range, so per-ray quantities
/// (centers, directions, pixel indices) stay aligned inside each chunk.
#[derive(Debug)]
pub struct IterChunks {
    xs: Vec<Tensor>,
    dim: i64,
    chunk_index: i64,
    chunk_size: i64,
    total_size: i64,
}

/// One chunk produced by [`IterChunks`].
#[derive(Debug)]
pub struct Chunk {
    pub xs: Vec<Tensor>,
}

impl IterChunks {
    /// Creates a new `IterChunks` instance.
    ///
    /// All tensors in `xs` must have the same size along `dim`.
    /// An error is returned if `xs` is empty, if `chunk_size` is not positive or if any tensor
    /// has a different size along `dim`.
    ///
    /// # Arguments
    ///
    /// * `xs` - The tensors to chunk.
    /// * `chunk_size` - The number of elements along `dim` per chunk.
    /// * `dim` - The dimension to chunk along.
    pub fn f_new(xs: &[Tensor], chunk_size: i64, dim: i64) -> Result<IterChunks, TchError> {
        if xs.is_empty() {
            return Err(TchError::Shape("no tensors to chunk".to_string()));
        }
        if chunk_size <= 0 {
            return Err(TchError::Shape(format!("chunk size must be positive, got {chunk_size}")));
        }

        let rank = xs[0].dim() as i64;
        let dim = if dim < 0 { dim + rank } else { dim };
        if dim < 0 || dim >= rank {
            return Err(TchError::Shape(format!("tensor of rank {rank} has no dimension {dim}")));
        }

        let total_size = xs[0].size()[dim as usize];
        for x in xs.iter() {
            let size = x.size();
            if size.get(dim as usize).copied() != Some(total_size) {
                return Err(TchError::Shape(format!(
                    "Inconsistent tensor sizes along dimension {dim}: expected {total_size}, got {size:?}"
                )));
            }
        }

        Ok(IterChunks {
            xs: xs.iter().map(|x| x.shallow_clone()).collect(),
            dim,
            chunk_index: 0,
            chunk_size,
            total_size,
        })
    }

    /// Number of chunks this iterator yields from the start, the last one possibly smaller.
    pub fn num_chunks(&self) -> i64 {
        (self.total_size + self.chunk_size - 1) / self.chunk_size
    }
}

impl Iterator for IterChunks {
    type Item = Chunk;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.chunk_index * self.chunk_size;
        let end = (start + self.chunk_size).min(self.total_size);
        let size = end - start;

        if size <= 0 {
            return None;
        }

        self.chunk_index += 1;
        let xs = self.xs.iter().map(|x| x.narrow(self.dim, start, size)).collect();

        Some(Chunk { xs })
    }
}
