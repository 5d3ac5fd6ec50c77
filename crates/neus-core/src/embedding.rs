use anyhow::{ensure, Result};
use log::info;
use tch::nn::{self, Module};
use tch::Tensor;

/// Per-image appearance codes for the object and, optionally, the background.
#[derive(Debug)]
pub struct AppearanceEmbedding {
    object: nn::Embedding,
    background: Option<nn::Embedding>,
    dim: i64,
}

impl AppearanceEmbedding {
    pub fn new(p: &nn::Path, num_images: i64, dim: i64, with_background: bool) -> Result<Self> {
        ensure!(num_images > 0, "appearance embeddings need a positive image count, got {num_images}");
        ensure!(dim > 0, "appearance embedding dimension must be positive, got {dim}");

        let object = nn::embedding(p / "appear_embed", num_images, dim, Default::default());
        let background = with_background
            .then(|| nn::embedding(p / "appear_embed_outside", num_images, dim, Default::default()));
        info!(
            "Appearance embeddings: {num_images} images x {dim} channels{}",
            if with_background { ", with background" } else { "" }
        );
        Ok(Self { object, background, dim })
    }

    /// Looks up the codes of the images in `sample_idx` (`[B]`) and broadcasts them over rays and samples.
    ///
    /// # Returns
    /// * `(Tensor, Option<Tensor>)` - Object codes `[B,R,N,C]` and background codes `[B,R,Nb,C]`
    pub fn lookup(
        &self,
        sample_idx: &Tensor,
        num_rays: i64,
        num_samples: i64,
        num_background_samples: i64,
    ) -> (Tensor, Option<Tensor>) {
        let broadcast = |embedding: &nn::Embedding, n: i64| {
            let codes = embedding.forward(sample_idx);
            let batch_size = codes.size()[0];
            codes.view([batch_size, 1, 1, self.dim]).expand(&[batch_size, num_rays, n, self.dim], false)
        };
        let app = broadcast(&self.object, num_samples);
        let app_outside = self.background.as_ref().map(|e| broadcast(e, num_background_samples));
        (app, app_outside)
    }
}
