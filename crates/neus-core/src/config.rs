use std::fs;
use std::path::Path;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NeusConfig {
    pub model: ModelConfig,
    pub data: DataConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    pub render: RenderConfig,
    pub object: ObjectConfig,
    pub background: BackgroundConfig,
    pub appear_embed: AppearEmbedConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    /// Rays per training step, and rays per tile when assembling full images.
    pub rand_rays: i64,
    pub num_samples: NumSamples,
    pub num_sample_hierarchy: i64,
    /// Jitter coarse samples inside their bins. Only honored while training.
    pub stratified: bool,
    pub supersampling: bool,
    pub supersamples: i64,
    /// Minimum number of active SDF resolution levels before supersampling kicks in.
    pub supersample_activate_level: i64,
    /// Mask channels whose maximum drives the supersampling distribution.
    pub supersample_channels: ChannelRange,
    pub render_mask: bool,
    pub mask_bands: Vec<MaskBand>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            rand_rays: 512,
            num_samples: NumSamples::default(),
            num_sample_hierarchy: 4,
            stratified: true,
            supersampling: false,
            supersamples: 512,
            supersample_activate_level: 8,
            supersample_channels: ChannelRange { start: 14, end: 16 },
            render_mask: false,
            mask_bands: vec![
                MaskBand::new("lf", 0, 4),
                MaskBand::new("lf2", 4, 8),
                MaskBand::new("mf", 8, 14),
                MaskBand::new("hf", 14, 16),
            ],
        }
    }
}

impl RenderConfig {
    /// Object samples per ray once every hierarchy round has been merged in.
    pub fn num_object_samples(&self) -> i64 {
        self.num_samples.coarse + self.num_samples.fine * self.num_sample_hierarchy
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NumSamples {
    pub coarse: i64,
    pub fine: i64,
    pub background: i64,
}

impl Default for NumSamples {
    fn default() -> Self {
        Self { coarse: 64, fine: 16, background: 32 }
    }
}

/// Half-open range of mask channels, `start..end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRange {
    pub start: i64,
    pub end: i64,
}

impl ChannelRange {
    pub fn len(&self) -> i64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskBand {
    pub name: String,
    #[serde(flatten)]
    pub channels: ChannelRange,
}

impl MaskBand {
    pub fn new(name: &str, start: i64, end: i64) -> Self {
        Self { name: name.to_string(), channels: ChannelRange { start, end } }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ObjectConfig {
    pub s_var: SVarConfig,
    /// The SDF is positive inside the surface.
    pub inside_out: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SVarConfig {
    pub init_val: f64,
    pub anneal_end: f64,
    /// Derive `s_var` from training progress instead of learning it.
    pub scheduled: bool,
}

impl Default for SVarConfig {
    fn default() -> Self {
        Self { init_val: 3.0, anneal_end: 0.1, scheduled: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackgroundConfig {
    pub enabled: bool,
    pub white: bool,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self { enabled: true, white: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppearEmbedConfig {
    pub enabled: bool,
    pub dim: i64,
}

impl Default for AppearEmbedConfig {
    fn default() -> Self {
        Self { enabled: false, dim: 8 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DataConfig {
    /// Number of training images. Required by appearance embeddings.
    pub num_images: Option<i64>,
    /// `[height, width]`
    pub train_image_size: [i64; 2],
    /// `[height, width]`
    pub val_image_size: [i64; 2],
}

impl Default for DataConfig {
    fn default() -> Self {
        Self { num_images: None, train_image_size: [480, 640], val_image_size: [240, 320] }
    }
}

impl NeusConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: NeusConfig = serde_json::from_str(json).context("failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_json_str(&json).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Checks the settings that do not depend on the fields the renderer is built with.
    pub fn validate(&self) -> Result<()> {
        let render = &self.model.render;
        ensure!(render.rand_rays > 0, "render.rand_rays must be positive, got {}", render.rand_rays);
        ensure!(render.num_samples.coarse > 0, "render.num_samples.coarse must be positive");
        ensure!(render.num_sample_hierarchy >= 0, "render.num_sample_hierarchy cannot be negative");
        if render.num_sample_hierarchy > 0 {
            ensure!(
                render.num_samples.coarse >= 2,
                "hierarchical sampling needs at least 2 coarse samples, got {}",
                render.num_samples.coarse
            );
            ensure!(render.num_samples.fine > 0, "hierarchical sampling needs render.num_samples.fine > 0");
        }
        if self.model.background.enabled {
            ensure!(render.num_samples.background > 0, "background rendering needs render.num_samples.background > 0");
        }
        ensure!(render.supersamples >= 0, "render.supersamples cannot be negative");

        let ranges = std::iter::once(("supersample_channels", &render.supersample_channels))
            .chain(render.mask_bands.iter().map(|b| (b.name.as_str(), &b.channels)));
        for (name, range) in ranges {
            ensure!(
                range.start >= 0 && !range.is_empty(),
                "channel range {name} must be a non-empty range of non-negative channels, got {}..{}",
                range.start,
                range.end
            );
        }

        if self.model.appear_embed.enabled {
            ensure!(self.data.num_images.is_some(), "appearance embeddings need data.num_images");
            ensure!(self.model.appear_embed.dim > 0, "model.appear_embed.dim must be positive");
        }

        for (name, [h, w]) in [("train", self.data.train_image_size), ("val", self.data.val_image_size)] {
            ensure!(h > 0 && w > 0, "data.{name}_image_size must be positive, got [{h}, {w}]");
        }
        Ok(())
    }

    /// Highest mask channel any configured consumer reads, or 0 when masks are unused.
    pub fn required_mask_channels(&self) -> i64 {
        let render = &self.model.render;
        let mut required = 0;
        if render.supersampling {
            required = required.max(render.supersample_channels.end);
        }
        if render.render_mask {
            required = render.mask_bands.iter().map(|b| b.channels.end).fold(required, i64::max);
        }
        required
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = NeusConfig::default();
        config.validate().unwrap();
        assert_eq!(config.model.render.num_object_samples(), 64 + 16 * 4);
        assert_eq!(config.required_mask_channels(), 0);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = NeusConfig::from_json_str(
            r#"{ "model": { "render": { "num_samples": { "coarse": 8 }, "supersampling": true },
                            "background": { "white": true } } }"#,
        )
        .unwrap();
        assert_eq!(config.model.render.num_samples.coarse, 8);
        assert_eq!(config.model.render.num_samples.fine, 16);
        assert!(config.model.background.enabled);
        assert!(config.model.background.white);
        assert_eq!(config.required_mask_channels(), 16);
    }

    #[test]
    fn test_json_round_trip_of_mask_bands() {
        let config = NeusConfig::default();
        let json = config.to_json_pretty().unwrap();
        let parsed = NeusConfig::from_json_str(&json).unwrap();
        assert_eq!(parsed.model.render.mask_bands, config.model.render.mask_bands);
    }

    #[test]
    fn test_rejects_invalid_settings() {
        let err = NeusConfig::from_json_str(r#"{ "model": { "appear_embed": { "enabled": true } } }"#).unwrap_err();
        assert!(format!("{err:#}").contains("num_images"));

        let err = NeusConfig::from_json_str(r#"{ "model": { "render": { "num_samples": { "fine": 0 } } } }"#);
        assert!(err.is_err());

        let err = NeusConfig::from_json_str(
            r#"{ "model": { "render": { "supersample_channels": { "start": 4, "end": 4 } } } }"#,
        );
        assert!(err.is_err());

        assert!(NeusConfig::from_json_str(r#"{ "model": { "unknown": 1 } }"#).is_err());
    }
}
