//! Training configuration for the FCN segmentation network.
//!
//! All hyperparameters live in one explicit structure so runs can be swept
//! or reproduced without code edits.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{SegError, SegResult};

/// The encoder downsamples by 32x at its deepest stage; input dimensions
/// must be divisible by this for the skip connections to align exactly.
pub const ENCODER_STRIDE: usize = 32;

/// Configuration for building and training the FCN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FcnConfig {
    /// Number of per-pixel classes (road / not-road = 2)
    pub num_classes: usize,
    /// Input image height in pixels
    pub image_height: usize,
    /// Input image width in pixels
    pub image_width: usize,
    /// Number of training epochs
    pub epochs: usize,
    /// Mini-batch size
    pub batch_size: usize,
    /// Adam learning rate
    pub learning_rate: f64,
    /// Dropout keep-probability for the encoder head
    pub keep_prob: f32,
    /// L2 weight-regularization coefficient for decoder layers
    pub l2_coefficient: f64,
    /// Random seed for dataset shuffling
    pub seed: u64,
}

impl Default for FcnConfig {
    fn default() -> Self {
        Self::kitti()
    }
}

impl FcnConfig {
    /// Configuration for the KITTI road dataset (160x576 crops).
    pub fn kitti() -> Self {
        Self {
            num_classes: 2,
            image_height: 160,
            image_width: 576,
            epochs: 40,
            batch_size: 32,
            learning_rate: 1e-6,
            keep_prob: 0.6,
            l2_coefficient: 1e-3,
            seed: 42,
        }
    }

    /// Minimal configuration for unit tests.
    pub fn test() -> Self {
        Self {
            num_classes: 2,
            image_height: 32,
            image_width: 64,
            epochs: 1,
            batch_size: 1,
            learning_rate: 1e-2,
            keep_prob: 1.0,
            l2_coefficient: 1e-3,
            seed: 42,
        }
    }

    /// Set the number of classes
    pub fn with_num_classes(mut self, num_classes: usize) -> Self {
        self.num_classes = num_classes;
        self
    }

    /// Set the epoch count
    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    /// Set the batch size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the learning rate
    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Input shape as (height, width)
    pub fn image_shape(&self) -> (usize, usize) {
        (self.image_height, self.image_width)
    }

    /// Validate the configuration. Called before graph construction so
    /// bad settings fail eagerly rather than mid-run.
    pub fn validate(&self) -> SegResult<()> {
        if self.num_classes < 1 {
            return Err(SegError::invalid_config("num_classes must be >= 1"));
        }
        if self.epochs < 1 {
            return Err(SegError::invalid_config("epochs must be >= 1"));
        }
        if self.batch_size < 1 {
            return Err(SegError::invalid_config("batch_size must be >= 1"));
        }
        if self.learning_rate <= 0.0 {
            return Err(SegError::invalid_config("learning_rate must be positive"));
        }
        if !(self.keep_prob > 0.0 && self.keep_prob <= 1.0) {
            return Err(SegError::invalid_config("keep_prob must be in (0, 1]"));
        }
        if self.l2_coefficient < 0.0 {
            return Err(SegError::invalid_config("l2_coefficient must be >= 0"));
        }
        if self.image_height % ENCODER_STRIDE != 0 || self.image_width % ENCODER_STRIDE != 0 {
            return Err(SegError::invalid_config(format!(
                "image shape {}x{} must be divisible by the encoder stride {}",
                self.image_height, self.image_width, ENCODER_STRIDE
            )));
        }
        Ok(())
    }

    /// Load a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> SegResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save the configuration to a JSON file.
    pub fn to_json_file(&self, path: impl AsRef<Path>) -> SegResult<()> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_kitti_defaults() {
        let config = FcnConfig::kitti();
        assert_eq!(config.num_classes, 2);
        assert_eq!(config.image_shape(), (160, 576));
        assert_eq!(config.epochs, 40);
        assert_eq!(config.batch_size, 32);
        assert!((config.learning_rate - 1e-6).abs() < 1e-12);
        assert!((config.keep_prob - 0.6).abs() < 1e-6);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = FcnConfig::kitti()
            .with_num_classes(3)
            .with_epochs(5)
            .with_batch_size(4)
            .with_learning_rate(1e-4);
        assert_eq!(config.num_classes, 3);
        assert_eq!(config.epochs, 5);
        assert_eq!(config.batch_size, 4);
        assert!((config.learning_rate - 1e-4).abs() < 1e-12);
    }

    #[test]
    fn test_validate_rejects_zero_classes() {
        let config = FcnConfig::test().with_num_classes(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_misaligned_shape() {
        let mut config = FcnConfig::test();
        config.image_height = 33;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_keep_prob() {
        let mut config = FcnConfig::test();
        config.keep_prob = 0.0;
        assert!(config.validate().is_err());
        config.keep_prob = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_roundtrip() {
        let config = FcnConfig::kitti().with_epochs(7);
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        let json = serde_json::to_string(&config).unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file.flush().unwrap();

        let loaded = FcnConfig::from_json_file(file.path()).unwrap();
        assert_eq!(loaded.epochs, 7);
        assert_eq!(loaded.num_classes, config.num_classes);
    }
}
