//! FCN-8s semantic segmentation for road scenes in pure Rust.
//!
//! This crate reuses a pretrained classification backbone as a feature
//! encoder and trains a fully convolutional decoder that upsamples coarse
//! feature maps back to input resolution, fusing multi-scale encoder
//! features via additive skip connections. Every pixel of a road-scene
//! image is classified (road / not-road by default).
//!
//! - [`encoder`] - the pretrained VGG16 backbone behind the [`encoder::Encoder`] trait
//! - [`decoder`] - trainable upsampling/fusion layers producing class scores
//! - [`objective`] - softmax cross-entropy loss plus Adam update step
//! - [`trainer`] - epoch/batch loop with per-epoch loss reporting
//! - [`data`] - KITTI road batch source
//! - [`inference`] - overlay visualization sink
//!
//! # Example
//!
//! ```no_run
//! use roadseg_rs::prelude::*;
//! use candle_core::Device;
//!
//! let device = Device::Cpu;
//! let config = FcnConfig::kitti();
//! let encoder = VggEncoder::load("data/vgg", &EncoderConfig::vgg16(), &device).unwrap();
//! let mut trainer = Trainer::new(&encoder.feature_dims(), &config, &device).unwrap();
//!
//! let mut batches = RoadDataset::new(
//!     "data/data_road/training",
//!     config.image_shape(),
//!     config.batch_size,
//!     config.seed,
//!     &device,
//! )
//! .unwrap();
//! let reports = trainer.train(&encoder, &mut batches).unwrap();
//! println!("final epoch loss: {:.3}", reports.last().unwrap().total_loss);
//! ```

pub mod config;
pub mod data;
pub mod decoder;
pub mod device;
pub mod encoder;
pub mod error;
pub mod inference;
pub mod objective;
pub mod trainer;

pub use config::FcnConfig;
pub use data::{BatchSource, InMemorySource, RoadDataset, SegBatch};
pub use decoder::FcnDecoder;
pub use device::best_device;
pub use encoder::{Encoder, EncoderConfig, EncoderFeatures, FeatureDims, VggEncoder};
pub use error::{SegError, SegResult};
pub use inference::save_inference_samples;
pub use objective::Objective;
pub use trainer::{EpochReport, LossMeter, Trainer};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::FcnConfig;
    pub use crate::data::{BatchSource, InMemorySource, RoadDataset, SegBatch};
    pub use crate::decoder::FcnDecoder;
    pub use crate::device::best_device;
    pub use crate::encoder::{Encoder, EncoderConfig, EncoderFeatures, FeatureDims, VggEncoder};
    pub use crate::error::{SegError, SegResult};
    pub use crate::inference::save_inference_samples;
    pub use crate::trainer::{EpochReport, Trainer};
}
