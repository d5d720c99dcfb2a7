//! Pretrained feature encoder for the FCN.
//!
//! The decoder only depends on the [`Encoder`] trait: three feature maps at
//! fixed strides plus their channel depths. The concrete [`VggEncoder`]
//! reproduces the VGG16-FCN topology (five conv blocks, then fully-connected
//! layers recast as convolutions) and can load exported weights from a
//! directory of safetensors files.

use std::path::Path;

use candle_core::{DType, Device, Tensor};
use candle_nn::{conv2d, ops, Conv2d, Conv2dConfig, Module, VarBuilder, VarMap};

use crate::error::{SegError, SegResult};

/// Downsampling factor of the early (shallowest used) feature map.
pub const EARLY_STRIDE: usize = 8;
/// Downsampling factor of the mid feature map.
pub const MID_STRIDE: usize = 16;
/// Downsampling factor of the deep feature map.
pub const DEEP_STRIDE: usize = 32;

/// Channel depths of the three encoder outputs consumed by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureDims {
    /// Channels of the stride-8 feature map
    pub early: usize,
    /// Channels of the stride-16 feature map
    pub mid: usize,
    /// Channels of the stride-32 feature map
    pub deep: usize,
}

/// The three intermediate feature maps the decoder fuses, NCHW.
#[derive(Debug, Clone)]
pub struct EncoderFeatures {
    /// Stride 8 relative to the input (highest resolution, shallow semantics)
    pub early: Tensor,
    /// Stride 16
    pub mid: Tensor,
    /// Stride 32 (lowest resolution, richest semantics)
    pub deep: Tensor,
}

/// A frozen/fine-tuned feature extractor exposing multi-scale outputs.
///
/// Injected into the training loop as a collaborator; the decoder never
/// needs the encoder's internal structure, only these output contracts.
pub trait Encoder {
    /// Run the encoder over a batch of images `(N, 3, H, W)` and return the
    /// three feature maps. `keep_prob` drives dropout in the encoder head;
    /// pass `1.0` for inference.
    fn features(&self, images: &Tensor, keep_prob: f32) -> SegResult<EncoderFeatures>;

    /// Channel depths of the three feature maps.
    fn feature_dims(&self) -> FeatureDims;
}

/// Channel widths of the VGG encoder, configurable so unit tests can run a
/// miniature network with the same topology.
#[derive(Debug, Clone, Copy)]
pub struct EncoderConfig {
    /// Output channels of the five conv blocks
    pub block_widths: [usize; 5],
    /// Channels of the conv6/conv7 head (the recast fully-connected layers)
    pub head_width: usize,
}

impl EncoderConfig {
    /// Standard VGG16 widths.
    pub fn vgg16() -> Self {
        Self {
            block_widths: [64, 128, 256, 512, 512],
            head_width: 4096,
        }
    }

    /// Tiny widths for unit tests.
    pub fn test() -> Self {
        Self {
            block_widths: [4, 8, 16, 16, 16],
            head_width: 32,
        }
    }
}

/// Number of 3x3 convolutions in each VGG16 block.
const BLOCK_DEPTHS: [usize; 5] = [2, 2, 3, 3, 3];

/// VGG16 recast as a fully convolutional feature extractor.
///
/// Blocks 1-5 each end in a 2x max-pool, so block 3 output sits at stride 8,
/// block 4 at stride 16, and the conv7 head at stride 32.
pub struct VggEncoder {
    blocks: Vec<Vec<Conv2d>>,
    conv6: Conv2d,
    conv7: Conv2d,
    dims: FeatureDims,
}

impl VggEncoder {
    /// Build the encoder from a `VarBuilder`, either over freshly
    /// initialized variables or over loaded weights.
    pub fn new(config: &EncoderConfig, vb: VarBuilder) -> SegResult<Self> {
        let conv_cfg = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };

        let mut blocks = Vec::with_capacity(5);
        let mut in_c = 3;
        for (block_idx, (&width, &depth)) in config
            .block_widths
            .iter()
            .zip(BLOCK_DEPTHS.iter())
            .enumerate()
        {
            let mut convs = Vec::with_capacity(depth);
            for conv_idx in 0..depth {
                let name = format!("block{}.conv{}", block_idx + 1, conv_idx + 1);
                convs.push(conv2d(in_c, width, 3, conv_cfg, vb.pp(name))?);
                in_c = width;
            }
            blocks.push(convs);
        }

        // fc6/fc7 of the classifier recast as convolutions
        let conv6_cfg = Conv2dConfig {
            padding: 3,
            ..Default::default()
        };
        let conv6 = conv2d(
            config.block_widths[4],
            config.head_width,
            7,
            conv6_cfg,
            vb.pp("conv6"),
        )?;
        let conv7 = conv2d(
            config.head_width,
            config.head_width,
            1,
            Conv2dConfig::default(),
            vb.pp("conv7"),
        )?;

        Ok(Self {
            blocks,
            conv6,
            conv7,
            dims: FeatureDims {
                early: config.block_widths[2],
                mid: config.block_widths[3],
                deep: config.head_width,
            },
        })
    }

    /// Build the encoder with random initialization (testing/synthetic runs).
    pub fn random(config: &EncoderConfig, device: &Device) -> SegResult<Self> {
        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, device);
        Self::new(config, vb)
    }

    /// Load pretrained weights from a directory of safetensors files.
    ///
    /// Missing or malformed artifacts are fatal; there is no partial-load
    /// recovery.
    pub fn load(dir: impl AsRef<Path>, config: &EncoderConfig, device: &Device) -> SegResult<Self> {
        let dir = dir.as_ref();
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(|e| {
            SegError::encoder(format!("cannot read encoder dir {}: {}", dir.display(), e))
        })? {
            let path = entry
                .map_err(|e| SegError::encoder(format!("cannot read dir entry: {}", e)))?
                .path();
            if path.extension().map(|e| e == "safetensors").unwrap_or(false) {
                paths.push(path);
            }
        }
        if paths.is_empty() {
            return Err(SegError::encoder(format!(
                "no safetensors files found in {}",
                dir.display()
            )));
        }
        paths.sort();

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&paths, DType::F32, device)
                .map_err(|e| SegError::encoder(format!("failed to map encoder weights: {}", e)))?
        };
        Self::new(config, vb)
    }

    fn forward_block(&self, block: &[Conv2d], xs: &Tensor) -> SegResult<Tensor> {
        let mut xs = xs.clone();
        for conv in block {
            xs = conv.forward(&xs)?.relu()?;
        }
        Ok(xs.max_pool2d(2)?)
    }
}

impl Encoder for VggEncoder {
    fn features(&self, images: &Tensor, keep_prob: f32) -> SegResult<EncoderFeatures> {
        let (_, c, h, w) = images.dims4()?;
        if c != 3 {
            return Err(SegError::shape_mismatch(
                "(N, 3, H, W) input images",
                format!("{:?}", images.dims()),
            ));
        }
        if h % DEEP_STRIDE != 0 || w % DEEP_STRIDE != 0 {
            return Err(SegError::shape_mismatch(
                format!("spatial dims divisible by {}", DEEP_STRIDE),
                format!("{}x{}", h, w),
            ));
        }

        let p1 = self.forward_block(&self.blocks[0], images)?;
        let p2 = self.forward_block(&self.blocks[1], &p1)?;
        let early = self.forward_block(&self.blocks[2], &p2)?;
        let mid = self.forward_block(&self.blocks[3], &early)?;
        let p5 = self.forward_block(&self.blocks[4], &mid)?;

        let drop_p = 1.0 - keep_prob;
        let mut deep = self.conv6.forward(&p5)?.relu()?;
        if drop_p > 0.0 {
            deep = ops::dropout(&deep, drop_p)?;
        }
        deep = self.conv7.forward(&deep)?.relu()?;
        if drop_p > 0.0 {
            deep = ops::dropout(&deep, drop_p)?;
        }

        Ok(EncoderFeatures { early, mid, deep })
    }

    fn feature_dims(&self) -> FeatureDims {
        self.dims
    }
}
