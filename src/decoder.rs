//! FCN-8s decoder: upsample and fuse encoder features into per-pixel scores.
//!
//! Fixed topology. Each encoder feature map is projected to `num_classes`
//! channels by a 1x1 convolution; the deep map is progressively upsampled
//! (x2, x2, x8) by learned transposed convolutions, with the mid and early
//! projections added in at matching resolutions. Additive fusion keeps the
//! channel depth at `num_classes` throughout, and the upsampling factors
//! mirror the encoder's pooling exactly, so every fusion aligns without
//! cropping or padding correction.

use candle_core::Tensor;
use candle_nn::{
    conv2d, conv_transpose2d, Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig,
    Module, VarBuilder,
};

use crate::encoder::{EncoderFeatures, FeatureDims};
use crate::error::{SegError, SegResult};

/// Intensity rescale applied to the mid (stride-16) skip branch before its
/// 1x1 projection. Keeps the shallow activations from swamping the deep
/// score map early in training.
pub const MID_SKIP_SCALE: f64 = 1e-2;
/// Intensity rescale applied to the early (stride-8) skip branch. Applied
/// symmetrically with [`MID_SKIP_SCALE`].
pub const EARLY_SKIP_SCALE: f64 = 1e-4;

/// Trainable decoder producing a class-score map at input resolution.
pub struct FcnDecoder {
    score_deep: Conv2d,
    up2_deep: ConvTranspose2d,
    score_mid: Conv2d,
    up2_fused: ConvTranspose2d,
    score_early: Conv2d,
    up8: ConvTranspose2d,
    num_classes: usize,
}

impl FcnDecoder {
    /// Build the decoder layers over a `VarBuilder`.
    ///
    /// `dims` gives the channel depths of the encoder outputs; `num_classes`
    /// must be at least 1.
    pub fn new(dims: &FeatureDims, num_classes: usize, vb: VarBuilder) -> SegResult<Self> {
        if num_classes < 1 {
            return Err(SegError::invalid_config("num_classes must be >= 1"));
        }

        // kernel 4, stride 2, padding 1: doubles spatial size exactly
        let up2_cfg = ConvTranspose2dConfig {
            padding: 1,
            stride: 2,
            ..Default::default()
        };
        // kernel 16, stride 8, padding 4: multiplies spatial size by 8 exactly
        let up8_cfg = ConvTranspose2dConfig {
            padding: 4,
            stride: 8,
            ..Default::default()
        };
        let score_cfg = Conv2dConfig::default();

        let score_deep = conv2d(dims.deep, num_classes, 1, score_cfg, vb.pp("score_deep"))?;
        let up2_deep = conv_transpose2d(num_classes, num_classes, 4, up2_cfg, vb.pp("up2_deep"))?;
        let score_mid = conv2d(dims.mid, num_classes, 1, score_cfg, vb.pp("score_mid"))?;
        let up2_fused =
            conv_transpose2d(num_classes, num_classes, 4, up2_cfg, vb.pp("up2_fused"))?;
        let score_early = conv2d(dims.early, num_classes, 1, score_cfg, vb.pp("score_early"))?;
        let up8 = conv_transpose2d(num_classes, num_classes, 16, up8_cfg, vb.pp("up8"))?;

        Ok(Self {
            score_deep,
            up2_deep,
            score_mid,
            up2_fused,
            score_early,
            up8,
            num_classes,
        })
    }

    /// Number of output classes.
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Decode the encoder features into a class-score tensor at input
    /// resolution: `(N, num_classes, H, W)` where `(H, W)` is 8x the early
    /// feature map's spatial size.
    ///
    /// Both skip fusions require exact shape equality; a mismatch is a
    /// construction error, never a broadcast.
    pub fn forward(&self, features: &EncoderFeatures) -> SegResult<Tensor> {
        let xs = self.score_deep.forward(&features.deep)?;
        let xs = self.up2_deep.forward(&xs)?;

        let mid = (&features.mid * MID_SKIP_SCALE)?;
        let mid = self.score_mid.forward(&mid)?;
        check_fusion_shapes(&xs, &mid, "mid skip")?;
        let xs = (xs + mid)?;

        let xs = self.up2_fused.forward(&xs)?;

        let early = (&features.early * EARLY_SKIP_SCALE)?;
        let early = self.score_early.forward(&early)?;
        check_fusion_shapes(&xs, &early, "early skip")?;
        let xs = (xs + early)?;

        Ok(self.up8.forward(&xs)?)
    }

    /// L2 penalty over all decoder kernels, scaled by `coefficient`.
    ///
    /// Returned as an explicit scalar tensor so the objective can add it to
    /// the data loss; no hidden global accumulator.
    pub fn l2_penalty(&self, coefficient: f64) -> SegResult<Tensor> {
        let kernels = [
            self.score_deep.weight(),
            self.up2_deep.weight(),
            self.score_mid.weight(),
            self.up2_fused.weight(),
            self.score_early.weight(),
            self.up8.weight(),
        ];
        let mut total = kernels[0].sqr()?.sum_all()?;
        for kernel in &kernels[1..] {
            total = (total + kernel.sqr()?.sum_all()?)?;
        }
        Ok((total * coefficient)?)
    }
}

fn check_fusion_shapes(upsampled: &Tensor, skip: &Tensor, site: &str) -> SegResult<()> {
    if upsampled.dims() != skip.dims() {
        return Err(SegError::shape_mismatch(
            format!("{:?} at {} fusion", upsampled.dims(), site),
            format!("{:?}", skip.dims()),
        ));
    }
    Ok(())
}
