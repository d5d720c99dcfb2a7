//! Loss and optimizer for FCN training.
//!
//! Class scores and one-hot labels are flattened to `(pixels, classes)`,
//! reduced by softmax cross-entropy over all pixels, and combined with the
//! decoder's L2 penalty. The update operation is bias-corrected Adam over
//! the decoder's `VarMap`; weight decay stays at zero because regularization
//! is carried explicitly in the loss term.

use candle_core::{Tensor, D};
use candle_nn::{ops, AdamW, Optimizer, ParamsAdamW, VarMap};

use crate::error::{SegError, SegResult};

/// Flatten a `(N, C, H, W)` score or label tensor to `(N*H*W, C)`.
pub fn flatten_logits(scores: &Tensor, num_classes: usize) -> SegResult<Tensor> {
    let (_, c, _, _) = scores.dims4()?;
    if c != num_classes {
        return Err(SegError::shape_mismatch(
            format!("{} channels", num_classes),
            format!("{:?}", scores.dims()),
        ));
    }
    Ok(scores
        .permute((0, 2, 3, 1))?
        .contiguous()?
        .reshape(((), num_classes))?)
}

/// Mean softmax cross-entropy between per-pixel logits and one-hot labels,
/// both `(pixels, classes)`.
pub fn cross_entropy_with_logits(logits: &Tensor, labels: &Tensor) -> SegResult<Tensor> {
    if logits.dims() != labels.dims() {
        return Err(SegError::shape_mismatch(
            format!("{:?} labels", logits.dims()),
            format!("{:?}", labels.dims()),
        ));
    }
    let log_probs = ops::log_softmax(logits, D::Minus1)?;
    let per_pixel = (labels * &log_probs)?.sum(D::Minus1)?.neg()?;
    Ok(per_pixel.mean_all()?)
}

/// Full training loss: cross-entropy over all pixels plus the decoder's
/// regularization penalty.
pub fn segmentation_loss(
    scores: &Tensor,
    labels: &Tensor,
    num_classes: usize,
    l2_penalty: &Tensor,
) -> SegResult<Tensor> {
    let logits = flatten_logits(scores, num_classes)?;
    let targets = flatten_logits(labels, num_classes)?;
    let ce = cross_entropy_with_logits(&logits, &targets)?;
    Ok((ce + l2_penalty)?)
}

/// The parameter-update operation: one Adam step per batch over every
/// trainable variable in the decoder's parameter set.
pub struct Objective {
    optimizer: AdamW,
}

impl Objective {
    /// Build the optimizer over all variables of `var_map`.
    pub fn new(var_map: &VarMap, learning_rate: f64) -> SegResult<Self> {
        let params = ParamsAdamW {
            lr: learning_rate,
            weight_decay: 0.0,
            ..Default::default()
        };
        let optimizer = AdamW::new(var_map.all_vars(), params)?;
        Ok(Self { optimizer })
    }

    /// Backpropagate `loss` and apply one gradient step.
    pub fn step(&mut self, loss: &Tensor) -> SegResult<()> {
        self.optimizer.backward_step(loss)?;
        Ok(())
    }

    /// Current learning rate.
    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    /// Adjust the learning rate (allows schedules between steps).
    pub fn set_learning_rate(&mut self, lr: f64) {
        self.optimizer.set_learning_rate(lr);
    }
}
