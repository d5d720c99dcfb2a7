//! Epoch/batch training loop for the FCN.
//!
//! The [`Trainer`] owns the decoder's parameter set (a candle `VarMap`,
//! created and initialized once at construction) and drives optimization
//! for a fixed number of epochs: reset the batch source, consume batches
//! strictly in order, run one update per batch, accumulate the epoch loss,
//! report it, reset the accumulator. No early stopping, no validation
//! split, no checkpointing.

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};

use crate::config::FcnConfig;
use crate::data::{BatchSource, SegBatch};
use crate::decoder::FcnDecoder;
use crate::encoder::{Encoder, FeatureDims};
use crate::error::SegResult;
use crate::objective::{segmentation_loss, Objective};

/// Running per-epoch loss total.
#[derive(Debug, Default)]
pub struct LossMeter {
    total: f64,
    batches: usize,
}

impl LossMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulate one step's loss.
    pub fn add(&mut self, loss: f32) {
        self.total += loss as f64;
        self.batches += 1;
    }

    /// Accumulated total so far.
    pub fn total(&self) -> f64 {
        self.total
    }

    /// Number of steps accumulated.
    pub fn batches(&self) -> usize {
        self.batches
    }

    /// Return the accumulated total and reset for the next epoch.
    pub fn take(&mut self) -> (f64, usize) {
        let out = (self.total, self.batches);
        self.total = 0.0;
        self.batches = 0;
        out
    }
}

/// Loss summary for one completed epoch.
#[derive(Debug, Clone, Copy)]
pub struct EpochReport {
    /// 1-based epoch index
    pub epoch: usize,
    /// Sum of per-batch losses over the epoch
    pub total_loss: f64,
    /// Number of batches consumed
    pub batches: usize,
}

impl EpochReport {
    /// Mean per-batch loss.
    pub fn mean_loss(&self) -> f64 {
        if self.batches == 0 {
            0.0
        } else {
            self.total_loss / self.batches as f64
        }
    }
}

/// Drives decoder training against a frozen encoder.
pub struct Trainer {
    var_map: VarMap,
    decoder: FcnDecoder,
    objective: Objective,
    config: FcnConfig,
}

impl Trainer {
    /// Build the decoder and optimizer. The parameter set is created and
    /// initialized here, exactly once.
    pub fn new(dims: &FeatureDims, config: &FcnConfig, device: &Device) -> SegResult<Self> {
        config.validate()?;

        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, device);
        let decoder = FcnDecoder::new(dims, config.num_classes, vb)?;
        let objective = Objective::new(&var_map, config.learning_rate)?;

        Ok(Self {
            var_map,
            decoder,
            objective,
            config: config.clone(),
        })
    }

    /// The trainable parameter set.
    pub fn var_map(&self) -> &VarMap {
        &self.var_map
    }

    /// The decoder being trained.
    pub fn decoder(&self) -> &FcnDecoder {
        &self.decoder
    }

    /// One training step: forward, loss, backward, parameter update.
    /// Returns the step's scalar loss.
    pub fn train_step(&mut self, encoder: &dyn Encoder, batch: &SegBatch) -> SegResult<f32> {
        let features = encoder.features(&batch.images, self.config.keep_prob)?;
        let scores = self.decoder.forward(&features)?;
        let penalty = self.decoder.l2_penalty(self.config.l2_coefficient)?;
        let loss = segmentation_loss(&scores, &batch.labels, self.config.num_classes, &penalty)?;
        self.objective.step(&loss)?;
        Ok(loss.to_scalar::<f32>()?)
    }

    /// Class scores for a batch of images with dropout disabled.
    pub fn scores(&self, encoder: &dyn Encoder, images: &Tensor) -> SegResult<Tensor> {
        let features = encoder.features(images, 1.0)?;
        self.decoder.forward(&features)
    }

    /// Run the full training schedule: `config.epochs` passes over the
    /// batch source, one update per batch, loss reported per epoch.
    pub fn train(
        &mut self,
        encoder: &dyn Encoder,
        source: &mut dyn BatchSource,
    ) -> SegResult<Vec<EpochReport>> {
        let mut reports = Vec::with_capacity(self.config.epochs);
        let mut meter = LossMeter::new();

        for epoch in 1..=self.config.epochs {
            source.reset()?;
            while let Some(batch) = source.next_batch() {
                let batch = batch?;
                let loss = self.train_step(encoder, &batch)?;
                meter.add(loss);
            }

            let (total_loss, batches) = meter.take();
            let report = EpochReport {
                epoch,
                total_loss,
                batches,
            };
            tracing::info!(
                epoch = report.epoch,
                total_loss = report.total_loss,
                mean_loss = report.mean_loss(),
                batches = report.batches,
                "epoch complete"
            );
            reports.push(report);
        }

        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::InMemorySource;
    use crate::encoder::{EncoderConfig, VggEncoder};

    #[test]
    fn test_loss_meter_accumulates_and_resets() {
        let mut meter = LossMeter::new();
        meter.add(1.0);
        meter.add(2.0);
        assert!((meter.total() - 3.0).abs() < 1e-9);
        assert_eq!(meter.batches(), 2);

        let (total, batches) = meter.take();
        assert!((total - 3.0).abs() < 1e-9);
        assert_eq!(batches, 2);
        assert_eq!(meter.total(), 0.0);
        assert_eq!(meter.batches(), 0);
    }

    fn synthetic_batch(device: &Device) -> SegBatch {
        let images = Tensor::zeros((1, 3, 32, 64), DType::F32, device).unwrap();
        // class 0 everywhere: background plane all ones, road plane all zeros
        let mut one_hot = vec![0f32; 2 * 32 * 64];
        one_hot[..32 * 64].fill(1.0);
        let labels = Tensor::from_vec(one_hot, (1, 2, 32, 64), device).unwrap();
        SegBatch::new(images, labels)
    }

    fn var_snapshot(var_map: &VarMap) -> Vec<Vec<f32>> {
        var_map
            .all_vars()
            .iter()
            .map(|v| {
                v.as_tensor()
                    .flatten_all()
                    .unwrap()
                    .to_vec1::<f32>()
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_one_step_updates_parameters() {
        let device = Device::Cpu;
        let config = FcnConfig::test().with_learning_rate(1e-2);
        let encoder = VggEncoder::random(&EncoderConfig::test(), &device).unwrap();
        let mut trainer = Trainer::new(&encoder.feature_dims(), &config, &device).unwrap();

        let batch = synthetic_batch(&device);
        let before = var_snapshot(trainer.var_map());

        let loss = trainer.train_step(&encoder, &batch).unwrap();
        assert!(loss.is_finite());
        assert!(loss >= 0.0);

        let after = var_snapshot(trainer.var_map());
        let changed = before
            .iter()
            .zip(after.iter())
            .any(|(b, a)| b.iter().zip(a.iter()).any(|(x, y)| (x - y).abs() > 0.0));
        assert!(changed, "parameter set must differ after a gradient step");
    }

    #[test]
    fn test_train_reports_one_entry_per_epoch() {
        let device = Device::Cpu;
        let config = FcnConfig::test().with_epochs(2);
        let encoder = VggEncoder::random(&EncoderConfig::test(), &device).unwrap();
        let mut trainer = Trainer::new(&encoder.feature_dims(), &config, &device).unwrap();

        let batch = synthetic_batch(&device);
        let mut source = InMemorySource::new(vec![batch.clone(), batch]);

        let reports = trainer.train(&encoder, &mut source).unwrap();
        assert_eq!(reports.len(), 2);
        for (idx, report) in reports.iter().enumerate() {
            assert_eq!(report.epoch, idx + 1);
            // the source is restarted per epoch, so both epochs see 2 batches
            assert_eq!(report.batches, 2);
            assert!(report.total_loss.is_finite());
            assert!(report.total_loss >= 0.0);
        }
    }

    #[test]
    fn test_trainer_rejects_invalid_config() {
        let device = Device::Cpu;
        let config = FcnConfig::test().with_num_classes(0);
        let dims = FeatureDims {
            early: 4,
            mid: 8,
            deep: 16,
        };
        assert!(Trainer::new(&dims, &config, &device).is_err());
    }
}
