//! End-to-end tests for the segmentation pipeline.
//!
//! These exercise the complete path: encoder features, decoder fusion,
//! loss construction, parameter updates, and epoch bookkeeping, on a
//! miniature network and synthetic data.

use candle_core::{DType, Device, Tensor};

use roadseg_rs::prelude::*;

/// One synthetic sample: zero images, class 0 (background) everywhere.
fn zeros_batch(device: &Device, height: usize, width: usize) -> SegBatch {
    let images = Tensor::zeros((1, 3, height, width), DType::F32, device).unwrap();
    let mut one_hot = vec![0f32; 2 * height * width];
    one_hot[..height * width].fill(1.0);
    let labels = Tensor::from_vec(one_hot, (1, 2, height, width), device).unwrap();
    SegBatch::new(images, labels)
}

#[test]
fn test_full_training_run_on_synthetic_data() {
    let device = Device::Cpu;
    let config = FcnConfig::test().with_epochs(2).with_learning_rate(1e-3);
    let encoder = VggEncoder::random(&EncoderConfig::test(), &device).unwrap();
    let mut trainer = Trainer::new(&encoder.feature_dims(), &config, &device).unwrap();

    let batch = zeros_batch(&device, config.image_height, config.image_width);
    let mut source = InMemorySource::new(vec![batch.clone(), batch]);

    let reports = trainer.train(&encoder, &mut source).unwrap();

    assert_eq!(reports.len(), 2);
    for report in &reports {
        assert_eq!(report.batches, 2);
        assert!(report.total_loss.is_finite());
        assert!(report.total_loss >= 0.0);
    }
}

#[test]
fn test_scores_match_input_resolution() {
    let device = Device::Cpu;
    let config = FcnConfig::test();
    let encoder = VggEncoder::random(&EncoderConfig::test(), &device).unwrap();
    let trainer = Trainer::new(&encoder.feature_dims(), &config, &device).unwrap();

    let images = Tensor::zeros(
        (2, 3, config.image_height, config.image_width),
        DType::F32,
        &device,
    )
    .unwrap();
    let scores = trainer.scores(&encoder, &images).unwrap();
    assert_eq!(
        scores.dims(),
        &[2, config.num_classes, config.image_height, config.image_width]
    );
}

#[test]
fn test_single_class_pipeline() {
    let device = Device::Cpu;
    let config = FcnConfig::test().with_num_classes(1);
    let encoder = VggEncoder::random(&EncoderConfig::test(), &device).unwrap();
    let mut trainer = Trainer::new(&encoder.feature_dims(), &config, &device).unwrap();

    let images = Tensor::zeros(
        (1, 3, config.image_height, config.image_width),
        DType::F32,
        &device,
    )
    .unwrap();
    let labels = Tensor::ones(
        (1, 1, config.image_height, config.image_width),
        DType::F32,
        &device,
    )
    .unwrap();
    let batch = SegBatch::new(images, labels);

    let loss = trainer.train_step(&encoder, &batch).unwrap();
    assert!(loss.is_finite());
    assert!(loss >= 0.0);
}

#[test]
fn test_loss_decreases_on_repeated_batch() {
    let device = Device::Cpu;
    let config = FcnConfig::test().with_learning_rate(1e-2);
    let encoder = VggEncoder::random(&EncoderConfig::test(), &device).unwrap();
    let mut trainer = Trainer::new(&encoder.feature_dims(), &config, &device).unwrap();

    let batch = zeros_batch(&device, config.image_height, config.image_width);
    let first = trainer.train_step(&encoder, &batch).unwrap();
    let mut last = first;
    for _ in 0..10 {
        last = trainer.train_step(&encoder, &batch).unwrap();
    }
    assert!(
        last < first,
        "loss should decrease on a constant batch: {first} -> {last}"
    );
}
