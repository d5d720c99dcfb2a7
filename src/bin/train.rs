//! Train the FCN road-segmentation network on the KITTI road dataset.
//!
//! Expects the dataset layout of the KITTI road benchmark plus an exported
//! VGG16 encoder:
//!
//! ```text
//! <data_dir>/vgg/                      safetensors encoder weights
//! <data_dir>/data_road/training/       image_2/ + gt_image_2/
//! <data_dir>/data_road/testing/image_2/
//! ```
//!
//! Usage:
//!   cargo run --bin train --release -- [data_dir] [runs_dir]
//!
//! With CUDA:
//!   cargo run --bin train --release --features cuda -- [data_dir] [runs_dir]

use std::path::PathBuf;

use roadseg_rs::prelude::*;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let data_dir = PathBuf::from(args.next().unwrap_or_else(|| "data".to_string()));
    let runs_dir = PathBuf::from(args.next().unwrap_or_else(|| "runs".to_string()));

    let config = FcnConfig::kitti();
    config.validate()?;
    let device = best_device();

    tracing::info!(
        num_classes = config.num_classes,
        epochs = config.epochs,
        batch_size = config.batch_size,
        learning_rate = config.learning_rate,
        "building network"
    );

    let encoder = VggEncoder::load(data_dir.join("vgg"), &EncoderConfig::vgg16(), &device)?;
    let mut trainer = Trainer::new(&encoder.feature_dims(), &config, &device)?;

    let mut batches = RoadDataset::new(
        data_dir.join("data_road/training"),
        config.image_shape(),
        config.batch_size,
        config.seed,
        &device,
    )?;
    tracing::info!(samples = batches.len(), "training set loaded");

    let reports = trainer.train(&encoder, &mut batches)?;
    if let Some(last) = reports.last() {
        tracing::info!(
            epochs = reports.len(),
            final_total_loss = last.total_loss,
            final_mean_loss = last.mean_loss(),
            "training complete"
        );
    }

    let run_dir = save_inference_samples(
        &runs_dir,
        data_dir.join("data_road/testing/image_2"),
        &encoder,
        &trainer,
        config.image_shape(),
        &device,
    )?;
    tracing::info!(run_dir = %run_dir.display(), "inference samples written");

    Ok(())
}
