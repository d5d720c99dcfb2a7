//! Inference visualization sink.
//!
//! Runs the trained network over a held-out image directory and writes
//! road-overlay PNGs into a timestamped run directory. Side-effecting only;
//! nothing here feeds back into training.

use std::path::{Path, PathBuf};

use candle_core::{Device, IndexOp, Tensor};
use candle_nn::ops;
use image::imageops::FilterType;
use image::{Rgb, RgbImage};

use crate::encoder::Encoder;
use crate::error::{SegError, SegResult};
use crate::trainer::Trainer;

/// Index of the road class in the label planes ([background, road]).
const ROAD_CLASS: usize = 1;
/// A pixel is painted when its road probability exceeds this.
const ROAD_THRESHOLD: f32 = 0.5;

/// Run inference over every PNG in `test_image_dir` and write green-overlay
/// visualizations into a fresh timestamped subdirectory of `runs_dir`.
/// Returns the run directory path.
pub fn save_inference_samples(
    runs_dir: impl AsRef<Path>,
    test_image_dir: impl AsRef<Path>,
    encoder: &dyn Encoder,
    trainer: &Trainer,
    image_shape: (usize, usize),
    device: &Device,
) -> SegResult<PathBuf> {
    let test_image_dir = test_image_dir.as_ref();
    let run_dir = runs_dir
        .as_ref()
        .join(chrono::Utc::now().format("%Y%m%dT%H%M%S").to_string());
    std::fs::create_dir_all(&run_dir)?;

    let (height, width) = image_shape;
    let mut count = 0usize;
    let entries = std::fs::read_dir(test_image_dir).map_err(|e| {
        SegError::data(format!(
            "cannot read test image dir {}: {}",
            test_image_dir.display(),
            e
        ))
    })?;
    for entry in entries {
        let path = entry
            .map_err(|e| SegError::data(format!("cannot read dir entry: {}", e)))?
            .path();
        if !path.extension().map(|e| e == "png").unwrap_or(false) {
            continue;
        }

        let frame = image::open(&path)?
            .resize_exact(width as u32, height as u32, FilterType::Triangle)
            .to_rgb8();
        let overlay = paint_road(&frame, encoder, trainer, device)?;

        let name = path
            .file_name()
            .ok_or_else(|| SegError::data(format!("bad file name {}", path.display())))?;
        overlay.save(run_dir.join(name))?;
        count += 1;
    }

    tracing::info!(
        run_dir = %run_dir.display(),
        images = count,
        "saved inference samples"
    );
    Ok(run_dir)
}

/// Segment one frame and blend a green overlay onto the predicted road.
fn paint_road(
    frame: &RgbImage,
    encoder: &dyn Encoder,
    trainer: &Trainer,
    device: &Device,
) -> SegResult<RgbImage> {
    let (width, height) = frame.dimensions();
    let plane = (width * height) as usize;

    let mut planes = vec![0f32; 3 * plane];
    for (idx, pixel) in frame.pixels().enumerate() {
        planes[idx] = pixel.0[0] as f32 / 255.0;
        planes[plane + idx] = pixel.0[1] as f32 / 255.0;
        planes[2 * plane + idx] = pixel.0[2] as f32 / 255.0;
    }
    let images = Tensor::from_vec(planes, (1, 3, height as usize, width as usize), device)?;

    let scores = trainer.scores(encoder, &images)?;
    let probs = ops::softmax(&scores, 1)?;
    let road = probs.i((0, ROAD_CLASS))?.to_vec2::<f32>()?;

    let mut out = frame.clone();
    for y in 0..height {
        for x in 0..width {
            if road[y as usize][x as usize] > ROAD_THRESHOLD {
                let px = out.get_pixel(x, y).0;
                out.put_pixel(
                    x,
                    y,
                    Rgb([px[0] / 2, px[1] / 2 + 127, px[2] / 2]),
                );
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FcnConfig;
    use crate::encoder::{EncoderConfig, VggEncoder};
    use candle_core::Device;

    #[test]
    fn test_save_inference_samples_writes_overlays() {
        let device = Device::Cpu;
        let encoder = VggEncoder::random(&EncoderConfig::test(), &device).unwrap();
        let config = FcnConfig::test();
        let trainer = Trainer::new(&encoder.feature_dims(), &config, &device).unwrap();

        let data_dir = tempfile::tempdir().unwrap();
        let runs_dir = tempfile::tempdir().unwrap();
        RgbImage::from_pixel(8, 8, Rgb([10, 20, 30]))
            .save(data_dir.path().join("um_000000.png"))
            .unwrap();

        let run_dir = save_inference_samples(
            runs_dir.path(),
            data_dir.path(),
            &encoder,
            &trainer,
            (32, 64),
            &device,
        )
        .unwrap();

        assert!(run_dir.join("um_000000.png").is_file());
    }
}
