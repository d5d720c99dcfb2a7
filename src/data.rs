//! Batch loading for road-segmentation training.
//!
//! [`BatchSource`] supplies shuffled mini-batches of (image, label) pairs,
//! restartable per epoch. [`RoadDataset`] reads the KITTI road layout
//! (`image_2/` frames paired with `gt_image_2/` masks), resizes to the
//! target shape, and binarizes ground truth into one-hot labels.
//! [`InMemorySource`] serves pre-built batches for tests and synthetic runs.

use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use image::imageops::FilterType;
use image::RgbImage;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::{SegError, SegResult};

/// KITTI ground-truth masks mark non-road pixels in pure red.
const BACKGROUND_COLOR: [u8; 3] = [255, 0, 0];

/// A mini-batch of images `(N, 3, H, W)` and one-hot labels `(N, C, H, W)`,
/// both f32, produced fresh per step and discarded after the update.
#[derive(Debug, Clone)]
pub struct SegBatch {
    pub images: Tensor,
    pub labels: Tensor,
}

impl SegBatch {
    pub fn new(images: Tensor, labels: Tensor) -> Self {
        Self { images, labels }
    }

    /// Number of samples in the batch.
    pub fn batch_size(&self) -> usize {
        self.images.dims()[0]
    }
}

/// A finite, restartable-per-epoch sequence of training batches.
pub trait BatchSource {
    /// Next batch, or `None` when the epoch's pass is exhausted.
    fn next_batch(&mut self) -> Option<SegResult<SegBatch>>;

    /// Restart (and reshuffle, where applicable) for the next epoch.
    fn reset(&mut self) -> SegResult<()>;

    /// Estimated number of batches per epoch, if known.
    fn len_hint(&self) -> Option<usize> {
        None
    }
}

/// Binarize a ground-truth mask into channel-major one-hot planes
/// `[background plane..., road plane...]`, each `H*W` long.
pub fn binarize_mask(mask: &RgbImage) -> Vec<f32> {
    let plane = (mask.width() * mask.height()) as usize;
    let mut labels = vec![0f32; 2 * plane];
    for (idx, pixel) in mask.pixels().enumerate() {
        if pixel.0 == BACKGROUND_COLOR {
            labels[idx] = 1.0;
        } else {
            labels[plane + idx] = 1.0;
        }
    }
    labels
}

/// Convert an RGB image into channel-major f32 planes scaled to [0, 1].
fn image_planes(img: &RgbImage) -> Vec<f32> {
    let plane = (img.width() * img.height()) as usize;
    let mut out = vec![0f32; 3 * plane];
    for (idx, pixel) in img.pixels().enumerate() {
        out[idx] = pixel.0[0] as f32 / 255.0;
        out[plane + idx] = pixel.0[1] as f32 / 255.0;
        out[2 * plane + idx] = pixel.0[2] as f32 / 255.0;
    }
    out
}

/// KITTI road training set: frames under `image_2/`, masks under
/// `gt_image_2/` with a `_road_` infix (`um_000000.png` pairs with
/// `um_road_000000.png`). Two classes: background and road.
pub struct RoadDataset {
    pairs: Vec<(PathBuf, PathBuf)>,
    order: Vec<usize>,
    cursor: usize,
    batch_size: usize,
    height: usize,
    width: usize,
    device: Device,
    rng: StdRng,
}

impl RoadDataset {
    /// Scan `training_dir` for image/mask pairs.
    ///
    /// # Arguments
    /// * `training_dir` - directory containing `image_2/` and `gt_image_2/`
    /// * `image_shape` - target (height, width); frames are resized
    /// * `batch_size` - samples per batch (last batch may be smaller)
    /// * `seed` - shuffle seed
    pub fn new(
        training_dir: impl AsRef<Path>,
        image_shape: (usize, usize),
        batch_size: usize,
        seed: u64,
        device: &Device,
    ) -> SegResult<Self> {
        let training_dir = training_dir.as_ref();
        let image_dir = training_dir.join("image_2");
        let mask_dir = training_dir.join("gt_image_2");

        let mut pairs = Vec::new();
        let entries = std::fs::read_dir(&image_dir).map_err(|e| {
            SegError::data(format!(
                "cannot read image dir {}: {}",
                image_dir.display(),
                e
            ))
        })?;
        for entry in entries {
            let image_path = entry
                .map_err(|e| SegError::data(format!("cannot read dir entry: {}", e)))?
                .path();
            if image_path.extension().map(|e| e == "png").unwrap_or(false) {
                let mask_path = mask_dir.join(Self::mask_name(&image_path)?);
                if !mask_path.is_file() {
                    return Err(SegError::data(format!(
                        "missing ground-truth mask {}",
                        mask_path.display()
                    )));
                }
                pairs.push((image_path, mask_path));
            }
        }
        if pairs.is_empty() {
            return Err(SegError::data(format!(
                "no training images found in {}",
                image_dir.display()
            )));
        }
        pairs.sort();

        let mut rng = StdRng::seed_from_u64(seed);
        let mut order: Vec<usize> = (0..pairs.len()).collect();
        order.shuffle(&mut rng);

        Ok(Self {
            pairs,
            order,
            cursor: 0,
            batch_size,
            height: image_shape.0,
            width: image_shape.1,
            device: device.clone(),
            rng,
        })
    }

    /// `um_000000.png` pairs with `um_road_000000.png`.
    fn mask_name(image_path: &Path) -> SegResult<String> {
        let stem = image_path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| {
                SegError::data(format!("bad image file name {}", image_path.display()))
            })?;
        let (prefix, rest) = stem.split_once('_').ok_or_else(|| {
            SegError::data(format!(
                "image name {} has no category prefix",
                image_path.display()
            ))
        })?;
        Ok(format!("{}_road_{}.png", prefix, rest))
    }

    /// Number of image/mask pairs.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    fn load_pair(&self, pair: &(PathBuf, PathBuf)) -> SegResult<(Vec<f32>, Vec<f32>)> {
        let image = image::open(&pair.0)?
            .resize_exact(self.width as u32, self.height as u32, FilterType::Triangle)
            .to_rgb8();
        // Nearest for the mask so binarization stays crisp
        let mask = image::open(&pair.1)?
            .resize_exact(self.width as u32, self.height as u32, FilterType::Nearest)
            .to_rgb8();
        Ok((image_planes(&image), binarize_mask(&mask)))
    }
}

impl BatchSource for RoadDataset {
    fn next_batch(&mut self) -> Option<SegResult<SegBatch>> {
        if self.cursor >= self.order.len() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.order.len());
        let indices = &self.order[self.cursor..end];
        self.cursor = end;

        let n = indices.len();
        let plane = self.height * self.width;
        let mut images = Vec::with_capacity(n * 3 * plane);
        let mut labels = Vec::with_capacity(n * 2 * plane);
        for &idx in indices {
            match self.load_pair(&self.pairs[idx]) {
                Ok((img, lbl)) => {
                    images.extend_from_slice(&img);
                    labels.extend_from_slice(&lbl);
                }
                Err(e) => return Some(Err(e)),
            }
        }

        let build = || -> SegResult<SegBatch> {
            let images =
                Tensor::from_vec(images, (n, 3, self.height, self.width), &self.device)?;
            let labels =
                Tensor::from_vec(labels, (n, 2, self.height, self.width), &self.device)?;
            Ok(SegBatch::new(images, labels))
        };
        Some(build())
    }

    fn reset(&mut self) -> SegResult<()> {
        self.order.shuffle(&mut self.rng);
        self.cursor = 0;
        Ok(())
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.pairs.len().div_ceil(self.batch_size))
    }
}

/// Serves a fixed list of batches in order; used in tests and synthetic runs.
pub struct InMemorySource {
    batches: Vec<SegBatch>,
    cursor: usize,
}

impl InMemorySource {
    pub fn new(batches: Vec<SegBatch>) -> Self {
        Self { batches, cursor: 0 }
    }
}

impl BatchSource for InMemorySource {
    fn next_batch(&mut self) -> Option<SegResult<SegBatch>> {
        let batch = self.batches.get(self.cursor)?.clone();
        self.cursor += 1;
        Some(Ok(batch))
    }

    fn reset(&mut self) -> SegResult<()> {
        self.cursor = 0;
        Ok(())
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.batches.len())
    }
}
