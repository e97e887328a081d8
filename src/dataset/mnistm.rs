//! MNIST-M synthetic target domain
//!
//! Every MNIST digit is binarised, replicated to RGB and difference-blended with
//! a random patch cut from a random background photograph:
//! `out = |patch - digit|`. The result is stored as `idx4` files (N,H,W,C) with
//! the MNIST label files copied alongside.

use std::fs;
use std::path::{Path, PathBuf};

use image::RgbImage;
use indicatif::{ProgressBar, ProgressStyle};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::mnist::{self, encode_idx, normalize_images, read_idx_images, read_idx_labels};
use super::{TargetDomain, IMAGE_CHANNELS};
use crate::utils::error::{AdaptationError, Result};

pub const TRAIN_IMAGES: &str = "mnistm-train-images-idx4-ubyte";
pub const TRAIN_LABELS: &str = "mnistm-train-labels-idx1-ubyte";
pub const TEST_IMAGES: &str = "mnistm-t10k-images-idx4-ubyte";
pub const TEST_LABELS: &str = "mnistm-t10k-labels-idx1-ubyte";

const BACKGROUND_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// Inputs for building MNIST-M
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MnistmBuildConfig {
    /// Directory with the MNIST IDX files
    pub mnist_dir: PathBuf,
    /// Directory with background photographs (e.g. BSDS500 train images)
    pub backgrounds_dir: PathBuf,
    /// Where the MNIST-M IDX files are written
    pub output_dir: PathBuf,
    /// Seed for background and patch selection
    pub seed: u64,
}

/// Load every decodable background image larger than `min_side` in both dimensions
pub fn load_backgrounds(dir: &Path, min_side: usize) -> Result<Vec<RgbImage>> {
    if !dir.is_dir() {
        return Err(AdaptationError::Dataset(format!(
            "background directory {} not found",
            dir.display()
        )));
    }

    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| BACKGROUND_EXTENSIONS.contains(&e.to_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();

    let mut backgrounds = Vec::with_capacity(paths.len());
    for path in &paths {
        match image::open(path) {
            Ok(img) => {
                let rgb = img.to_rgb8();
                if rgb.width() as usize > min_side && rgb.height() as usize > min_side {
                    backgrounds.push(rgb);
                }
            }
            Err(e) => warn!("Skipping background {}: {}", path.display(), e),
        }
    }

    if backgrounds.is_empty() {
        return Err(AdaptationError::Dataset(format!(
            "no usable background images in {}",
            dir.display()
        )));
    }

    Ok(backgrounds)
}

/// Blend one grey `side x side` digit into a random patch of `background`.
///
/// Returns HWC RGB bytes.
pub fn blend_digit<R: Rng>(digit: &[u8], side: usize, background: &RgbImage, rng: &mut R) -> Vec<u8> {
    let x0 = rng.gen_range(0..background.width() as usize - side);
    let y0 = rng.gen_range(0..background.height() as usize - side);

    let mut out = Vec::with_capacity(side * side * IMAGE_CHANNELS);
    for y in 0..side {
        for x in 0..side {
            let d: u8 = if digit[y * side + x] > 0 { 255 } else { 0 };
            let bg = background.get_pixel((x0 + x) as u32, (y0 + y) as u32);
            for ch in 0..IMAGE_CHANNELS {
                out.push(bg[ch].abs_diff(d));
            }
        }
    }
    out
}

/// Blend every image of an `idx3` split, returning `idx4` pixel data
pub fn compose_split<R: Rng>(
    pixels: &[u8],
    shape: [usize; 4],
    backgrounds: &[RgbImage],
    rng: &mut R,
    progress: &ProgressBar,
) -> Result<Vec<u8>> {
    let [n, h, w, c] = shape;
    if c != 1 || h != w {
        return Err(AdaptationError::Dataset(format!(
            "expected square single-channel digits, found {}x{}x{}",
            h, w, c
        )));
    }

    let mut out = Vec::with_capacity(n * h * w * IMAGE_CHANNELS);
    for i in 0..n {
        let background = backgrounds
            .choose(rng)
            .ok_or_else(|| AdaptationError::Dataset("no backgrounds".to_string()))?;
        out.extend(blend_digit(&pixels[i * h * w..(i + 1) * h * w], h, background, rng));

        if i % 1000 == 0 {
            progress.set_position(i as u64);
        }
    }
    progress.set_position(n as u64);

    Ok(out)
}

fn build_split<R: Rng>(
    config: &MnistmBuildConfig,
    backgrounds: &[RgbImage],
    rng: &mut R,
    (src_images, src_labels): (&str, &str),
    (dst_images, dst_labels): (&str, &str),
) -> Result<usize> {
    let (pixels, shape) = read_idx_images(&config.mnist_dir.join(src_images))?;
    let [n, h, w, _] = shape;

    let progress = ProgressBar::new(n as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
            .map_err(|e| AdaptationError::InvalidInput(e.to_string()))?
            .progress_chars("#>-"),
    );

    let blended = compose_split(&pixels, shape, backgrounds, rng, &progress)?;
    progress.finish_and_clear();

    fs::write(
        config.output_dir.join(dst_images),
        encode_idx(&[n, h, w, IMAGE_CHANNELS], &blended),
    )?;
    fs::copy(config.mnist_dir.join(src_labels), config.output_dir.join(dst_labels))?;

    Ok(n)
}

/// Build MNIST-M train and test splits from MNIST and background photographs
pub fn build_mnistm(config: &MnistmBuildConfig) -> Result<(usize, usize)> {
    let (_, probe) = read_idx_images(&config.mnist_dir.join(mnist::TEST_IMAGES))?;
    let backgrounds = load_backgrounds(&config.backgrounds_dir, probe[1])?;
    info!("Loaded {} background images", backgrounds.len());

    fs::create_dir_all(&config.output_dir)?;
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);

    info!("Building MNIST-M train split...");
    let train = build_split(
        config,
        &backgrounds,
        &mut rng,
        (mnist::TRAIN_IMAGES, mnist::TRAIN_LABELS),
        (TRAIN_IMAGES, TRAIN_LABELS),
    )?;

    info!("Building MNIST-M test split...");
    let test = build_split(
        config,
        &backgrounds,
        &mut rng,
        (mnist::TEST_IMAGES, mnist::TEST_LABELS),
        (TEST_IMAGES, TEST_LABELS),
    )?;

    info!(
        "MNIST-M written to {} ({} train / {} test)",
        config.output_dir.display(),
        train,
        test
    );

    Ok((train, test))
}

/// Load MNIST-M as a target domain: train split = pool, test split = validation
pub fn load_mnistm(dir: &Path) -> Result<TargetDomain> {
    let (pool_pixels, pool_shape) = read_idx_images(&dir.join(TRAIN_IMAGES))?;
    let (val_pixels, val_shape) = read_idx_images(&dir.join(TEST_IMAGES))?;

    let target = TargetDomain::new(
        normalize_images(&pool_pixels, pool_shape)?,
        read_idx_labels(&dir.join(TRAIN_LABELS))?,
        normalize_images(&val_pixels, val_shape)?,
        read_idx_labels(&dir.join(TEST_LABELS))?,
    )?;

    info!(
        "Loaded MNIST-M from {}: {} pool / {} validation images",
        dir.display(),
        target.pool.len(),
        target.validation.len()
    );

    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::TempDir;

    #[test]
    fn test_blend_is_absolute_difference() {
        let background = RgbImage::from_pixel(8, 8, Rgb([100, 0, 255]));
        let digit = [0u8, 17, 0, 200];
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        let out = blend_digit(&digit, 2, &background, &mut rng);
        assert_eq!(out.len(), 2 * 2 * 3);
        // Background pixel where the digit is off
        assert_eq!(&out[0..3], &[100, 0, 255]);
        // Any non-zero digit pixel is binarised to 255
        assert_eq!(&out[3..6], &[155, 255, 0]);
        assert_eq!(&out[9..12], &[155, 255, 0]);
    }

    #[test]
    fn test_build_and_load() {
        let dir = TempDir::new().unwrap();
        let mnist_dir = dir.path().join("mnist");
        let bg_dir = dir.path().join("bg");
        let out_dir = dir.path().join("mnistm");
        fs::create_dir_all(&mnist_dir).unwrap();
        fs::create_dir_all(&bg_dir).unwrap();

        let write = |name: &str, dims: &[usize], data: &[u8]| {
            fs::write(mnist_dir.join(name), encode_idx(dims, data)).unwrap();
        };
        write(mnist::TRAIN_IMAGES, &[3, 4, 4], &[0; 48]);
        write(mnist::TRAIN_LABELS, &[3], &[0, 1, 2]);
        write(mnist::TEST_IMAGES, &[2, 4, 4], &[255; 32]);
        write(mnist::TEST_LABELS, &[2], &[5, 6]);

        RgbImage::from_pixel(10, 10, Rgb([10, 20, 30]))
            .save(bg_dir.join("bg.png"))
            .unwrap();

        let config = MnistmBuildConfig {
            mnist_dir,
            backgrounds_dir: bg_dir,
            output_dir: out_dir.clone(),
            seed: 42,
        };
        assert_eq!(build_mnistm(&config).unwrap(), (3, 2));

        let target = load_mnistm(&out_dir).unwrap();
        assert_eq!(target.pool.len(), 3);
        assert_eq!(target.pool.shape(), [3, 4, 4]);
        assert_eq!(target.pool_labels, vec![0, 1, 2]);
        assert_eq!(target.validation_labels, vec![5, 6]);
    }

    #[test]
    fn test_backgrounds_too_small_are_rejected() {
        let dir = TempDir::new().unwrap();
        RgbImage::from_pixel(4, 4, Rgb([0, 0, 0]))
            .save(dir.path().join("tiny.png"))
            .unwrap();
        assert!(load_backgrounds(dir.path(), 28).is_err());
    }
}
