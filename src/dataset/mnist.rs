//! MNIST loading from IDX files
//!
//! IDX layout: two zero bytes, a type byte (`0x08` = unsigned byte), the number of
//! dimensions, then one big-endian `u32` per dimension, then the raw values.
//! Digits are replicated to three channels and normalised per split as
//! `(x - mean(split)) / 255`.

use std::fs;
use std::path::Path;

use tracing::info;

use super::{ImageSet, LabeledSet, OneHotLabels, SourceDomain, IMAGE_CHANNELS, NUM_CLASSES};
use crate::utils::error::{AdaptationError, Result};

pub const TRAIN_IMAGES: &str = "train-images-idx3-ubyte";
pub const TRAIN_LABELS: &str = "train-labels-idx1-ubyte";
pub const TEST_IMAGES: &str = "t10k-images-idx3-ubyte";
pub const TEST_LABELS: &str = "t10k-labels-idx1-ubyte";

const IDX_UBYTE: u8 = 0x08;

/// Raw contents of an unsigned-byte IDX file
#[derive(Debug, Clone, PartialEq)]
pub struct IdxArray {
    pub dims: Vec<usize>,
    pub data: Vec<u8>,
}

/// Parse an unsigned-byte IDX buffer
pub fn parse_idx(bytes: &[u8]) -> Result<IdxArray> {
    if bytes.len() < 4 || bytes[0] != 0 || bytes[1] != 0 {
        return Err(AdaptationError::Dataset("not an IDX file (bad magic)".to_string()));
    }
    if bytes[2] != IDX_UBYTE {
        return Err(AdaptationError::Dataset(format!(
            "unsupported IDX element type 0x{:02x}",
            bytes[2]
        )));
    }

    let ndims = bytes[3] as usize;
    let header = 4 + 4 * ndims;
    if bytes.len() < header {
        return Err(AdaptationError::Dataset("truncated IDX header".to_string()));
    }

    let dims: Vec<usize> = (0..ndims)
        .map(|d| {
            let off = 4 + 4 * d;
            u32::from_be_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]]) as usize
        })
        .collect();

    let count: usize = dims.iter().product();
    if bytes.len() - header != count {
        return Err(AdaptationError::Dataset(format!(
            "IDX payload has {} bytes, header announces {}",
            bytes.len() - header,
            count
        )));
    }

    Ok(IdxArray {
        dims,
        data: bytes[header..].to_vec(),
    })
}

/// Serialize an unsigned-byte IDX buffer
pub fn encode_idx(dims: &[usize], data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + 4 * dims.len() + data.len());
    out.extend_from_slice(&[0, 0, IDX_UBYTE, dims.len() as u8]);
    for &d in dims {
        out.extend_from_slice(&(d as u32).to_be_bytes());
    }
    out.extend_from_slice(data);
    out
}

fn read_idx(path: &Path) -> Result<IdxArray> {
    if !path.exists() {
        return Err(AdaptationError::Dataset(format!(
            "missing dataset file {}",
            path.display()
        )));
    }
    let bytes = fs::read(path)?;
    parse_idx(&bytes).map_err(|e| AdaptationError::Dataset(format!("{}: {}", path.display(), e)))
}

/// Read an `idx1` label file
pub fn read_idx_labels(path: &Path) -> Result<Vec<usize>> {
    let idx = read_idx(path)?;
    if idx.dims.len() != 1 {
        return Err(AdaptationError::Dataset(format!(
            "{}: expected 1 dimension, found {}",
            path.display(),
            idx.dims.len()
        )));
    }
    Ok(idx.data.into_iter().map(usize::from).collect())
}

/// Read an `idx3` (N,H,W) or `idx4` (N,H,W,C) image file as `(pixels, [n, h, w, c])`
pub fn read_idx_images(path: &Path) -> Result<(Vec<u8>, [usize; 4])> {
    let idx = read_idx(path)?;
    let shape = match idx.dims.as_slice() {
        &[n, h, w] => [n, h, w, 1],
        &[n, h, w, c] => [n, h, w, c],
        other => {
            return Err(AdaptationError::Dataset(format!(
                "{}: expected 3 or 4 dimensions, found {:?}",
                path.display(),
                other
            )))
        }
    };
    Ok((idx.data, shape))
}

/// Convert HWC bytes to normalised CHW floats with `IMAGE_CHANNELS` channels.
///
/// Single-channel input is replicated. The pixel mean is taken over the whole
/// split, then every value becomes `(x - mean) / 255`.
pub fn normalize_images(pixels: &[u8], shape: [usize; 4]) -> Result<ImageSet> {
    let [n, h, w, c] = shape;
    if c != 1 && c != IMAGE_CHANNELS {
        return Err(AdaptationError::Dataset(format!(
            "cannot map {} channels to {}",
            c, IMAGE_CHANNELS
        )));
    }

    let mean = if pixels.is_empty() {
        0.0
    } else {
        pixels.iter().map(|&p| p as f64).sum::<f64>() / pixels.len() as f64
    };

    let mut data = vec![0.0f32; n * IMAGE_CHANNELS * h * w];
    for i in 0..n {
        let src = &pixels[i * h * w * c..(i + 1) * h * w * c];
        let dst = &mut data[i * IMAGE_CHANNELS * h * w..(i + 1) * IMAGE_CHANNELS * h * w];
        for y in 0..h {
            for x in 0..w {
                for ch in 0..IMAGE_CHANNELS {
                    let v = src[(y * w + x) * c + ch.min(c - 1)] as f64;
                    dst[ch * h * w + y * w + x] = ((v - mean) / 255.0) as f32;
                }
            }
        }
    }

    ImageSet::new(data, n, IMAGE_CHANNELS, h, w)
}

fn load_split(dir: &Path, images: &str, labels: &str) -> Result<LabeledSet> {
    let (pixels, shape) = read_idx_images(&dir.join(images))?;
    let labels = read_idx_labels(&dir.join(labels))?;
    let images = normalize_images(&pixels, shape)?;
    LabeledSet::new(images, OneHotLabels::from_indices(&labels, NUM_CLASSES)?)
}

/// Load MNIST train and test splits from `dir`
pub fn load_mnist(dir: &Path) -> Result<SourceDomain> {
    let train = load_split(dir, TRAIN_IMAGES, TRAIN_LABELS)?;
    let test = load_split(dir, TEST_IMAGES, TEST_LABELS)?;

    info!(
        "Loaded MNIST from {}: {} train / {} test images",
        dir.display(),
        train.len(),
        test.len()
    );

    Ok(SourceDomain { train, test })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_idx_roundtrip_header() {
        let bytes = encode_idx(&[2, 2, 2], &[0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(&bytes[..4], &[0, 0, 0x08, 3]);

        let parsed = parse_idx(&bytes).unwrap();
        assert_eq!(parsed.dims, vec![2, 2, 2]);
        assert_eq!(parsed.data.len(), 8);
    }

    #[test]
    fn test_parse_rejects_bad_payload() {
        let mut bytes = encode_idx(&[4], &[1, 2, 3, 4]);
        bytes.pop();
        assert!(parse_idx(&bytes).is_err());
        assert!(parse_idx(&[1, 0, 8, 1]).is_err());
    }

    #[test]
    fn test_normalize_replicates_and_centres() {
        // One 1x2 grey image: pixels 0 and 255, mean 127.5
        let set = normalize_images(&[0, 255], [1, 1, 2, 1]).unwrap();
        assert_eq!(set.shape(), [3, 1, 2]);

        let img = set.image(0);
        for ch in 0..3 {
            assert!((img[ch * 2] + 0.5).abs() < 1e-6);
            assert!((img[ch * 2 + 1] - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn test_load_mnist_from_dir() {
        let dir = TempDir::new().unwrap();
        let write = |name: &str, dims: &[usize], data: &[u8]| {
            fs::write(dir.path().join(name), encode_idx(dims, data)).unwrap();
        };

        write(TRAIN_IMAGES, &[3, 2, 2], &[0; 12]);
        write(TRAIN_LABELS, &[3], &[1, 2, 3]);
        write(TEST_IMAGES, &[1, 2, 2], &[9; 4]);
        write(TEST_LABELS, &[1], &[7]);

        let source = load_mnist(dir.path()).unwrap();
        assert_eq!(source.train.len(), 3);
        assert_eq!(source.train.labels.class_indices(), vec![1, 2, 3]);
        assert_eq!(source.test.labels.class_indices(), vec![7]);
    }

    #[test]
    fn test_missing_file_is_dataset_error() {
        let dir = TempDir::new().unwrap();
        let err = load_mnist(dir.path()).unwrap_err();
        assert!(matches!(err, AdaptationError::Dataset(_)));
    }
}
