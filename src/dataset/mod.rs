//! Dataset module for source (MNIST) and target (MNIST-M) data
//!
//! This module provides:
//! - Host-side image and one-hot label containers shared by every component
//! - IDX file loading for MNIST with pixel-mean normalisation
//! - The MNIST-M synthetic target builder (digit/background difference blend)
//!
//! ## Domains
//!
//! 1. **Source**: labeled MNIST digits, used only for pretraining
//! 2. **Target pool**: MNIST-M training images, treated as unlabeled by the
//!    pseudo-labeling step. Its labels are only read to draw the boost seed.
//! 3. **Target validation**: MNIST-M test images, used for reporting only

pub mod mnist;
pub mod mnistm;

use crate::utils::error::{AdaptationError, Result};

pub use mnist::{load_mnist, read_idx_images, read_idx_labels};
pub use mnistm::{build_mnistm, load_mnistm, MnistmBuildConfig};

/// Number of digit classes
pub const NUM_CLASSES: usize = 10;

/// Side length of MNIST / MNIST-M images
pub const IMAGE_SIDE: usize = 28;

/// Channels per image (MNIST is replicated to RGB)
pub const IMAGE_CHANNELS: usize = 3;

/// A batch of images stored as flattened CHW `f32` values, image after image
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSet {
    data: Vec<f32>,
    len: usize,
    channels: usize,
    height: usize,
    width: usize,
}

impl ImageSet {
    /// Wrap flattened CHW data for `len` images
    pub fn new(
        data: Vec<f32>,
        len: usize,
        channels: usize,
        height: usize,
        width: usize,
    ) -> Result<Self> {
        let expected = len * channels * height * width;
        if data.len() != expected {
            return Err(AdaptationError::InvalidInput(format!(
                "image data has {} values, expected {} ({} x {}x{}x{})",
                data.len(),
                expected,
                len,
                channels,
                height,
                width
            )));
        }

        Ok(Self {
            data,
            len,
            channels,
            height,
            width,
        })
    }

    /// An empty set with the given image shape
    pub fn empty(channels: usize, height: usize, width: usize) -> Self {
        Self {
            data: Vec::new(),
            len: 0,
            channels,
            height,
            width,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Values per image (C * H * W)
    pub fn image_size(&self) -> usize {
        self.channels * self.height * self.width
    }

    /// Shape as `[channels, height, width]`
    pub fn shape(&self) -> [usize; 3] {
        [self.channels, self.height, self.width]
    }

    /// All values, image after image
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Flattened CHW values of image `idx`
    pub fn image(&self, idx: usize) -> &[f32] {
        let size = self.image_size();
        &self.data[idx * size..(idx + 1) * size]
    }

    /// Gather the images at `indices`, in that order (duplicates allowed)
    pub fn select(&self, indices: &[usize]) -> Self {
        let mut data = Vec::with_capacity(indices.len() * self.image_size());
        for &idx in indices {
            data.extend_from_slice(self.image(idx));
        }

        Self {
            data,
            len: indices.len(),
            channels: self.channels,
            height: self.height,
            width: self.width,
        }
    }

    /// Contiguous range of images
    pub fn slice(&self, start: usize, end: usize) -> Self {
        let size = self.image_size();
        Self {
            data: self.data[start * size..end * size].to_vec(),
            len: end - start,
            channels: self.channels,
            height: self.height,
            width: self.width,
        }
    }

    /// Append `other` after `self`
    pub fn concat(&self, other: &ImageSet) -> Result<Self> {
        if self.shape() != other.shape() {
            return Err(AdaptationError::InvalidInput(format!(
                "cannot concatenate images of shape {:?} and {:?}",
                self.shape(),
                other.shape()
            )));
        }

        let mut data = Vec::with_capacity(self.data.len() + other.data.len());
        data.extend_from_slice(&self.data);
        data.extend_from_slice(&other.data);

        Ok(Self {
            data,
            len: self.len + other.len,
            channels: self.channels,
            height: self.height,
            width: self.width,
        })
    }
}

/// One-hot label matrix with `num_classes` columns
#[derive(Debug, Clone, PartialEq)]
pub struct OneHotLabels {
    values: Vec<f32>,
    num_classes: usize,
}

impl OneHotLabels {
    /// Encode class indices; every index must be below `num_classes`
    pub fn from_indices(labels: &[usize], num_classes: usize) -> Result<Self> {
        let mut values = vec![0.0f32; labels.len() * num_classes];
        for (row, &label) in labels.iter().enumerate() {
            if label >= num_classes {
                return Err(AdaptationError::InvalidInput(format!(
                    "label {} out of range for {} classes",
                    label, num_classes
                )));
            }
            values[row * num_classes + label] = 1.0;
        }

        Ok(Self {
            values,
            num_classes,
        })
    }

    /// An empty label matrix
    pub fn empty(num_classes: usize) -> Self {
        Self {
            values: Vec::new(),
            num_classes,
        }
    }

    pub fn len(&self) -> usize {
        if self.num_classes == 0 {
            0
        } else {
            self.values.len() / self.num_classes
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Row-major one-hot values
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn row(&self, idx: usize) -> &[f32] {
        &self.values[idx * self.num_classes..(idx + 1) * self.num_classes]
    }

    /// Class index of row `idx`
    pub fn argmax(&self, idx: usize) -> usize {
        argmax(self.row(idx))
    }

    /// Class index of every row
    pub fn class_indices(&self) -> Vec<usize> {
        (0..self.len()).map(|i| self.argmax(i)).collect()
    }

    /// Check that every row sums to 1 with exactly one entry equal to 1
    pub fn validate(&self) -> Result<()> {
        for i in 0..self.len() {
            let row = self.row(i);
            let ones = row.iter().filter(|&&v| v == 1.0).count();
            let zeros = row.iter().filter(|&&v| v == 0.0).count();
            if ones != 1 || zeros != self.num_classes - 1 {
                return Err(AdaptationError::InvalidInput(format!(
                    "row {} is not one-hot: {:?}",
                    i, row
                )));
            }
        }
        Ok(())
    }

    pub fn select(&self, indices: &[usize]) -> Self {
        let mut values = Vec::with_capacity(indices.len() * self.num_classes);
        for &idx in indices {
            values.extend_from_slice(self.row(idx));
        }
        Self {
            values,
            num_classes: self.num_classes,
        }
    }

    pub fn slice(&self, start: usize, end: usize) -> Self {
        Self {
            values: self.values[start * self.num_classes..end * self.num_classes].to_vec(),
            num_classes: self.num_classes,
        }
    }

    pub fn concat(&self, other: &OneHotLabels) -> Result<Self> {
        if self.num_classes != other.num_classes {
            return Err(AdaptationError::InvalidInput(format!(
                "cannot concatenate labels with {} and {} classes",
                self.num_classes, other.num_classes
            )));
        }

        let mut values = Vec::with_capacity(self.values.len() + other.values.len());
        values.extend_from_slice(&self.values);
        values.extend_from_slice(&other.values);

        Ok(Self {
            values,
            num_classes: self.num_classes,
        })
    }
}

/// Index of the largest value; the first one wins on ties
pub fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// Images with one-hot labels
#[derive(Debug, Clone)]
pub struct LabeledSet {
    pub images: ImageSet,
    pub labels: OneHotLabels,
}

impl LabeledSet {
    pub fn new(images: ImageSet, labels: OneHotLabels) -> Result<Self> {
        if images.len() != labels.len() {
            return Err(AdaptationError::InvalidInput(format!(
                "{} images but {} labels",
                images.len(),
                labels.len()
            )));
        }
        Ok(Self { images, labels })
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Split into the first `len - tail` and the last `tail` examples
    pub fn split_tail(&self, tail: usize) -> (LabeledSet, LabeledSet) {
        let cut = self.len() - tail.min(self.len());
        (
            LabeledSet {
                images: self.images.slice(0, cut),
                labels: self.labels.slice(0, cut),
            },
            LabeledSet {
                images: self.images.slice(cut, self.len()),
                labels: self.labels.slice(cut, self.len()),
            },
        )
    }
}

/// Labeled source domain (MNIST)
#[derive(Debug, Clone)]
pub struct SourceDomain {
    pub train: LabeledSet,
    pub test: LabeledSet,
}

/// Target domain (MNIST-M)
///
/// `pool` is what the pseudo-labeler sees. `pool_labels` are only consulted to
/// draw the labeled boost seed and to report pseudo-label quality.
#[derive(Debug, Clone)]
pub struct TargetDomain {
    pub pool: ImageSet,
    pub pool_labels: Vec<usize>,
    pub validation: ImageSet,
    pub validation_labels: Vec<usize>,
}

impl TargetDomain {
    pub fn new(
        pool: ImageSet,
        pool_labels: Vec<usize>,
        validation: ImageSet,
        validation_labels: Vec<usize>,
    ) -> Result<Self> {
        if pool.len() != pool_labels.len() {
            return Err(AdaptationError::Dataset(format!(
                "target pool has {} images but {} labels",
                pool.len(),
                pool_labels.len()
            )));
        }
        if validation.len() != validation_labels.len() {
            return Err(AdaptationError::Dataset(format!(
                "target validation has {} images but {} labels",
                validation.len(),
                validation_labels.len()
            )));
        }

        Ok(Self {
            pool,
            pool_labels,
            validation,
            validation_labels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn images(n: usize) -> ImageSet {
        // Each image is filled with its own index
        let data = (0..n).flat_map(|i| vec![i as f32; 3 * 2 * 2]).collect();
        ImageSet::new(data, n, 3, 2, 2).unwrap()
    }

    #[test]
    fn test_image_set_shape_check() {
        assert!(ImageSet::new(vec![0.0; 11], 1, 3, 2, 2).is_err());
        assert_eq!(images(4).image_size(), 12);
    }

    #[test]
    fn test_select_keeps_order_and_duplicates() {
        let set = images(5);
        let picked = set.select(&[4, 1, 1]);
        assert_eq!(picked.len(), 3);
        assert_eq!(picked.image(0)[0], 4.0);
        assert_eq!(picked.image(1)[0], 1.0);
        assert_eq!(picked.image(2)[0], 1.0);
    }

    #[test]
    fn test_concat() {
        let joined = images(2).concat(&images(3)).unwrap();
        assert_eq!(joined.len(), 5);
        assert_eq!(joined.image(2)[0], 0.0);

        let other = ImageSet::new(vec![0.0; 4], 1, 1, 2, 2).unwrap();
        assert!(images(1).concat(&other).is_err());
    }

    #[test]
    fn test_one_hot_encoding() {
        let labels = OneHotLabels::from_indices(&[3, 0, 9], 10).unwrap();
        assert_eq!(labels.len(), 3);
        assert_eq!(labels.row(0)[3], 1.0);
        assert_eq!(labels.row(0).iter().sum::<f32>(), 1.0);
        assert_eq!(labels.class_indices(), vec![3, 0, 9]);
        assert!(labels.validate().is_ok());
    }

    #[test]
    fn test_one_hot_rejects_out_of_range() {
        assert!(OneHotLabels::from_indices(&[10], 10).is_err());
    }

    #[test]
    fn test_argmax_first_wins() {
        assert_eq!(argmax(&[0.1, 0.4, 0.4, 0.1]), 1);
    }

    #[test]
    fn test_split_tail() {
        let labels = OneHotLabels::from_indices(&[0, 1, 2, 3, 4], 10).unwrap();
        let set = LabeledSet::new(images(5), labels).unwrap();
        let (train, val) = set.split_tail(2);
        assert_eq!(train.len(), 3);
        assert_eq!(val.len(), 2);
        assert_eq!(val.labels.class_indices(), vec![3, 4]);
    }
}
