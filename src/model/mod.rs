//! Model module: the tri-head classifier and the contract the adaptation loop needs
//!
//! This module provides:
//! - [`FeatureBackboneClassifier`], the capability interface the tri-training
//!   controller drives (predict, per-head trainability, weighted fit, evaluate)
//! - The Burn network: a shared convolutional backbone feeding three heads
//! - Model configuration and the typed per-head loss specification
//! - Weight export for microcontroller deployment

pub mod classifier;
pub mod cnn;
pub mod config;
pub mod export;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dataset::{argmax, ImageSet, OneHotLabels};
use crate::training::class_weight::ClassWeights;
use crate::utils::error::{AdaptationError, Result};
use crate::utils::metrics::HeadAccuracy;

// Re-export main types for convenience
pub use classifier::TriHeadClassifier;
pub use cnn::TriHeadNet;
pub use config::{HeadLoss, LossKind, LossSpec, TriHeadConfig};

/// One of the three classification heads sharing the backbone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadId {
    Head1,
    Head2,
    /// Target head, trained on every adaptation step
    Head3,
}

impl HeadId {
    pub const ALL: [HeadId; 3] = [HeadId::Head1, HeadId::Head2, HeadId::Head3];

    /// Position of the head in per-head arrays
    pub fn index(self) -> usize {
        match self {
            HeadId::Head1 => 0,
            HeadId::Head2 => 1,
            HeadId::Head3 => 2,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

impl std::fmt::Display for HeadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "head{}", self.index() + 1)
    }
}

/// Row-major K-way probability vectors, one row per image
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityBatch {
    values: Vec<f64>,
    num_classes: usize,
}

impl ProbabilityBatch {
    pub fn new(values: Vec<f64>, num_classes: usize) -> Result<Self> {
        if num_classes == 0 || values.len() % num_classes != 0 {
            return Err(AdaptationError::InvalidInput(format!(
                "{} probabilities do not split into rows of {}",
                values.len(),
                num_classes
            )));
        }
        Ok(Self {
            values,
            num_classes,
        })
    }

    /// Widen backend `f32` output
    pub fn from_f32(values: &[f32], num_classes: usize) -> Result<Self> {
        Self::new(values.iter().map(|&v| v as f64).collect(), num_classes)
    }

    pub fn len(&self) -> usize {
        self.values.len() / self.num_classes
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn row(&self, idx: usize) -> &[f64] {
        &self.values[idx * self.num_classes..(idx + 1) * self.num_classes]
    }

    /// Predicted class of row `idx` (first maximum on ties)
    pub fn argmax(&self, idx: usize) -> usize {
        let row = self.row(idx);
        let mut best = 0;
        for (i, &p) in row.iter().enumerate() {
            if p > row[best] {
                best = i;
            }
        }
        best
    }

    /// Largest probability of row `idx`
    pub fn max_prob(&self, idx: usize) -> f64 {
        self.row(idx).iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    /// Predicted class of every row
    pub fn classes(&self) -> Vec<usize> {
        (0..self.len()).map(|i| self.argmax(i)).collect()
    }
}

/// Output of the three heads for the same batch of images
#[derive(Debug, Clone, PartialEq)]
pub struct HeadPredictions {
    heads: [ProbabilityBatch; 3],
}

impl HeadPredictions {
    pub fn new(heads: [ProbabilityBatch; 3]) -> Result<Self> {
        let len = heads[0].len();
        let classes = heads[0].num_classes();
        if heads.iter().any(|h| h.len() != len || h.num_classes() != classes) {
            return Err(AdaptationError::InvalidInput(
                "head predictions differ in batch size or class count".to_string(),
            ));
        }
        Ok(Self { heads })
    }

    pub fn head(&self, head: HeadId) -> &ProbabilityBatch {
        &self.heads[head.index()]
    }

    pub fn len(&self) -> usize {
        self.heads[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_classes(&self) -> usize {
        self.heads[0].num_classes()
    }
}

/// Summary of one `fit_step` epoch
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct FitReport {
    /// Mean combined (loss-weighted) loss over minibatches
    pub loss: f64,
    /// Mean per-head class-weighted cross-entropy
    pub per_head_loss: [f64; 3],
    /// Minibatches processed
    pub batches: usize,
    /// Examples seen
    pub samples: usize,
}

/// What the tri-training controller needs from a model.
///
/// A shared feature extractor feeds three independent heads. Trainability is
/// toggled per head; the backbone stays trainable. Every call blocks until done.
pub trait FeatureBackboneClassifier {
    /// Number of output classes K
    fn num_classes(&self) -> usize;

    /// Per-head softmax probabilities for `images`
    fn predict(&self, images: &ImageSet) -> Result<HeadPredictions>;

    /// Freeze or unfreeze one head's parameters, and only that head's
    fn set_trainable(&mut self, head: HeadId, trainable: bool);

    fn is_trainable(&self, head: HeadId) -> bool;

    /// One optimisation epoch over `images`.
    ///
    /// Each head gets categorical cross-entropy against its own targets, scaled
    /// per sample by `class_weights`; the head losses are combined with the
    /// model's fixed loss weights. Only trainable parameters change.
    fn fit_step(
        &mut self,
        images: &ImageSet,
        targets: [&OneHotLabels; 3],
        class_weights: &ClassWeights,
    ) -> Result<FitReport>;

    /// Per-head accuracy against `labels`
    fn evaluate(&self, images: &ImageSet, labels: &[usize]) -> Result<HeadAccuracy> {
        if images.len() != labels.len() {
            return Err(AdaptationError::InvalidInput(format!(
                "{} images but {} labels",
                images.len(),
                labels.len()
            )));
        }

        let predictions = self.predict(images)?;
        let classes = HeadId::ALL.map(|h| predictions.head(h).classes());
        Ok(HeadAccuracy::from_predictions(
            [classes[0].as_slice(), classes[1].as_slice(), classes[2].as_slice()],
            labels,
        ))
    }

    /// Evaluate against one-hot labels
    fn evaluate_one_hot(&self, images: &ImageSet, labels: &OneHotLabels) -> Result<HeadAccuracy> {
        let classes: Vec<usize> = (0..labels.len()).map(|i| argmax(labels.row(i))).collect();
        self.evaluate(images, &classes)
    }

    /// Persist parameters; the format is up to the implementation
    fn save(&self, path: &Path) -> Result<()>;
}
