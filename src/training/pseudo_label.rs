//! Consensus pseudo-labeling for asymmetric tri-training
//!
//! A target image becomes a pseudo-labeled candidate only when:
//! 1. all three heads predict the same class (2-of-3 is not enough), and
//! 2. the mean of the three heads' top probabilities is strictly above the
//!    threshold.
//!
//! Selection is a pure function of the predictions: no randomness, output in
//! pool order, and an empty result is a valid outcome.

use serde::{Deserialize, Serialize};

use crate::dataset::{ImageSet, OneHotLabels};
use crate::model::{HeadId, HeadPredictions};
use crate::utils::error::{AdaptationError, Result};

/// Accepted candidates of one selection pass
#[derive(Debug, Clone)]
pub struct PseudoLabelSet {
    pub images: ImageSet,
    /// Agreed class per accepted image
    pub labels: Vec<usize>,
    /// Index of each accepted image in the pool
    pub indices: Vec<usize>,
}

impl PseudoLabelSet {
    pub fn empty(channels: usize, height: usize, width: usize) -> Self {
        Self {
            images: ImageSet::empty(channels, height, width),
            labels: Vec::new(),
            indices: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn one_hot(&self, num_classes: usize) -> Result<OneHotLabels> {
        OneHotLabels::from_indices(&self.labels, num_classes)
    }

    /// Fraction of pseudo-labels matching held-out ground truth of the pool.
    ///
    /// Reporting only; `None` when nothing was selected.
    pub fn accuracy_against(&self, pool_labels: &[usize]) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        let correct = self
            .indices
            .iter()
            .zip(&self.labels)
            .filter(|&(&idx, &label)| pool_labels.get(idx) == Some(&label))
            .count();
        Some(correct as f64 / self.len() as f64)
    }
}

/// Counters of one selection pass
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectionStats {
    pub processed: usize,
    pub accepted: usize,
    pub rejected_disagreement: usize,
    pub rejected_low_confidence: usize,
}

impl SelectionStats {
    pub fn acceptance_rate(&self) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            self.accepted as f64 / self.processed as f64
        }
    }
}

/// Decision for a single pool index; `Ok(class)` when accepted
fn decide(predictions: &HeadPredictions, idx: usize, threshold: f64) -> std::result::Result<usize, Rejection> {
    let [h1, h2, h3] = HeadId::ALL.map(|h| predictions.head(h));

    let class = h1.argmax(idx);
    if h2.argmax(idx) != class || h3.argmax(idx) != class {
        return Err(Rejection::Disagreement);
    }

    let mean_confidence = (h1.max_prob(idx) + h2.max_prob(idx) + h3.max_prob(idx)) / 3.0;
    if mean_confidence > threshold {
        Ok(class)
    } else {
        Err(Rejection::LowConfidence)
    }
}

enum Rejection {
    Disagreement,
    LowConfidence,
}

/// Select consensus pseudo-labels from `predictions` over `pool`
pub fn select(
    predictions: &HeadPredictions,
    pool: &ImageSet,
    threshold: f64,
) -> Result<(PseudoLabelSet, SelectionStats)> {
    if predictions.len() != pool.len() {
        return Err(AdaptationError::InvalidInput(format!(
            "{} predictions for {} pool images",
            predictions.len(),
            pool.len()
        )));
    }

    let mut stats = SelectionStats {
        processed: pool.len(),
        ..Default::default()
    };
    let mut labels = Vec::new();
    let mut indices = Vec::new();

    for idx in 0..pool.len() {
        match decide(predictions, idx, threshold) {
            Ok(class) => {
                labels.push(class);
                indices.push(idx);
            }
            Err(Rejection::Disagreement) => stats.rejected_disagreement += 1,
            Err(Rejection::LowConfidence) => stats.rejected_low_confidence += 1,
        }
    }
    stats.accepted = indices.len();

    Ok((
        PseudoLabelSet {
            images: pool.select(&indices),
            labels,
            indices,
        },
        stats,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProbabilityBatch;

    fn batch(rows: &[[f64; 2]]) -> ProbabilityBatch {
        ProbabilityBatch::new(rows.iter().flatten().copied().collect(), 2).unwrap()
    }

    fn pool(n: usize) -> ImageSet {
        ImageSet::new((0..n).map(|i| i as f32).collect(), n, 1, 1, 1).unwrap()
    }

    #[test]
    fn test_unanimous_confident_is_selected() {
        let p = batch(&[[0.01, 0.99], [0.99, 0.01]]);
        let predictions = HeadPredictions::new([p.clone(), p.clone(), p]).unwrap();

        let (set, stats) = select(&predictions, &pool(2), 0.98).unwrap();
        assert_eq!(set.labels, vec![1, 0]);
        assert_eq!(set.indices, vec![0, 1]);
        assert_eq!(set.images.image(1)[0], 1.0);
        assert_eq!(stats.accepted, 2);
    }

    #[test]
    fn test_two_of_three_is_rejected() {
        let agree = batch(&[[0.0, 1.0]]);
        let other = batch(&[[1.0, 0.0]]);
        let predictions = HeadPredictions::new([agree.clone(), agree, other]).unwrap();

        let (set, stats) = select(&predictions, &pool(1), 0.5).unwrap();
        assert!(set.is_empty());
        assert_eq!(stats.rejected_disagreement, 1);
    }

    #[test]
    fn test_threshold_is_strict() {
        let at = batch(&[[0.98, 0.02]]);
        let predictions = HeadPredictions::new([at.clone(), at.clone(), at]).unwrap();
        let (set, stats) = select(&predictions, &pool(1), 0.98).unwrap();
        assert!(set.is_empty());
        assert_eq!(stats.rejected_low_confidence, 1);

        let above = batch(&[[0.980001, 0.019999]]);
        let predictions = HeadPredictions::new([above.clone(), above.clone(), above]).unwrap();
        let (set, _) = select(&predictions, &pool(1), 0.98).unwrap();
        assert_eq!(set.labels, vec![0]);
    }

    #[test]
    fn test_mean_confidence_across_heads() {
        // Heads at 1.0, 1.0, 0.94: mean 0.98, not above the threshold
        let sure = batch(&[[1.0, 0.0]]);
        let less = batch(&[[0.94, 0.06]]);
        let predictions = HeadPredictions::new([sure.clone(), sure, less]).unwrap();
        let (set, _) = select(&predictions, &pool(1), 0.98).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_size_mismatch_is_an_error() {
        let p = batch(&[[0.5, 0.5]]);
        let predictions = HeadPredictions::new([p.clone(), p.clone(), p]).unwrap();
        assert!(select(&predictions, &pool(2), 0.9).is_err());
    }

    #[test]
    fn test_pseudo_label_accuracy() {
        let set = PseudoLabelSet {
            images: pool(2),
            labels: vec![3, 4],
            indices: vec![0, 5],
        };
        let truth = [3, 0, 0, 0, 0, 1];
        assert_eq!(set.accuracy_against(&truth), Some(0.5));
        assert_eq!(PseudoLabelSet::empty(1, 1, 1).accuracy_against(&truth), None);
    }
}
