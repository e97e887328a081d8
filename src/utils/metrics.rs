//! Metrics Module for Model Evaluation
//!
//! Accuracy bookkeeping for the three classifier heads. Evaluation labels are the
//! same for every head, so each head gets its own accuracy and a single
//! aggregate is chosen explicitly by [`EvaluationHead`].

use serde::{Deserialize, Serialize};

use crate::model::HeadId;

/// Which head (or combination) provides the reported accuracy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationHead {
    Head1,
    Head2,
    /// The always-trained target head
    #[default]
    Head3,
    /// Mean of the three heads
    Mean,
}

impl EvaluationHead {
    /// Parse from a CLI string ("head1", "head2", "head3", "mean")
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "head1" | "1" => Some(Self::Head1),
            "head2" | "2" => Some(Self::Head2),
            "head3" | "3" => Some(Self::Head3),
            "mean" => Some(Self::Mean),
            _ => None,
        }
    }
}

impl std::str::FromStr for EvaluationHead {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| {
            format!("unknown evaluation head '{}', expected head1, head2, head3 or mean", s)
        })
    }
}

/// Per-head accuracy on one evaluation set
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct HeadAccuracy {
    /// Accuracy of head 1, head 2 and head 3 in [0, 1]
    pub per_head: [f64; 3],
    /// Number of evaluated samples
    pub samples: usize,
}

impl HeadAccuracy {
    /// Build from per-head predicted classes and ground truth
    pub fn from_predictions(predictions: [&[usize]; 3], ground_truth: &[usize]) -> Self {
        let per_head = predictions.map(|preds| accuracy(preds, ground_truth));
        Self {
            per_head,
            samples: ground_truth.len(),
        }
    }

    /// Accuracy of a single head
    pub fn head(&self, head: HeadId) -> f64 {
        self.per_head[head.index()]
    }

    /// Mean accuracy across heads
    pub fn mean(&self) -> f64 {
        self.per_head.iter().sum::<f64>() / 3.0
    }

    /// The aggregate selected by `choice`
    pub fn aggregate(&self, choice: EvaluationHead) -> f64 {
        match choice {
            EvaluationHead::Head1 => self.head(HeadId::Head1),
            EvaluationHead::Head2 => self.head(HeadId::Head2),
            EvaluationHead::Head3 => self.head(HeadId::Head3),
            EvaluationHead::Mean => self.mean(),
        }
    }
}

impl std::fmt::Display for HeadAccuracy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "head1 {:.2}% | head2 {:.2}% | head3 {:.2}% ({} samples)",
            self.per_head[0] * 100.0,
            self.per_head[1] * 100.0,
            self.per_head[2] * 100.0,
            self.samples
        )
    }
}

/// Fraction of matching entries; 0.0 for empty input
pub fn accuracy(predictions: &[usize], ground_truth: &[usize]) -> f64 {
    assert_eq!(
        predictions.len(),
        ground_truth.len(),
        "Predictions and ground truth must have same length"
    );

    if ground_truth.is_empty() {
        return 0.0;
    }

    let correct = predictions
        .iter()
        .zip(ground_truth.iter())
        .filter(|(p, g)| p == g)
        .count();

    correct as f64 / ground_truth.len() as f64
}
