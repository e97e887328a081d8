//! Balanced class weights
//!
//! `weight[c] = total / (K * count[c])`, the usual "balanced" heuristic. Every
//! class must be present in the batch: a class with no samples has no finite
//! weight and is reported as [`AdaptationError::MissingClassWeight`].

use serde::{Deserialize, Serialize};

use crate::dataset::OneHotLabels;
use crate::utils::error::{AdaptationError, Result};

/// One weight per class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassWeights {
    weights: Vec<f64>,
}

impl ClassWeights {
    /// Weight 1.0 for every class
    pub fn uniform(num_classes: usize) -> Self {
        Self {
            weights: vec![1.0; num_classes],
        }
    }

    /// Balanced weights from class indices
    pub fn balanced(labels: &[usize], num_classes: usize) -> Result<Self> {
        let mut counts = vec![0usize; num_classes];
        for &label in labels {
            if label >= num_classes {
                return Err(AdaptationError::InvalidInput(format!(
                    "label {} out of range for {} classes",
                    label, num_classes
                )));
            }
            counts[label] += 1;
        }

        if let Some(class) = counts.iter().position(|&c| c == 0) {
            return Err(AdaptationError::MissingClassWeight { class, num_classes });
        }

        let total = labels.len() as f64;
        let k = num_classes as f64;
        Ok(Self {
            weights: counts.iter().map(|&c| total / (k * c as f64)).collect(),
        })
    }

    /// Balanced weights from one-hot rows
    pub fn balanced_one_hot(labels: &OneHotLabels) -> Result<Self> {
        Self::balanced(&labels.class_indices(), labels.num_classes())
    }

    pub fn num_classes(&self) -> usize {
        self.weights.len()
    }

    pub fn weight(&self, class: usize) -> f64 {
        self.weights[class]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.weights
    }

    /// Weight of every row's class
    pub fn per_sample(&self, labels: &OneHotLabels) -> Vec<f32> {
        (0..labels.len())
            .map(|i| self.weights[labels.argmax(i)] as f32)
            .collect()
    }
}
