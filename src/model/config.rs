//! Model Configuration Module
//!
//! Network shape for the tri-head classifier and the typed per-head loss
//! specification. The loss specification is validated once, when a classifier is
//! constructed.

use burn::config::Config;
use serde::{Deserialize, Serialize};

use super::HeadId;
use crate::utils::error::AdaptationError;

/// Configuration for the tri-head network
#[derive(Config, Debug)]
pub struct TriHeadConfig {
    /// Number of output classes
    #[config(default = "10")]
    pub num_classes: usize,

    /// Number of input channels
    #[config(default = "3")]
    pub in_channels: usize,

    /// Input side length (square images)
    #[config(default = "28")]
    pub image_side: usize,

    /// Filters in both backbone convolutions
    #[config(default = "48")]
    pub filters: usize,

    /// Backbone convolution kernel size
    #[config(default = "5")]
    pub kernel_size: usize,

    /// Dropout rate used throughout the network
    #[config(default = "0.5")]
    pub dropout: f64,

    /// Standard deviation of the additive Gaussian noise layers
    #[config(default = "0.75")]
    pub noise_std: f64,
}

impl TriHeadConfig {
    /// Heavily regularised variant for source pretraining
    pub fn source() -> Self {
        Self::new()
    }

    /// Lightly regularised variant that receives the pretrained weights for adaptation
    pub fn adaptation() -> Self {
        Self::new().with_dropout(0.05).with_noise_std(0.075)
    }

    /// Flattened backbone feature size (two 2x2 poolings)
    pub fn feature_size(&self) -> usize {
        let side = self.image_side / 4;
        self.filters * side * side
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::utils::error::Result<()> {
        if self.num_classes < 2 {
            return Err(AdaptationError::Config(
                "num_classes must be at least 2".to_string(),
            ));
        }
        if self.image_side < 4 {
            return Err(AdaptationError::Config(
                "image_side must allow two 2x2 poolings".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(AdaptationError::Config(
                "dropout must be in range [0.0, 1.0)".to_string(),
            ));
        }
        if self.noise_std < 0.0 {
            return Err(AdaptationError::Config(
                "noise_std must be non-negative".to_string(),
            ));
        }
        if self.kernel_size % 2 == 0 {
            return Err(AdaptationError::Config(
                "kernel_size must be odd for same padding".to_string(),
            ));
        }
        Ok(())
    }
}

/// Loss function applied to a head
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LossKind {
    #[default]
    CategoricalCrossEntropy,
}

/// Loss kind and scalar weight of one head
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct HeadLoss {
    pub kind: LossKind,
    pub weight: f64,
}

impl HeadLoss {
    pub fn cross_entropy(weight: f64) -> Self {
        Self {
            kind: LossKind::CategoricalCrossEntropy,
            weight,
        }
    }
}

/// Per-head loss specification, indexed by [`HeadId`]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LossSpec {
    pub heads: [HeadLoss; 3],
}

impl LossSpec {
    /// Equal weights for source pretraining
    pub fn source() -> Self {
        Self {
            heads: [HeadLoss::cross_entropy(1.0); 3],
        }
    }

    /// Labeler heads at 0.5, target head at 0.25
    pub fn adaptation() -> Self {
        Self {
            heads: [
                HeadLoss::cross_entropy(0.5),
                HeadLoss::cross_entropy(0.5),
                HeadLoss::cross_entropy(0.25),
            ],
        }
    }

    pub fn head(&self, head: HeadId) -> HeadLoss {
        self.heads[head.index()]
    }

    /// Weights must be finite and non-negative, with at least one positive
    pub fn validate(&self) -> crate::utils::error::Result<()> {
        for head in HeadId::ALL {
            let w = self.head(head).weight;
            if !w.is_finite() || w < 0.0 {
                return Err(AdaptationError::Config(format!(
                    "loss weight for {} must be finite and non-negative, got {}",
                    head, w
                )));
            }
        }
        if self.heads.iter().all(|h| h.weight == 0.0) {
            return Err(AdaptationError::Config(
                "at least one head needs a positive loss weight".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adaptation_config_lowers_regularisation() {
        let source = TriHeadConfig::source();
        let adapt = TriHeadConfig::adaptation();
        assert_eq!(source.dropout, 0.5);
        assert_eq!(adapt.dropout, 0.05);
        assert_eq!(adapt.noise_std, 0.075);
        assert_eq!(source.filters, adapt.filters);
    }

    #[test]
    fn test_feature_size() {
        // 28 -> 14 -> 7 after two poolings
        assert_eq!(TriHeadConfig::new().feature_size(), 48 * 7 * 7);
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = TriHeadConfig::adaptation().with_num_classes(4);
        let json = serde_json::to_string(&config).unwrap();
        let back: TriHeadConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(back.num_classes, 4);
        assert_eq!(back.dropout, 0.05);
        assert_eq!(back.noise_std, 0.075);
        assert!(back.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        assert!(TriHeadConfig::new().validate().is_ok());
        assert!(TriHeadConfig::new().with_dropout(1.0).validate().is_err());
        assert!(TriHeadConfig::new().with_kernel_size(4).validate().is_err());
    }

    #[test]
    fn test_loss_spec_weights() {
        let spec = LossSpec::adaptation();
        assert_eq!(spec.head(HeadId::Head1).weight, 0.5);
        assert_eq!(spec.head(HeadId::Head2).weight, 0.5);
        assert_eq!(spec.head(HeadId::Head3).weight, 0.25);
        assert!(spec.validate().is_ok());
        assert!(LossSpec::source().validate().is_ok());
    }

    #[test]
    fn test_loss_spec_rejects_bad_weights() {
        let mut spec = LossSpec::adaptation();
        spec.heads[1].weight = f64::NAN;
        assert!(spec.validate().is_err());

        let zero = LossSpec {
            heads: [HeadLoss::cross_entropy(0.0); 3],
        };
        assert!(zero.validate().is_err());
    }
}
