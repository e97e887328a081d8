//! Error Handling Module
//!
//! Error kinds raised by the domain adaptation pipeline. Iteration-local
//! degeneracies (an empty consensus pool) are logged and tolerated; the rest are
//! fatal and abort the run before anything is saved.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the tri-training pipeline
#[derive(Error, Debug)]
pub enum AdaptationError {
    /// No target example passed consensus and threshold in this step.
    /// Not fatal: the mixed batch falls back to the boost seed alone.
    #[error("Step {step}: no pseudo-label passed consensus and threshold")]
    EmptyConsensus { step: usize },

    /// A class is absent from the mixed batch, so balanced weights are undefined
    #[error("Class {class} missing from the mixed batch; balanced weights need all {num_classes} classes present")]
    MissingClassWeight { class: usize, num_classes: usize },

    /// Pretrained weights absent or incompatible with the head configuration
    #[error("Failed to load model from '{0}': {1}")]
    ModelLoad(PathBuf, String),

    /// Error with dataset files or dataset construction
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Error with model operations
    #[error("Model error: {0}")]
    Model(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl AdaptationError {
    /// Whether the error must terminate the adaptation run
    pub fn is_fatal(&self) -> bool {
        !matches!(self, AdaptationError::EmptyConsensus { .. })
    }
}

impl From<serde_json::Error> for AdaptationError {
    fn from(err: serde_json::Error) -> Self {
        AdaptationError::Serialization(err.to_string())
    }
}

/// Convenience Result type for adaptation operations
pub type Result<T> = std::result::Result<T, AdaptationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AdaptationError::Dataset("test error".to_string());
        assert_eq!(format!("{}", err), "Dataset error: test error");
    }

    #[test]
    fn test_missing_class_display() {
        let err = AdaptationError::MissingClassWeight {
            class: 7,
            num_classes: 10,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Class 7"));
        assert!(msg.contains("10 classes"));
    }

    #[test]
    fn test_model_load_error() {
        let path = PathBuf::from("/output/w.mpk");
        let err = AdaptationError::ModelLoad(path, "file not found".to_string());
        assert!(format!("{}", err).contains("w.mpk"));
    }

    #[test]
    fn test_fatality() {
        assert!(!AdaptationError::EmptyConsensus { step: 3 }.is_fatal());
        assert!(AdaptationError::MissingClassWeight {
            class: 0,
            num_classes: 10
        }
        .is_fatal());
        assert!(AdaptationError::Config("bad".to_string()).is_fatal());
    }
}
