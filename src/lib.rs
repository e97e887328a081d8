//! # Embedded Asymmetric Tri-Training
//!
//! Unsupervised domain adaptation of a small three-headed CNN from MNIST to
//! MNIST-M with the Burn framework, sized so the adapted network can be
//! exported to a microcontroller.
//!
//! ## Modules
//!
//! - `dataset`: IDX loading for MNIST and construction/loading of MNIST-M
//! - `model`: the tri-head network, its classifier contract and weight export
//! - `training`: pseudo-label selection, boost seed mixing, class weights,
//!   the tri-training controller and source pretraining
//! - `config`: the run configuration
//! - `utils`: logging, metrics, charts and error types
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use embedded_atda::backend::{default_device, TrainingBackend};
//! use embedded_atda::config::AdaptationConfig;
//! use embedded_atda::dataset::load_mnistm;
//! use embedded_atda::training::{load_adaptation_model, TriTrainingController};
//!
//! let config = AdaptationConfig::default();
//! let target = load_mnistm("data/mnistm".as_ref())?;
//! let model = load_adaptation_model::<TrainingBackend>(&config, default_device())?;
//! let mut controller = TriTrainingController::new(model, &config, &target)?;
//! controller.run()?;
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod model;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::AdaptationConfig;
pub use dataset::{ImageSet, OneHotLabels, SourceDomain, TargetDomain, NUM_CLASSES};
pub use model::{FeatureBackboneClassifier, HeadId, HeadPredictions, TriHeadClassifier};
pub use training::{AdaptationReport, TriTrainingController};
pub use utils::error::{AdaptationError, Result};
pub use utils::metrics::{EvaluationHead, HeadAccuracy};
