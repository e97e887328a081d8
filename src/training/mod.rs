//! Training module: source pretraining and tri-training domain adaptation
//!
//! This module provides:
//! - Consensus pseudo-label selection across the three heads
//! - The boost seed and the per-step mixed batch
//! - Balanced class weights for the mixed batch
//! - The tri-training controller that runs the adaptation loop
//! - Source-domain pretraining
//!
//! ## Asymmetric Tri-Training
//!
//! 1. Pretrain all heads on the labeled source domain
//! 2. Label the target pool where all three heads agree with high confidence
//! 3. Mix a growing sample of those labels with a small labeled target seed
//! 4. Fit with heads 1 and 2 alternately frozen, head 3 always trained
//! 5. Repeat for the configured number of steps

pub mod boost;
pub mod class_weight;
pub mod pseudo_label;
pub mod source;
pub mod tri_training;

// Re-export main types for convenience
pub use boost::{draw_boost_seed, mix, BoostSeed, MixSchedule, MixedTrainingBatch, SamplingPolicy};
pub use class_weight::ClassWeights;
pub use pseudo_label::{select, PseudoLabelSet, SelectionStats};
pub use source::{load_adaptation_model, pretrain_source, SourceReport};
pub use tri_training::{head_trainability, AdaptationReport, Phase, StepReport, TriTrainingController};
