//! Run configuration for source pretraining and tri-training adaptation
//!
//! Built once at startup (defaults, then an optional JSON file, then CLI flags),
//! validated, and handed to every component by reference.

use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::training::boost::{MixSchedule, SamplingPolicy};
use crate::utils::error::{AdaptationError, Result};
use crate::utils::metrics::EvaluationHead;

/// Source pretraining checkpoint, relative to `output_folder`
pub const SOURCE_WEIGHTS: &str = "w";
/// Adapted checkpoint, relative to `output_folder`
pub const ADAPTED_WEIGHTS: &str = "da_w";
/// Run summary, relative to `output_folder`
pub const REPORT_FILE: &str = "adaptation_report.json";

/// All options of one adaptation run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AdaptationConfig {
    /// Pretrain on the source domain first; otherwise load `w.mpk`
    pub train_fresh: bool,
    /// Write charts and pseudo-label previews; no effect on training
    pub enable_plot: bool,
    /// Size of the labeled target boost seed
    pub n_boost: usize,
    /// Mean top-probability a consensus label must exceed
    pub label_threshold: f64,
    pub lr_source: f64,
    pub lr_target: f64,
    pub epoch_source: usize,
    /// Configured loop length; see [`AdaptationConfig::executed_steps`]
    pub domain_adaptation_steps: usize,
    pub output_folder: PathBuf,
    pub seed: u64,
    pub source_batch_size: usize,
    pub target_batch_size: usize,
    /// Tail fraction of the source set held out during pretraining
    pub source_validation_split: f64,
    pub mix_schedule: MixSchedule,
    pub candidate_sampling: SamplingPolicy,
    /// Start the loop at step 1 instead of step 0
    pub skip_initial_step: bool,
    /// Aggregate reported as "validation accuracy"
    pub evaluation_head: EvaluationHead,
    pub num_classes: usize,
}

impl Default for AdaptationConfig {
    fn default() -> Self {
        Self {
            train_fresh: false,
            enable_plot: false,
            n_boost: 500,
            label_threshold: 0.98,
            lr_source: 0.0001,
            lr_target: 0.0001,
            epoch_source: 15,
            domain_adaptation_steps: 30,
            output_folder: PathBuf::from("output"),
            seed: 42,
            source_batch_size: 124,
            target_batch_size: 64,
            source_validation_split: 0.1,
            mix_schedule: MixSchedule::default(),
            candidate_sampling: SamplingPolicy::default(),
            skip_initial_step: true,
            evaluation_head: EvaluationHead::default(),
            num_classes: 10,
        }
    }
}

impl AdaptationConfig {
    /// Step indices the loop executes.
    ///
    /// With `skip_initial_step` the loop runs `1..domain_adaptation_steps`,
    /// i.e. one iteration fewer than configured.
    pub fn executed_steps(&self) -> Range<usize> {
        let start = if self.skip_initial_step { 1 } else { 0 };
        start..self.domain_adaptation_steps.max(start)
    }

    pub fn source_weights_path(&self) -> PathBuf {
        self.output_folder.join(SOURCE_WEIGHTS)
    }

    pub fn adapted_weights_path(&self) -> PathBuf {
        self.output_folder.join(ADAPTED_WEIGHTS)
    }

    pub fn report_path(&self) -> PathBuf {
        self.output_folder.join(REPORT_FILE)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !(self.label_threshold > 0.0 && self.label_threshold < 1.0) {
            return Err(AdaptationError::Config(format!(
                "label_threshold must be in (0, 1), got {}",
                self.label_threshold
            )));
        }
        for (name, lr) in [("lr_source", self.lr_source), ("lr_target", self.lr_target)] {
            if !(lr > 0.0 && lr.is_finite()) {
                return Err(AdaptationError::Config(format!(
                    "{} must be a positive number, got {}",
                    name, lr
                )));
            }
        }
        if self.source_batch_size == 0 || self.target_batch_size == 0 {
            return Err(AdaptationError::Config(
                "batch sizes must be > 0".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.source_validation_split) {
            return Err(AdaptationError::Config(
                "source_validation_split must be in [0, 1)".to_string(),
            ));
        }
        if self.mix_schedule.scale == 0 {
            return Err(AdaptationError::Config(
                "mix_schedule.scale must be > 0".to_string(),
            ));
        }
        if self.num_classes < 2 {
            return Err(AdaptationError::Config(
                "num_classes must be at least 2".to_string(),
            ));
        }
        Ok(())
    }

    /// Load from a JSON file; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
