//! Asymmetric tri-training controller
//!
//! Drives the adaptation run through `Init -> PretrainEvaluated -> Iterating*
//! -> Saved`. Each step is a blocking sequence:
//!
//! 1. predict the whole target pool and keep the consensus pseudo-labels
//! 2. mix them with the fixed boost seed
//! 3. rotate head trainability (head 3 always trains)
//! 4. compute balanced class weights over the mixed batch
//! 5. fit one epoch, then evaluate on the held-out target validation split
//!
//! An empty consensus pool is logged and tolerated. Any other error aborts the
//! run, and nothing is saved unless every step completed.

use chrono::Local;
use rand::seq::index;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::boost::{draw_boost_seed, mix, BoostSeed};
use super::class_weight::ClassWeights;
use super::pseudo_label::{select, PseudoLabelSet, SelectionStats};
use crate::config::AdaptationConfig;
use crate::dataset::TargetDomain;
use crate::model::{FeatureBackboneClassifier, HeadId};
use crate::utils::charts::{
    generate_line_chart, save_preview_grid, DataPoint, DataSeries, COLOR_PRIMARY, COLOR_SECONDARY,
    COLOR_TERTIARY,
};
use crate::utils::error::{AdaptationError, Result};
use crate::utils::logging::StepLogger;
use crate::utils::metrics::HeadAccuracy;

/// Pseudo-label previews per step
const PREVIEW_COUNT: usize = 4;
/// Keeps the preview stream independent from the training stream
const PREVIEW_SEED_OFFSET: u64 = 0x9e37_79b9;

/// Which heads train at `step`: head 1 on even steps, head 2 on odd steps, head 3 always
pub fn head_trainability(step: usize) -> [bool; 3] {
    let even = step % 2 == 0;
    [even, !even, true]
}

fn step_series<F>(steps: &[StepReport], name: &str, color: &str, value: F) -> DataSeries
where
    F: Fn(&StepReport) -> Option<f64>,
{
    DataSeries {
        name: name.to_string(),
        points: steps
            .iter()
            .filter_map(|s| {
                value(s).map(|y| DataPoint {
                    x: s.step as f64,
                    y: y * 100.0,
                    label: None,
                })
            })
            .collect(),
        color: color.to_string(),
    }
}

/// Chart series of a run, in percent: validation accuracy, share of the pool
/// that passed consensus, and pseudo-label accuracy on steps that selected any
pub fn history_series(steps: &[StepReport]) -> Vec<DataSeries> {
    vec![
        step_series(steps, "Validation accuracy", COLOR_PRIMARY, |s| {
            Some(s.validation_accuracy)
        }),
        step_series(steps, "Pseudo-labeled share of pool", COLOR_SECONDARY, |s| {
            Some(s.selection.acceptance_rate())
        }),
        step_series(steps, "Pseudo-label accuracy", COLOR_TERTIARY, |s| {
            s.pseudo_label_accuracy
        }),
    ]
}

/// Lifecycle of one adaptation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "phase")]
pub enum Phase {
    Init,
    PretrainEvaluated,
    Iterating { step: usize },
    Saved,
}

/// Outcome of one adaptation step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub step: usize,
    pub trainable: [bool; 3],
    /// Consensus pseudo-labels found this step
    pub pool_size: usize,
    pub selection: SelectionStats,
    /// Boost seed plus sampled pseudo-labels
    pub mixed_size: usize,
    pub sampled: usize,
    pub class_weights: Vec<f64>,
    pub train_loss: f64,
    pub accuracy: HeadAccuracy,
    /// Aggregate chosen by `evaluation_head`
    pub validation_accuracy: f64,
    /// Share of pseudo-labels matching the held-out pool labels
    pub pseudo_label_accuracy: Option<f64>,
    /// No pseudo-label passed consensus; trained on the boost seed alone
    pub degenerate: bool,
}

/// Summary written next to the adapted weights
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptationReport {
    pub config: AdaptationConfig,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub boost_seed_size: usize,
    pub target_pool_size: usize,
    pub baseline: Option<HeadAccuracy>,
    pub steps: Vec<StepReport>,
    pub final_accuracy: Option<HeadAccuracy>,
}

impl AdaptationReport {
    fn new(config: &AdaptationConfig, target_pool_size: usize) -> Self {
        Self {
            config: config.clone(),
            started_at: Local::now().to_rfc3339(),
            finished_at: None,
            boost_seed_size: 0,
            target_pool_size,
            baseline: None,
            steps: Vec::new(),
            final_accuracy: None,
        }
    }

    /// Steps that ran on the boost seed alone
    pub fn degenerate_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.degenerate).count()
    }
}

/// Owns the model for the lifetime of the run
pub struct TriTrainingController<'a, M: FeatureBackboneClassifier> {
    model: M,
    config: &'a AdaptationConfig,
    target: &'a TargetDomain,
    boost: BoostSeed,
    phase: Phase,
    rng: ChaCha8Rng,
    preview_rng: ChaCha8Rng,
    report: AdaptationReport,
}

impl<'a, M: FeatureBackboneClassifier> TriTrainingController<'a, M> {
    /// Init: take the pretrained model and the target domain, draw the boost seed
    pub fn new(model: M, config: &'a AdaptationConfig, target: &'a TargetDomain) -> Result<Self> {
        config.validate()?;
        if model.num_classes() != config.num_classes {
            return Err(AdaptationError::Config(format!(
                "model has {} classes, configuration expects {}",
                model.num_classes(),
                config.num_classes
            )));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let boost = draw_boost_seed(
            &target.pool,
            &target.pool_labels,
            config.n_boost,
            config.num_classes,
            &mut rng,
        )?;
        info!(
            "Boost seed: {} labeled target images out of {}",
            boost.len(),
            target.pool.len()
        );

        let mut report = AdaptationReport::new(config, target.pool.len());
        report.boost_seed_size = boost.len();

        Ok(Self {
            model,
            config,
            target,
            boost,
            phase: Phase::Init,
            rng,
            preview_rng: ChaCha8Rng::seed_from_u64(config.seed ^ PREVIEW_SEED_OFFSET),
            report,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn boost_seed(&self) -> &BoostSeed {
        &self.boost
    }

    pub fn report(&self) -> &AdaptationReport {
        &self.report
    }

    pub fn into_model(self) -> M {
        self.model
    }

    fn evaluate(&self) -> Result<HeadAccuracy> {
        self.model
            .evaluate(&self.target.validation, &self.target.validation_labels)
    }

    /// Init -> PretrainEvaluated: baseline accuracy on the target validation split
    pub fn evaluate_baseline(&mut self) -> Result<HeadAccuracy> {
        if self.phase != Phase::Init {
            return Err(AdaptationError::InvalidInput(format!(
                "baseline evaluation requires Init, controller is in {:?}",
                self.phase
            )));
        }

        let baseline = self.evaluate()?;
        info!("Source-only accuracy on target validation data: {}", baseline);

        self.report.baseline = Some(baseline);
        self.phase = Phase::PretrainEvaluated;
        Ok(baseline)
    }

    /// One adaptation iteration
    pub fn run_step(&mut self, step: usize) -> Result<StepReport> {
        match self.phase {
            Phase::PretrainEvaluated => {}
            Phase::Iterating { step: last } if step > last => {}
            phase => {
                return Err(AdaptationError::InvalidInput(format!(
                    "cannot run step {} in phase {:?}",
                    step, phase
                )))
            }
        }
        self.phase = Phase::Iterating { step };

        // 1. Consensus pseudo-labels over the full pool
        let predictions = self.model.predict(&self.target.pool)?;
        let (candidates, selection) =
            select(&predictions, &self.target.pool, self.config.label_threshold)?;
        let degenerate = candidates.is_empty();
        if degenerate {
            warn!("{}", AdaptationError::EmptyConsensus { step });
        }

        // 2. Mix with the boost seed
        let batch = mix(
            &self.boost,
            &candidates,
            step,
            self.target.pool.len(),
            &self.config.mix_schedule,
            self.config.candidate_sampling,
            &mut self.rng,
        )?;

        // 3. Head rotation
        let trainable = head_trainability(step);
        for head in HeadId::ALL {
            self.model.set_trainable(head, trainable[head.index()]);
        }

        // 4. Balanced class weights, identical for all heads
        let class_weights = ClassWeights::balanced_one_hot(&batch.labels)?;

        // 5. Fit and evaluate
        let fit = self.model.fit_step(
            &batch.images,
            [&batch.labels, &batch.labels, &batch.labels],
            &class_weights,
        )?;
        let accuracy = self.evaluate()?;

        let validation_accuracy = accuracy.aggregate(self.config.evaluation_head);
        let pseudo_label_pool_size = candidates.len();
        info!(
            step,
            validation_accuracy,
            pseudo_label_pool_size,
            "Step {}: accuracy on target validation data {:.4}, pseudo-labels {}",
            step,
            validation_accuracy,
            pseudo_label_pool_size
        );
        debug!(
            "Step {}: mixed batch {} ({} sampled), loss {:.4}, per-head {}",
            step,
            batch.len(),
            batch.sampled,
            fit.loss,
            accuracy
        );

        let report = StepReport {
            step,
            trainable,
            pool_size: pseudo_label_pool_size,
            selection,
            mixed_size: batch.len(),
            sampled: batch.sampled,
            class_weights: class_weights.as_slice().to_vec(),
            train_loss: fit.loss,
            accuracy,
            validation_accuracy,
            pseudo_label_accuracy: candidates.accuracy_against(&self.target.pool_labels),
            degenerate,
        };

        if self.config.enable_plot {
            self.plot_step(step, &candidates);
        }

        self.report.steps.push(report.clone());
        Ok(report)
    }

    /// Every configured step, then Saved
    pub fn run(&mut self) -> Result<&AdaptationReport> {
        if self.phase == Phase::Init {
            self.evaluate_baseline()?;
        }

        let steps = self.config.executed_steps();
        let mut logger = StepLogger::new("Adaptation step", steps.len());
        for step in steps {
            logger.start_step(step);
            self.run_step(step)?;
            logger.end_step(step);
        }
        logger.finish();

        self.save()
    }

    /// Persist the adapted weights and the run summary. Terminal.
    pub fn save(&mut self) -> Result<&AdaptationReport> {
        match self.phase {
            Phase::PretrainEvaluated | Phase::Iterating { .. } => {}
            phase => {
                return Err(AdaptationError::InvalidInput(format!(
                    "cannot save in phase {:?}",
                    phase
                )))
            }
        }

        std::fs::create_dir_all(&self.config.output_folder)?;
        self.model.save(&self.config.adapted_weights_path())?;

        self.report.final_accuracy = self.report.steps.last().map(|s| s.accuracy).or(self.report.baseline);
        self.report.finished_at = Some(Local::now().to_rfc3339());
        std::fs::write(
            self.config.report_path(),
            serde_json::to_string_pretty(&self.report)?,
        )?;

        if self.config.enable_plot {
            self.plot_history();
        }

        self.phase = Phase::Saved;
        info!(
            "Adapted weights saved to {}",
            self.config.adapted_weights_path().display()
        );
        Ok(&self.report)
    }

    fn plot_step(&mut self, step: usize, candidates: &PseudoLabelSet) {
        if candidates.is_empty() {
            return;
        }
        let dir = self.config.output_folder.join("plots");
        let count = PREVIEW_COUNT.min(candidates.len());
        let rows = index::sample(&mut self.preview_rng, candidates.len(), count).into_vec();
        let path = dir.join(format!("pseudo_labels_step_{:02}.png", step));

        let written = std::fs::create_dir_all(&dir)
            .map_err(AdaptationError::from)
            .and_then(|_| save_preview_grid(&candidates.images, &rows, 2, &path));
        if let Err(e) = written {
            warn!("Could not write preview {}: {}", path.display(), e);
        }
    }

    fn plot_history(&self) {
        let dir = self.config.output_folder.join("plots");
        let path = dir.join("adaptation.svg");
        let written = std::fs::create_dir_all(&dir).and_then(|_| {
            generate_line_chart(
                "Tri-training adaptation",
                "Step",
                "Percent",
                &history_series(&self.report.steps),
                &path,
            )
        });
        if let Err(e) = written {
            warn!("Could not write chart {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_head_rotation() {
        assert_eq!(head_trainability(2), [true, false, true]);
        assert_eq!(head_trainability(3), [false, true, true]);
        for step in 1..50 {
            assert!(head_trainability(step)[2]);
            let t = head_trainability(step);
            assert_ne!(t[0], t[1]);
        }
    }

    fn step_report(step: usize, accepted: usize, pseudo_label_accuracy: Option<f64>) -> StepReport {
        StepReport {
            step,
            trainable: head_trainability(step),
            pool_size: accepted,
            selection: SelectionStats {
                processed: 100,
                accepted,
                rejected_disagreement: 100 - accepted,
                rejected_low_confidence: 0,
            },
            mixed_size: 50 + accepted,
            sampled: accepted,
            class_weights: vec![1.0; 10],
            train_loss: 0.3,
            accuracy: HeadAccuracy::default(),
            validation_accuracy: 0.5,
            pseudo_label_accuracy,
            degenerate: accepted == 0,
        }
    }

    #[test]
    fn test_history_series() {
        let steps = vec![step_report(1, 0, None), step_report(2, 40, Some(0.75))];
        let series = history_series(&steps);

        assert_eq!(series.len(), 3);
        assert_eq!(series[0].points.len(), 2);
        assert_eq!(series[0].points[1].y, 50.0);
        assert_eq!(series[1].points[1].y, 40.0);
        // Degenerate steps have no pseudo-label accuracy
        assert_eq!(series[2].points.len(), 1);
        assert_eq!(series[2].points[0].x, 2.0);
        assert_eq!(series[2].points[0].y, 75.0);
        assert_eq!(series[2].color, COLOR_TERTIARY);
    }

    #[test]
    fn test_phase_serialises_with_tag() {
        let json = serde_json::to_string(&Phase::Iterating { step: 3 }).unwrap();
        assert_eq!(json, r#"{"phase":"iterating","step":3}"#);
    }
}
