//! Source-domain pretraining and adaptation-model initialisation
//!
//! Pretraining fits all three heads on labeled MNIST with equal loss weights
//! and the heavily regularised network, then saves `w.mpk`. Adaptation always
//! starts from that checkpoint, loaded into the lightly regularised variant.

use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::AdaptationConfig;
use crate::dataset::{LabeledSet, SourceDomain};
use crate::model::{FeatureBackboneClassifier, LossSpec, TriHeadClassifier, TriHeadConfig};
use crate::training::class_weight::ClassWeights;
use crate::utils::error::Result;
use crate::utils::logging::StepLogger;
use crate::utils::metrics::HeadAccuracy;

/// One pretraining epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEpoch {
    pub epoch: usize,
    pub loss: f64,
    /// Per-head accuracy on the held-out tail, when there is one
    pub validation: Option<HeadAccuracy>,
}

/// Outcome of source pretraining
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceReport {
    pub epochs: Vec<SourceEpoch>,
    pub train_samples: usize,
    pub validation_samples: usize,
    /// Per-head accuracy on the source test split
    pub test: HeadAccuracy,
}

/// Number of trailing examples held out, Keras style: `n - floor(n * (1 - split))`
pub fn validation_tail(len: usize, split: f64) -> usize {
    let kept = (len as f64 * (1.0 - split)).floor() as usize;
    len - kept.min(len)
}

/// Split off the validation tail
pub fn split_source(train: &LabeledSet, split: f64) -> (LabeledSet, LabeledSet) {
    train.split_tail(validation_tail(train.len(), split))
}

/// Train a fresh classifier on the source domain and save it as `w.mpk`
pub fn pretrain_source<B: AutodiffBackend>(
    source: &SourceDomain,
    config: &AdaptationConfig,
    device: B::Device,
) -> Result<(TriHeadClassifier<B>, SourceReport)> {
    let mut classifier = TriHeadClassifier::<B>::new(
        TriHeadConfig::source().with_num_classes(config.num_classes),
        LossSpec::source(),
        config.lr_source,
        config.source_batch_size,
        config.seed,
        device,
    )?;

    let (train, validation) = split_source(&source.train, config.source_validation_split);
    info!(
        "Source pretraining: {} train / {} validation images, {} epochs",
        train.len(),
        validation.len(),
        config.epoch_source
    );

    let uniform = ClassWeights::uniform(config.num_classes);
    let mut logger = StepLogger::new("Source epoch", config.epoch_source);
    let mut epochs = Vec::with_capacity(config.epoch_source);

    let labels = &train.labels;
    classifier.fit_epochs(
        &train.images,
        [labels, labels, labels],
        &uniform,
        config.epoch_source,
        |epoch, fit, model| {
            let validation_accuracy = if validation.is_empty() {
                None
            } else {
                Some(model.evaluate_one_hot(&validation.images, &validation.labels)?)
            };

            match &validation_accuracy {
                Some(acc) => info!(
                    "Source epoch {}/{}: loss = {:.4}, val {}",
                    epoch + 1,
                    config.epoch_source,
                    fit.loss,
                    acc
                ),
                None => info!(
                    "Source epoch {}/{}: loss = {:.4}",
                    epoch + 1,
                    config.epoch_source,
                    fit.loss
                ),
            }
            logger.end_step(epoch + 1);
            if epoch + 1 < config.epoch_source {
                logger.start_step(epoch + 2);
            }

            epochs.push(SourceEpoch {
                epoch: epoch + 1,
                loss: fit.loss,
                validation: validation_accuracy,
            });
            Ok(())
        },
    )?;
    logger.finish();

    let test = classifier.evaluate_one_hot(&source.test.images, &source.test.labels)?;
    info!("Source test accuracy: {}", test);

    classifier.save(&config.source_weights_path())?;

    Ok((
        classifier,
        SourceReport {
            epochs,
            train_samples: train.len(),
            validation_samples: validation.len(),
            test,
        },
    ))
}

/// The adaptation classifier: pretrained weights, low regularisation,
/// adaptation loss weights and `lr_target`
pub fn load_adaptation_model<B: AutodiffBackend>(
    config: &AdaptationConfig,
    device: B::Device,
) -> Result<TriHeadClassifier<B>> {
    TriHeadClassifier::load(
        &config.source_weights_path(),
        TriHeadConfig::adaptation().with_num_classes(config.num_classes),
        LossSpec::adaptation(),
        config.lr_target,
        config.target_batch_size,
        config.seed,
        device,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TrainingBackend;
    use crate::dataset::{ImageSet, OneHotLabels};
    use crate::utils::error::AdaptationError;
    use tempfile::TempDir;

    #[test]
    fn test_validation_tail() {
        assert_eq!(validation_tail(60000, 0.1), 6000);
        assert_eq!(validation_tail(15, 0.1), 2);
        assert_eq!(validation_tail(10, 0.0), 0);
    }

    #[test]
    fn test_split_keeps_order() {
        let images = ImageSet::new((0..10).map(|i| i as f32).collect(), 10, 1, 1, 1).unwrap();
        let labels = OneHotLabels::from_indices(&[0; 10], 2).unwrap();
        let set = LabeledSet::new(images, labels).unwrap();

        let (train, val) = split_source(&set, 0.2);
        assert_eq!(train.len(), 8);
        assert_eq!(val.len(), 2);
        assert_eq!(val.images.image(0)[0], 8.0);
    }

    #[test]
    fn test_missing_pretrained_weights() {
        let dir = TempDir::new().unwrap();
        let config = AdaptationConfig {
            output_folder: dir.path().to_path_buf(),
            ..Default::default()
        };
        let result = load_adaptation_model::<TrainingBackend>(&config, Default::default());
        assert!(matches!(result, Err(AdaptationError::ModelLoad(_, _))));
    }
}
