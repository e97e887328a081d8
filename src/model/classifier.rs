//! Burn implementation of [`FeatureBackboneClassifier`]
//!
//! Training runs on an autodiff backend; prediction uses the inner backend via
//! `Module::valid()`, which also disables dropout and noise. Per-head freezing
//! is done at the gradient level: after `backward()` the backbone gradients are
//! always applied, head gradients only for heads marked trainable. Frozen heads
//! still contribute their loss to the backbone gradients.

use std::path::{Path, PathBuf};

use burn::{
    module::{AutodiffModule, Module},
    optim::{AdamConfig, GradientsParams, Optimizer},
    record::CompactRecorder,
    tensor::{
        activation::log_softmax,
        backend::{AutodiffBackend, Backend},
        ElementConversion, Tensor, TensorData,
    },
};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use super::{
    FeatureBackboneClassifier, FitReport, HeadId, HeadPredictions, LossSpec, ProbabilityBatch,
    TriHeadConfig, TriHeadNet,
};
use crate::dataset::{ImageSet, OneHotLabels};
use crate::training::class_weight::ClassWeights;
use crate::utils::error::{AdaptationError, Result};

/// Checkpoint file extension written by `CompactRecorder`
pub const CHECKPOINT_EXTENSION: &str = "mpk";

/// Batch size used for inference
const PREDICT_BATCH_SIZE: usize = 256;

/// Tri-head network plus the training state the controller does not see
pub struct TriHeadClassifier<B: AutodiffBackend> {
    net: TriHeadNet<B>,
    config: TriHeadConfig,
    loss: LossSpec,
    trainable: [bool; 3],
    learning_rate: f64,
    batch_size: usize,
    device: B::Device,
    rng: ChaCha8Rng,
}

impl<B: AutodiffBackend> TriHeadClassifier<B> {
    /// Fresh randomly initialised classifier
    pub fn new(
        config: TriHeadConfig,
        loss: LossSpec,
        learning_rate: f64,
        batch_size: usize,
        seed: u64,
        device: B::Device,
    ) -> Result<Self> {
        config.validate()?;
        loss.validate()?;
        if batch_size == 0 {
            return Err(AdaptationError::Config("batch_size must be > 0".to_string()));
        }
        if learning_rate.is_nan() || learning_rate <= 0.0 {
            return Err(AdaptationError::Config(
                "learning_rate must be positive".to_string(),
            ));
        }

        B::seed(seed);
        let net = config.init::<B>(&device);

        Ok(Self {
            net,
            config,
            loss,
            trainable: [true; 3],
            learning_rate,
            batch_size,
            device,
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }

    /// Classifier initialised from a checkpoint written by [`FeatureBackboneClassifier::save`].
    ///
    /// `path` may be given with or without the `.mpk` extension. A missing
    /// file or a parameter layout that does not match `config` is a
    /// [`AdaptationError::ModelLoad`].
    pub fn load(
        path: &Path,
        config: TriHeadConfig,
        loss: LossSpec,
        learning_rate: f64,
        batch_size: usize,
        seed: u64,
        device: B::Device,
    ) -> Result<Self> {
        let file = checkpoint_file(path);
        if !file.exists() {
            return Err(AdaptationError::ModelLoad(
                file,
                "checkpoint not found".to_string(),
            ));
        }

        let mut classifier = Self::new(config, loss, learning_rate, batch_size, seed, device)?;
        let net = classifier
            .net
            .clone()
            .load_file(file.clone(), &CompactRecorder::new(), &classifier.device)
            .map_err(|e| AdaptationError::ModelLoad(file.clone(), e.to_string()))?;
        check_layout(&net, &classifier.config).map_err(|e| AdaptationError::ModelLoad(file.clone(), e))?;
        classifier.net = net;

        info!("Loaded weights from {}", file.display());
        Ok(classifier)
    }

    pub fn net(&self) -> &TriHeadNet<B> {
        &self.net
    }

    /// Several epochs sharing one optimizer state, calling `on_epoch` after each.
    ///
    /// `fit_step` starts from a fresh optimizer every call; this is the variant
    /// for uninterrupted supervised training such as source pretraining.
    pub fn fit_epochs<F>(
        &mut self,
        images: &ImageSet,
        targets: [&OneHotLabels; 3],
        class_weights: &ClassWeights,
        epochs: usize,
        mut on_epoch: F,
    ) -> Result<Vec<FitReport>>
    where
        F: FnMut(usize, &FitReport, &Self) -> Result<()>,
    {
        let mut optimizer = AdamConfig::new().init::<B, TriHeadNet<B>>();
        let mut reports = Vec::with_capacity(epochs);

        for epoch in 0..epochs {
            let report = self.run_epoch(&mut optimizer, images, targets, class_weights)?;
            on_epoch(epoch, &report, self)?;
            reports.push(report);
        }

        Ok(reports)
    }

    fn run_epoch<O>(
        &mut self,
        optimizer: &mut O,
        images: &ImageSet,
        targets: [&OneHotLabels; 3],
        class_weights: &ClassWeights,
    ) -> Result<FitReport>
    where
        O: Optimizer<TriHeadNet<B>, B>,
    {
        let n = images.len();
        if n == 0 {
            return Err(AdaptationError::InvalidInput(
                "cannot fit on an empty batch".to_string(),
            ));
        }
        for target in targets {
            if target.len() != n {
                return Err(AdaptationError::InvalidInput(format!(
                    "{} images but {} targets",
                    n,
                    target.len()
                )));
            }
            if target.num_classes() != self.config.num_classes {
                return Err(AdaptationError::InvalidInput(format!(
                    "targets have {} classes, model has {}",
                    target.num_classes(),
                    self.config.num_classes
                )));
            }
        }
        if class_weights.num_classes() != self.config.num_classes {
            return Err(AdaptationError::InvalidInput(format!(
                "{} class weights for {} classes",
                class_weights.num_classes(),
                self.config.num_classes
            )));
        }

        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(&mut self.rng);

        let mut report = FitReport::default();
        for chunk in order.chunks(self.batch_size) {
            let batch = images.select(chunk);
            let x = images_to_tensor::<B>(&batch, &self.device);
            let logits = self.net.forward(x);

            let mut total: Option<Tensor<B, 1>> = None;
            for (head, logits) in HeadId::ALL.into_iter().zip(logits) {
                let head_targets = targets[head.index()].select(chunk);
                let y = Tensor::<B, 2>::from_data(
                    TensorData::new(
                        head_targets.values().to_vec(),
                        [chunk.len(), self.config.num_classes],
                    ),
                    &self.device,
                );
                let w = Tensor::<B, 1>::from_data(
                    TensorData::new(class_weights.per_sample(&head_targets), [chunk.len()]),
                    &self.device,
                );

                let head_loss = weighted_cross_entropy(logits, y, w);
                let value: f64 = head_loss.clone().into_scalar().elem();
                report.per_head_loss[head.index()] += value;

                let weighted = head_loss * self.loss.head(head).weight;
                total = Some(match total {
                    Some(t) => t + weighted,
                    None => weighted,
                });
            }

            let Some(loss) = total else {
                continue;
            };
            let loss_value: f64 = loss.clone().into_scalar().elem();
            report.loss += loss_value;

            let mut grads = loss.backward();
            let backbone = GradientsParams::from_module(&mut grads, &self.net.backbone);
            let mut head_grads = Vec::with_capacity(3);
            if self.trainable[0] {
                head_grads.push(GradientsParams::from_module(&mut grads, &self.net.head1));
            }
            if self.trainable[1] {
                head_grads.push(GradientsParams::from_module(&mut grads, &self.net.head2));
            }
            if self.trainable[2] {
                head_grads.push(GradientsParams::from_module(&mut grads, &self.net.head3));
            }

            self.net = optimizer.step(self.learning_rate, self.net.clone(), backbone);
            for params in head_grads {
                self.net = optimizer.step(self.learning_rate, self.net.clone(), params);
            }

            report.batches += 1;
            report.samples += chunk.len();
        }

        if report.batches > 0 {
            let batches = report.batches as f64;
            report.loss /= batches;
            for l in report.per_head_loss.iter_mut() {
                *l /= batches;
            }
        }

        debug!(
            "fit: {} samples in {} batches, loss = {:.4} (heads {:.4} / {:.4} / {:.4})",
            report.samples,
            report.batches,
            report.loss,
            report.per_head_loss[0],
            report.per_head_loss[1],
            report.per_head_loss[2]
        );

        Ok(report)
    }
}

impl<B: AutodiffBackend> FeatureBackboneClassifier for TriHeadClassifier<B> {
    fn num_classes(&self) -> usize {
        self.config.num_classes
    }

    fn predict(&self, images: &ImageSet) -> Result<HeadPredictions> {
        let model = self.net.valid();
        let k = self.config.num_classes;
        let mut outputs: [Vec<f32>; 3] = [
            Vec::with_capacity(images.len() * k),
            Vec::with_capacity(images.len() * k),
            Vec::with_capacity(images.len() * k),
        ];

        let mut start = 0;
        while start < images.len() {
            let end = (start + PREDICT_BATCH_SIZE).min(images.len());
            let x = images_to_tensor::<B::InnerBackend>(&images.slice(start, end), &self.device);

            for (out, probs) in outputs.iter_mut().zip(model.forward_softmax(x)) {
                let values: Vec<f32> = probs
                    .into_data()
                    .to_vec()
                    .map_err(|e| AdaptationError::Model(format!("{:?}", e)))?;
                out.extend(values);
            }
            start = end;
        }

        let [h1, h2, h3] = outputs;
        HeadPredictions::new([
            ProbabilityBatch::from_f32(&h1, k)?,
            ProbabilityBatch::from_f32(&h2, k)?,
            ProbabilityBatch::from_f32(&h3, k)?,
        ])
    }

    fn set_trainable(&mut self, head: HeadId, trainable: bool) {
        self.trainable[head.index()] = trainable;
    }

    fn is_trainable(&self, head: HeadId) -> bool {
        self.trainable[head.index()]
    }

    fn fit_step(
        &mut self,
        images: &ImageSet,
        targets: [&OneHotLabels; 3],
        class_weights: &ClassWeights,
    ) -> Result<FitReport> {
        // Fresh optimizer state for every adaptation step
        let mut optimizer = AdamConfig::new().init::<B, TriHeadNet<B>>();
        self.run_epoch(&mut optimizer, images, targets, class_weights)
    }

    fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        self.net
            .clone()
            .save_file(path.to_path_buf(), &CompactRecorder::new())
            .map_err(|e| AdaptationError::Model(format!("failed to save {}: {}", path.display(), e)))?;

        info!("Saved weights to {}", checkpoint_file(path).display());
        Ok(())
    }
}

/// Loaded tensors replace parameters without a shape check, so compare the
/// layer shapes against the configuration explicitly.
fn check_layout<B: Backend>(net: &TriHeadNet<B>, config: &TriHeadConfig) -> std::result::Result<(), String> {
    let k = config.kernel_size;
    let expected = [
        ("backbone.conv1", net.backbone.conv1.weight.dims().to_vec(), vec![config.filters, config.in_channels, k, k]),
        ("backbone.conv2", net.backbone.conv2.weight.dims().to_vec(), vec![config.filters, config.filters, k, k]),
        ("head1.fc1", net.head1.fc1.weight.dims().to_vec(), vec![config.feature_size(), 48]),
        ("head1.out", net.head1.out.weight.dims().to_vec(), vec![32, config.num_classes]),
        ("head2.fc1", net.head2.fc1.weight.dims().to_vec(), vec![config.feature_size(), 32]),
        ("head2.out", net.head2.out.weight.dims().to_vec(), vec![16, config.num_classes]),
        ("head3.fc1", net.head3.fc1.weight.dims().to_vec(), vec![config.feature_size(), 48]),
        ("head3.out", net.head3.out.weight.dims().to_vec(), vec![32, config.num_classes]),
    ];

    for (name, found, wanted) in expected {
        if found != wanted {
            return Err(format!("{} has shape {:?}, expected {:?}", name, found, wanted));
        }
    }
    Ok(())
}

/// Path of the file `CompactRecorder` reads or writes for `path`
pub fn checkpoint_file(path: &Path) -> PathBuf {
    if path.extension().and_then(|e| e.to_str()) == Some(CHECKPOINT_EXTENSION) {
        path.to_path_buf()
    } else {
        path.with_extension(CHECKPOINT_EXTENSION)
    }
}

/// `[n, C, H, W]` tensor from a flattened image set
pub fn images_to_tensor<B: Backend>(images: &ImageSet, device: &B::Device) -> Tensor<B, 4> {
    let [c, h, w] = images.shape();
    Tensor::from_data(
        TensorData::new(images.data().to_vec(), [images.len(), c, h, w]),
        device,
    )
}

/// Mean over the batch of `weight_i * -sum_k(y_ik * log_softmax(logits)_ik)`
pub fn weighted_cross_entropy<B: Backend>(
    logits: Tensor<B, 2>,
    targets: Tensor<B, 2>,
    weights: Tensor<B, 1>,
) -> Tensor<B, 1> {
    let [batch_size, _num_classes] = logits.dims();

    let log_probs = log_softmax(logits, 1);
    let nll = (log_probs * targets).sum_dim(1).reshape([batch_size]).neg();

    (nll * weights).mean()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DefaultBackend, TrainingBackend};
    use tempfile::TempDir;

    fn small_config() -> TriHeadConfig {
        TriHeadConfig::new().with_filters(2).with_num_classes(3).with_image_side(8)
    }

    fn images(n: usize) -> ImageSet {
        let data: Vec<f32> = (0..n * 3 * 8 * 8).map(|i| ((i % 17) as f32) / 17.0 - 0.5).collect();
        ImageSet::new(data, n, 3, 8, 8).unwrap()
    }

    fn classifier() -> TriHeadClassifier<TrainingBackend> {
        TriHeadClassifier::new(
            small_config(),
            LossSpec::adaptation(),
            1e-3,
            4,
            7,
            Default::default(),
        )
        .unwrap()
    }

    fn head_weights(net: &TriHeadNet<TrainingBackend>) -> [Vec<f32>; 4] {
        let read = |t: Tensor<DefaultBackend, 2>| -> Vec<f32> { t.into_data().to_vec().unwrap() };
        let valid = net.valid();
        [
            read(valid.head1.out.weight.val()),
            read(valid.head2.out.weight.val()),
            read(valid.head3.out.weight.val()),
            read(valid.backbone.conv1.weight.val().reshape([2, 3 * 5 * 5])),
        ]
    }

    #[test]
    fn test_weighted_cross_entropy_matches_manual() {
        let device = Default::default();
        let logits = Tensor::<DefaultBackend, 2>::from_floats([[0.0, 0.0], [0.0, 0.0]], &device);
        let targets = Tensor::<DefaultBackend, 2>::from_floats([[1.0, 0.0], [0.0, 1.0]], &device);
        let weights = Tensor::<DefaultBackend, 1>::from_floats([1.0, 3.0], &device);

        let loss: f32 = weighted_cross_entropy(logits, targets, weights).into_scalar().elem();
        // Each sample has -ln(0.5); weighted mean = (1 + 3) / 2 * ln 2
        assert!((loss - 2.0 * std::f32::consts::LN_2).abs() < 1e-5);
    }

    #[test]
    fn test_predict_shapes_and_probabilities() {
        let clf = classifier();
        let predictions = clf.predict(&images(5)).unwrap();
        assert_eq!(predictions.len(), 5);
        assert_eq!(predictions.num_classes(), 3);

        for head in HeadId::ALL {
            let row_sum: f64 = predictions.head(head).row(0).iter().sum();
            assert!((row_sum - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_frozen_head_is_unchanged() {
        let mut clf = classifier();
        clf.set_trainable(HeadId::Head1, true);
        clf.set_trainable(HeadId::Head2, false);
        clf.set_trainable(HeadId::Head3, true);

        let before = head_weights(clf.net());

        let data = images(8);
        let labels = OneHotLabels::from_indices(&[0, 1, 2, 0, 1, 2, 0, 1], 3).unwrap();
        let weights = ClassWeights::balanced_one_hot(&labels).unwrap();
        let report = clf
            .fit_step(&data, [&labels, &labels, &labels], &weights)
            .unwrap();
        assert_eq!(report.samples, 8);
        assert_eq!(report.batches, 2);
        assert!(report.loss.is_finite());

        let after = head_weights(clf.net());
        assert_ne!(before[0], after[0], "head1 is trainable");
        assert_eq!(before[1], after[1], "head2 is frozen");
        assert_ne!(before[2], after[2], "head3 is trainable");
        assert_ne!(before[3], after[3], "backbone is always trainable");
    }

    #[test]
    fn test_fit_rejects_mismatched_targets() {
        let mut clf = classifier();
        let data = images(4);
        let labels = OneHotLabels::from_indices(&[0, 1, 2], 3).unwrap();
        let weights = ClassWeights::uniform(3);
        assert!(clf
            .fit_step(&data, [&labels, &labels, &labels], &weights)
            .is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("w");

        let clf = classifier();
        clf.save(&path).unwrap();
        assert!(dir.path().join("w.mpk").exists());

        let loaded = TriHeadClassifier::<TrainingBackend>::load(
            &path,
            small_config(),
            LossSpec::adaptation(),
            1e-3,
            4,
            7,
            Default::default(),
        )
        .unwrap();

        // CompactRecorder stores half precision, so compare with a tolerance
        let data = images(2);
        let a = clf.predict(&data).unwrap();
        let b = loaded.predict(&data).unwrap();
        for head in HeadId::ALL {
            for (x, y) in a.head(head).row(1).iter().zip(b.head(head).row(1)) {
                assert!((x - y).abs() < 1e-2);
            }
        }
    }

    #[test]
    fn test_load_missing_checkpoint() {
        let dir = TempDir::new().unwrap();
        let err = TriHeadClassifier::<TrainingBackend>::load(
            &dir.path().join("absent"),
            small_config(),
            LossSpec::adaptation(),
            1e-3,
            4,
            7,
            Default::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, AdaptationError::ModelLoad(_, _)));
    }

    #[test]
    fn test_load_with_wrong_class_count_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("w");
        classifier().save(&path).unwrap();

        let result = TriHeadClassifier::<TrainingBackend>::load(
            &path,
            small_config().with_num_classes(5),
            LossSpec::adaptation(),
            1e-3,
            4,
            7,
            Default::default(),
        );
        assert!(matches!(result, Err(AdaptationError::ModelLoad(_, _))));
    }
}
