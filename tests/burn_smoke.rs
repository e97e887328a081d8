//! End-to-end run of the Burn classifier on tiny synthetic images

use burn::module::AutodiffModule;
use embedded_atda::backend::TrainingBackend;
use embedded_atda::config::AdaptationConfig;
use embedded_atda::dataset::{ImageSet, TargetDomain};
use embedded_atda::model::export::{extract, render_c_header};
use embedded_atda::model::{
    FeatureBackboneClassifier, HeadId, LossSpec, TriHeadClassifier, TriHeadConfig,
};
use embedded_atda::training::{Phase, TriTrainingController};
use tempfile::TempDir;

const SIDE: usize = 8;
const CLASSES: usize = 3;

fn net_config() -> TriHeadConfig {
    TriHeadConfig::adaptation()
        .with_filters(2)
        .with_num_classes(CLASSES)
        .with_image_side(SIDE)
}

/// Class `c` images are brighter in channel `c`
fn images(n: usize) -> (ImageSet, Vec<usize>) {
    let size = 3 * SIDE * SIDE;
    let labels: Vec<usize> = (0..n).map(|i| i % CLASSES).collect();
    let mut data = Vec::with_capacity(n * size);
    for (i, &label) in labels.iter().enumerate() {
        for p in 0..size {
            let channel = p / (SIDE * SIDE);
            let base = if channel == label { 0.8 } else { 0.1 };
            data.push(base + ((i + p) % 5) as f32 * 0.02);
        }
    }
    (ImageSet::new(data, n, 3, SIDE, SIDE).unwrap(), labels)
}

#[test]
fn test_adaptation_run_with_burn_classifier() {
    let dir = TempDir::new().unwrap();
    let (pool, pool_labels) = images(60);
    let (validation, validation_labels) = images(12);
    let target = TargetDomain::new(pool, pool_labels, validation, validation_labels).unwrap();

    let config = AdaptationConfig {
        n_boost: 30,
        domain_adaptation_steps: 3,
        target_batch_size: 16,
        num_classes: CLASSES,
        output_folder: dir.path().to_path_buf(),
        ..Default::default()
    };

    let model = TriHeadClassifier::<TrainingBackend>::new(
        net_config(),
        LossSpec::adaptation(),
        config.lr_target,
        config.target_batch_size,
        config.seed,
        Default::default(),
    )
    .unwrap();

    let mut controller = TriTrainingController::new(model, &config, &target).unwrap();
    let report = controller.run().unwrap();

    assert_eq!(report.steps.len(), 2);
    for step in &report.steps {
        assert!(step.train_loss.is_finite());
        assert!(step.mixed_size >= 30);
        assert_eq!(step.accuracy.samples, 12);
    }
    assert_eq!(controller.phase(), Phase::Saved);
    assert!(dir.path().join("da_w.mpk").exists());

    let model = controller.into_model();
    // The last step (2) is even: head 2 stays frozen
    assert!(model.is_trainable(HeadId::Head1));
    assert!(!model.is_trainable(HeadId::Head2));
    assert!(model.is_trainable(HeadId::Head3));

    let net = model.net().valid();
    let exported = extract(&net, HeadId::Head3).unwrap();
    assert_eq!(exported.num_classes, CLASSES);
    // Two convolutions and three dense layers, weight and bias each
    assert_eq!(exported.tensors.len(), 10);
    assert!(render_c_header(&exported).contains("HEAD3_OUT_WEIGHT"));
}

#[test]
fn test_adapted_checkpoint_reloads() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("da_w");

    let model = TriHeadClassifier::<TrainingBackend>::new(
        net_config(),
        LossSpec::adaptation(),
        1e-4,
        8,
        1,
        Default::default(),
    )
    .unwrap();
    model.save(&path).unwrap();

    let loaded = TriHeadClassifier::<TrainingBackend>::load(
        &path,
        net_config(),
        LossSpec::adaptation(),
        1e-4,
        8,
        1,
        Default::default(),
    )
    .unwrap();

    let (data, labels) = images(9);
    let accuracy = loaded.evaluate(&data, &labels).unwrap();
    assert_eq!(accuracy.samples, 9);
    for head in HeadId::ALL {
        assert!((0.0..=1.0).contains(&accuracy.head(head)));
    }
}
