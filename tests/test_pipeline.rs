use ne_light::config::PipelineConfig;
use ne_light::data::{DataLoader, Dataset, SnpDataset};
use ne_light::evaluate::{run_evaluation, METRICS_FILE, PREDICTIONS_FILE, SCATTER_FILE};
use ne_light::simulation::{run_simulations, MANIFEST_FILE};
use ne_light::storage::{read_manifest, SplitLabel};
use ne_light::train::{run_training, NeModel, MODEL_FILE, REPORT_FILE};

fn tiny_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.simulation.num_replicates = 20;
    config.simulation.sample_size = 4;
    config.simulation.sequence_length = 1e4;
    config.simulation.mutation_rate = 1e-7;
    config.simulation.recombination_rate = 1e-7;
    config.simulation.ne_min = 100.0;
    config.simulation.ne_max = 1_000.0;
    config.simulation.workers = Some(2);
    config.training.max_snps = 16;
    config.training.hidden_sizes = [8, 4, 4];
    config.training.batch_size = 4;
    config.training.epochs = 3;
    config
}

#[test]
fn test_simulate_train_evaluate() {
    let dir = tempfile::tempdir().unwrap();
    let config = tiny_config();

    let rows = run_simulations(&config, dir.path(), None).unwrap();
    assert_eq!(rows.len(), 20);
    assert_eq!(read_manifest(&dir.path().join(MANIFEST_FILE)).unwrap(), rows);

    let train_set = SnpDataset::from_manifest(dir.path(), SplitLabel::Train, &config).unwrap();
    assert_eq!(train_set.len(), 14);
    let mut loader = DataLoader::new(&train_set, 4).shuffled(1);
    for batch in loader.epoch() {
        let batch = batch.unwrap();
        assert_eq!(batch.inputs.len(), batch.size() * 16);
        assert!(batch.inputs.iter().all(|&x| (0.0..1.0).contains(&x)));
        assert!(batch.targets.iter().all(|&y| (0.0..=1.0).contains(&y)));
    }

    let report = run_training(&config, dir.path()).unwrap();
    assert_eq!(report.epochs.len(), 3);
    assert!(report.epochs.iter().all(|e| e.train_loss.is_finite()));
    assert!(report.epochs.iter().all(|e| e.validation_loss.is_some()));
    assert!(dir.path().join(REPORT_FILE).exists());
    let model = NeModel::load_json(&dir.path().join(MODEL_FILE)).unwrap();
    assert_eq!(model.in_features(), 16);

    let metrics = run_evaluation(&config, dir.path()).unwrap().unwrap();
    assert_eq!(metrics.count, 3);
    assert!(metrics.mse.is_finite());
    for file in [PREDICTIONS_FILE, SCATTER_FILE, METRICS_FILE] {
        assert!(dir.path().join(file).exists(), "{file} missing");
    }
    let predictions = std::fs::read_to_string(dir.path().join(PREDICTIONS_FILE)).unwrap();
    assert_eq!(predictions.lines().count(), 4);
}

#[test]
fn test_evaluation_rejects_mismatched_model() {
    let dir = tempfile::tempdir().unwrap();
    let config = tiny_config();
    run_simulations(&config, dir.path(), None).unwrap();
    run_training(&config, dir.path()).unwrap();

    let mut wider = config.clone();
    wider.training.max_snps = 32;
    assert!(run_evaluation(&wider, dir.path()).is_err());
}

#[test]
fn test_training_needs_a_manifest() {
    let dir = tempfile::tempdir().unwrap();
    assert!(run_training(&tiny_config(), dir.path()).is_err());
}

#[test]
fn test_training_without_a_full_batch_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = tiny_config();
    run_simulations(&config, dir.path(), None).unwrap();

    // 14 training replicates never fill a batch of 32
    config.training.batch_size = 32;
    config.training.drop_last = true;
    let err = run_training(&config, dir.path()).unwrap_err();
    assert!(matches!(err, ne_light::Error::InvalidConfig(_)), "{err}");
    assert!(!dir.path().join(MODEL_FILE).exists());
    assert!(!dir.path().join(REPORT_FILE).exists());
}
