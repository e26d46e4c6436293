//! The training loop: a fixed number of epochs of mini-batch SGD on the
//! training split, with the validation loss measured after every epoch.

use std::path::Path;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::data::{DataLoader, Dataset, SnpDataset};
use crate::device::{select_device, Device};
use crate::nn::{Activation, Mlp, Module};
use crate::optim::Sgd;
use crate::storage::SplitLabel;
use crate::tensor::{functional, TensorLike};
use crate::{Error, Result};

pub const MODEL_FILE: &str = "model.json";
pub const REPORT_FILE: &str = "training.json";

/// `max_snps -> h1 -> h2 -> h3 -> 1`
pub type NeModel = Mlp<f32, 4>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochReport {
    pub epoch: usize,
    pub train_loss: f64,
    /// `None` when the validation split is empty
    pub validation_loss: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub device: Device,
    pub epochs: Vec<EpochReport>,
}

impl TrainingReport {
    pub fn final_train_loss(&self) -> Option<f64> {
        self.epochs.last().map(|e| e.train_loss)
    }
}

/// A freshly initialized network, seeded by the master seed.
pub fn build_model(config: &PipelineConfig) -> Result<NeModel> {
    let mut rng = StdRng::seed_from_u64(config.simulation.seed);
    Mlp::from_sizes(
        &config.training.layer_sizes(),
        Activation::Relu,
        Activation::Identity,
        &mut rng,
    )
}

/// Mean squared error of `model` over `dataset`, without updating anything.
pub fn dataset_loss<D>(model: &NeModel, dataset: &D, batch_size: usize) -> Result<Option<f64>>
where
    D: Dataset<Item = crate::data::Example>,
{
    if dataset.is_empty() {
        return Ok(None);
    }
    let mut loader = DataLoader::new(dataset, batch_size);
    let mut total = 0.0;
    for batch in loader.epoch() {
        let batch = batch?;
        let (inputs, targets) = batch.to_tensors::<f32>()?;
        let loss = functional::mse_loss(&model.forward(inputs), &targets);
        total += loss.elem() as f64 * batch.size() as f64;
    }
    Ok(Some(total / dataset.len() as f64))
}

/// Trains a new model on the replicates listed in `<data_dir>/manifest.csv`.
pub fn train(config: &PipelineConfig, data_dir: &Path) -> Result<(NeModel, TrainingReport)> {
    config.validate()?;
    let training = &config.training;
    let device = select_device();

    let train_set = SnpDataset::from_manifest(data_dir, SplitLabel::Train, config)?;
    let validation_set = SnpDataset::from_manifest(data_dir, SplitLabel::Validation, config)?;
    if train_set.is_empty() {
        return Err(Error::InvalidConfig(
            "the training split has no replicates".to_string(),
        ));
    }
    info!(
        train = train_set.len(),
        validation = validation_set.len(),
        epochs = training.epochs,
        batch_size = training.batch_size,
        "training"
    );

    let mut model = build_model(config)?;
    let mut optimiser = Sgd::new(training.learning_rate as f32, training.momentum as f32);
    let mut loader = DataLoader::new(&train_set, training.batch_size)
        .shuffled(config.simulation.seed)
        .drop_last(training.drop_last);
    if loader.num_batches() == 0 {
        return Err(Error::InvalidConfig(format!(
            "{} training replicates make no full batch of {} with drop_last",
            train_set.len(),
            training.batch_size
        )));
    }

    let mut epochs = Vec::with_capacity(training.epochs);
    for epoch in 0..training.epochs {
        let mut total = 0.0;
        let mut seen = 0;
        for (step, batch) in loader.epoch().enumerate() {
            let batch = batch?;
            let (inputs, targets) = batch.to_tensors::<f32>()?;
            optimiser.zero_grad(&model);
            let loss = functional::mse_loss(&model.forward(inputs), &targets);
            loss.backward();
            optimiser.step(&mut model);

            let value = loss.elem() as f64;
            if !value.is_finite() {
                return Err(Error::Model(format!(
                    "training diverged at epoch {epoch}, step {step}"
                )));
            }
            debug!(epoch, step, loss = value, "step");
            total += value * batch.size() as f64;
            seen += batch.size();
        }
        let train_loss = total / seen as f64;
        let validation_loss = dataset_loss(&model, &validation_set, training.batch_size)?;
        info!(epoch, train_loss, ?validation_loss, "epoch finished");
        epochs.push(EpochReport {
            epoch,
            train_loss,
            validation_loss,
        });
    }

    Ok((model, TrainingReport { device, epochs }))
}

/// Trains and writes `model.json` and `training.json` into `data_dir`.
pub fn run_training(config: &PipelineConfig, data_dir: &Path) -> Result<TrainingReport> {
    let (model, report) = train(config, data_dir)?;
    let model_path = data_dir.join(MODEL_FILE);
    model.save_json(&model_path)?;
    let report_path = data_dir.join(REPORT_FILE);
    let json = serde_json::to_string_pretty(&report)?;
    std::fs::write(&report_path, json).map_err(|e| Error::io(&report_path, e))?;
    info!(model = %model_path.display(), "model saved");
    Ok(report)
}
