//! Held-out evaluation: predictions on the test split, summary metrics and a
//! predicted-against-true scatter plot.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use plotters::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::PipelineConfig;
use crate::data::{DataLoader, SnpDataset};
use crate::nn::Module;
use crate::storage::SplitLabel;
use crate::tensor::TensorLike;
use crate::train::{NeModel, MODEL_FILE};
use crate::{Error, Result};

pub const PREDICTIONS_FILE: &str = "predictions.csv";
pub const SCATTER_FILE: &str = "scatter.svg";
pub const METRICS_FILE: &str = "metrics.json";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub true_ne: f64,
    pub predicted_ne: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub count: usize,
    pub mse: f64,
    pub mae: f64,
    /// Undefined when every true value is the same
    pub r2: Option<f64>,
}

impl Metrics {
    pub fn from_predictions(predictions: &[Prediction]) -> Option<Metrics> {
        if predictions.is_empty() {
            return None;
        }
        let n = predictions.len() as f64;
        let mean_true = predictions.iter().map(|p| p.true_ne).sum::<f64>() / n;
        let (mut squared, mut absolute, mut total) = (0.0, 0.0, 0.0);
        for p in predictions {
            let error = p.predicted_ne - p.true_ne;
            squared += error * error;
            absolute += error.abs();
            total += (p.true_ne - mean_true).powi(2);
        }
        Some(Metrics {
            count: predictions.len(),
            mse: squared / n,
            mae: absolute / n,
            r2: (total > 0.0).then(|| 1.0 - squared / total),
        })
    }
}

/// Runs `model` over `dataset` and maps outputs back to Ne.
pub fn predict(model: &NeModel, dataset: &SnpDataset, batch_size: usize) -> Result<Vec<Prediction>> {
    let mut loader = DataLoader::new(dataset, batch_size);
    let mut predictions = Vec::with_capacity(dataset.rows().len());
    let mut rows = dataset.rows().iter();
    for batch in loader.epoch() {
        let (inputs, _) = batch?.to_tensors::<f32>()?;
        let outputs = model.forward(inputs);
        for (&output, row) in outputs.data().iter().zip(rows.by_ref()) {
            predictions.push(Prediction {
                true_ne: row.ne,
                predicted_ne: dataset.denormalize_target(output as f64),
            });
        }
    }
    Ok(predictions)
}

pub fn write_predictions(path: &Path, predictions: &[Prediction]) -> Result<()> {
    let file = File::create(path).map_err(|e| Error::io(path, e))?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "true_ne,predicted_ne").map_err(|e| Error::io(path, e))?;
    for p in predictions {
        writeln!(writer, "{},{}", p.true_ne, p.predicted_ne).map_err(|e| Error::io(path, e))?;
    }
    writer.flush().map_err(|e| Error::io(path, e))
}

/// Predicted against true Ne, with the identity line for reference.
pub fn plot_scatter(path: &Path, predictions: &[Prediction]) -> Result<()> {
    let plot_err = |e: &dyn std::fmt::Display| Error::Plot(e.to_string());

    let (lo, hi) = predictions
        .iter()
        .flat_map(|p| [p.true_ne, p.predicted_ne])
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    let (lo, hi) = if lo < hi {
        let margin = 0.05 * (hi - lo);
        (lo - margin, hi + margin)
    } else if lo.is_finite() {
        (lo - 1.0, lo + 1.0)
    } else {
        (0.0, 1.0)
    };

    let root = SVGBackend::new(path, (800, 800)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| plot_err(&e))?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Predicted vs true Ne (test split)", ("sans-serif", 22))
        .margin(15)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(lo..hi, lo..hi)
        .map_err(|e| plot_err(&e))?;
    chart
        .configure_mesh()
        .x_desc("true Ne")
        .y_desc("predicted Ne")
        .draw()
        .map_err(|e| plot_err(&e))?;

    chart
        .draw_series(LineSeries::new([(lo, lo), (hi, hi)], BLACK.mix(0.6)))
        .map_err(|e| plot_err(&e))?;
    chart
        .draw_series(
            predictions
                .iter()
                .filter(|p| p.predicted_ne.is_finite())
                .map(|p| Circle::new((p.true_ne, p.predicted_ne), 3, BLUE.mix(0.7).filled())),
        )
        .map_err(|e| plot_err(&e))?;
    root.present().map_err(|e| plot_err(&e))?;
    Ok(())
}

/// Loads `model.json` from `data_dir`, evaluates the test split and writes
/// `predictions.csv`, `scatter.svg` and `metrics.json` next to it.
pub fn run_evaluation(config: &PipelineConfig, data_dir: &Path) -> Result<Option<Metrics>> {
    let model = NeModel::load_json(&data_dir.join(MODEL_FILE))?;
    if model.in_features() != config.training.max_snps {
        return Err(Error::Model(format!(
            "model expects {} features but max_snps is {}",
            model.in_features(),
            config.training.max_snps
        )));
    }
    let test_set = SnpDataset::from_manifest(data_dir, SplitLabel::Test, config)?;
    let predictions = predict(&model, &test_set, config.training.batch_size)?;

    write_predictions(&data_dir.join(PREDICTIONS_FILE), &predictions)?;
    plot_scatter(&data_dir.join(SCATTER_FILE), &predictions)?;
    let metrics = Metrics::from_predictions(&predictions);
    let metrics_path = data_dir.join(METRICS_FILE);
    let json = serde_json::to_string_pretty(&metrics)?;
    std::fs::write(&metrics_path, json).map_err(|e| Error::io(&metrics_path, e))?;

    match &metrics {
        Some(m) => info!(count = m.count, mse = m.mse, mae = m.mae, r2 = ?m.r2, "evaluation finished"),
        None => info!("test split is empty, nothing to evaluate"),
    }
    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prediction(true_ne: f64, predicted_ne: f64) -> Prediction {
        Prediction {
            true_ne,
            predicted_ne,
        }
    }

    #[test]
    fn test_metrics() {
        let predictions = [
            prediction(1.0, 2.0),
            prediction(2.0, 2.0),
            prediction(3.0, 1.0),
        ];
        let metrics = Metrics::from_predictions(&predictions).unwrap();
        assert_eq!(metrics.count, 3);
        assert!((metrics.mse - 5.0 / 3.0).abs() < 1e-12);
        assert!((metrics.mae - 1.0).abs() < 1e-12);
        // ss_tot = 2, ss_res = 5
        assert!((metrics.r2.unwrap() + 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_metrics_edge_cases() {
        assert!(Metrics::from_predictions(&[]).is_none());
        let constant = Metrics::from_predictions(&[prediction(5.0, 4.0), prediction(5.0, 6.0)]);
        assert_eq!(constant.unwrap().r2, None);
        let perfect = Metrics::from_predictions(&[prediction(1.0, 1.0), prediction(2.0, 2.0)]);
        assert_eq!(perfect.unwrap().r2, Some(1.0));
    }

    #[test]
    fn test_writes_predictions_and_plot() {
        let dir = tempfile::tempdir().unwrap();
        let predictions = [prediction(1_000.0, 1_250.5), prediction(9_000.0, 8_000.0)];

        let csv = dir.path().join(PREDICTIONS_FILE);
        write_predictions(&csv, &predictions).unwrap();
        assert_eq!(
            std::fs::read_to_string(&csv).unwrap(),
            "true_ne,predicted_ne\n1000,1250.5\n9000,8000\n"
        );

        let svg = dir.path().join(SCATTER_FILE);
        plot_scatter(&svg, &predictions).unwrap();
        let contents = std::fs::read_to_string(&svg).unwrap();
        assert!(contents.contains("<svg"));
        assert!(contents.contains("<circle"));
    }

    #[test]
    fn test_plot_without_points() {
        let dir = tempfile::tempdir().unwrap();
        plot_scatter(&dir.path().join(SCATTER_FILE), &[]).unwrap();
    }
}
