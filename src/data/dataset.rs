use std::path::{Path, PathBuf};

use crate::config::PipelineConfig;
use crate::simulation::MANIFEST_FILE;
use crate::storage::{read_manifest, read_npy_f64, ManifestRow, SplitLabel};
use crate::Result;

/// Random access to a fixed number of items.
pub trait Dataset: Sync {
    type Item: Send;

    fn len(&self) -> usize;

    fn get(&self, index: usize) -> Result<Self::Item>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A fixed-length feature vector and its normalized target.
#[derive(Debug, Clone, PartialEq)]
pub struct Example {
    pub features: Vec<f64>,
    pub target: f64,
}

/// Min-max scaling of Ne onto `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetScaler {
    pub min: f64,
    pub max: f64,
}

impl TargetScaler {
    pub fn normalize(&self, ne: f64) -> f64 {
        if self.max > self.min {
            (ne - self.min) / (self.max - self.min)
        } else {
            0.0
        }
    }

    pub fn denormalize(&self, value: f64) -> f64 {
        self.min + value * (self.max - self.min)
    }
}

/// The replicates of one split, loaded lazily from their `.npy` files.
#[derive(Debug, Clone)]
pub struct SnpDataset {
    root: PathBuf,
    rows: Vec<ManifestRow>,
    max_snps: usize,
    pad_value: f64,
    sequence_length: f64,
    scaler: TargetScaler,
}

impl SnpDataset {
    pub fn new(root: &Path, rows: Vec<ManifestRow>, config: &PipelineConfig) -> Self {
        SnpDataset {
            root: root.to_path_buf(),
            rows,
            max_snps: config.training.max_snps,
            pad_value: config.training.pad_value,
            sequence_length: config.simulation.sequence_length,
            scaler: TargetScaler {
                min: config.simulation.ne_min,
                max: config.simulation.ne_max,
            },
        }
    }

    /// Reads `<root>/manifest.csv` and keeps the rows labelled `split`.
    pub fn from_manifest(root: &Path, split: SplitLabel, config: &PipelineConfig) -> Result<Self> {
        let rows = read_manifest(&root.join(MANIFEST_FILE))?
            .into_iter()
            .filter(|row| row.split == split)
            .collect();
        Ok(SnpDataset::new(root, rows, config))
    }

    pub fn rows(&self) -> &[ManifestRow] {
        &self.rows
    }

    pub fn features(&self) -> usize {
        self.max_snps
    }

    pub fn scaler(&self) -> TargetScaler {
        self.scaler
    }

    pub fn denormalize_target(&self, value: f64) -> f64 {
        self.scaler.denormalize(value)
    }

    /// Scales positions into `[0, 1)` and pads or truncates to `max_snps`.
    fn to_features(&self, positions: &[f64]) -> Vec<f64> {
        let mut features: Vec<f64> = positions
            .iter()
            .take(self.max_snps)
            .map(|p| p / self.sequence_length)
            .collect();
        features.resize(self.max_snps, self.pad_value);
        features
    }
}

impl Dataset for SnpDataset {
    type Item = Example;

    fn len(&self) -> usize {
        self.rows.len()
    }

    fn get(&self, index: usize) -> Result<Example> {
        let row = &self.rows[index];
        let positions = read_npy_f64(&self.root.join(&row.path))?;
        Ok(Example {
            features: self.to_features(&positions),
            target: self.scaler.normalize(row.ne),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{write_manifest, write_npy_f64};

    fn config(max_snps: usize) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.simulation.sequence_length = 100.0;
        config.simulation.ne_min = 1_000.0;
        config.simulation.ne_max = 3_000.0;
        config.training.max_snps = max_snps;
        config.training.pad_value = -1.0;
        config
    }

    fn write_fixture(root: &Path) {
        std::fs::create_dir_all(root.join("replicates")).unwrap();
        write_npy_f64(&root.join("replicates/a.npy"), &[10.0, 20.0, 30.0]).unwrap();
        write_npy_f64(&root.join("replicates/b.npy"), &[5.0]).unwrap();
        write_npy_f64(&root.join("replicates/c.npy"), &[]).unwrap();
        let rows = vec![
            ManifestRow {
                ne: 2_000.0,
                path: PathBuf::from("replicates/a.npy"),
                split: SplitLabel::Train,
            },
            ManifestRow {
                ne: 3_000.0,
                path: PathBuf::from("replicates/b.npy"),
                split: SplitLabel::Train,
            },
            ManifestRow {
                ne: 1_000.0,
                path: PathBuf::from("replicates/c.npy"),
                split: SplitLabel::Test,
            },
        ];
        write_manifest(&root.join(MANIFEST_FILE), &rows).unwrap();
    }

    #[test]
    fn test_filters_split() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let train = SnpDataset::from_manifest(dir.path(), SplitLabel::Train, &config(2)).unwrap();
        let test = SnpDataset::from_manifest(dir.path(), SplitLabel::Test, &config(2)).unwrap();
        let validation =
            SnpDataset::from_manifest(dir.path(), SplitLabel::Validation, &config(2)).unwrap();
        assert_eq!(train.len(), 2);
        assert_eq!(test.len(), 1);
        assert!(validation.is_empty());
    }

    #[test]
    fn test_truncates_and_pads() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let dataset = SnpDataset::from_manifest(dir.path(), SplitLabel::Train, &config(2)).unwrap();
        assert_eq!(
            dataset.get(0).unwrap(),
            Example {
                features: vec![0.1, 0.2],
                target: 0.5
            }
        );
        assert_eq!(
            dataset.get(1).unwrap(),
            Example {
                features: vec![0.05, -1.0],
                target: 1.0
            }
        );

        let test = SnpDataset::from_manifest(dir.path(), SplitLabel::Test, &config(3)).unwrap();
        let example = test.get(0).unwrap();
        assert_eq!(example.features, vec![-1.0; 3]);
        assert_eq!(example.target, 0.0);
    }

    #[test]
    fn test_denormalize_inverts_normalize() {
        let scaler = TargetScaler {
            min: 1_000.0,
            max: 20_000.0,
        };
        for ne in [1_000.0, 7_777.0, 20_000.0] {
            assert!((scaler.denormalize(scaler.normalize(ne)) - ne).abs() < 1e-9);
        }
        let point = TargetScaler {
            min: 500.0,
            max: 500.0,
        };
        assert_eq!(point.normalize(500.0), 0.0);
        assert_eq!(point.denormalize(0.0), 500.0);
    }

    #[test]
    fn test_missing_array_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let rows = vec![ManifestRow {
            ne: 1_500.0,
            path: PathBuf::from("replicates/gone.npy"),
            split: SplitLabel::Train,
        }];
        let dataset = SnpDataset::new(dir.path(), rows, &config(4));
        assert!(dataset.get(0).is_err());
    }
}
