//! Pipeline parameters.
//!
//! A `PipelineConfig` can be deserialized from JSON to fully reproduce a run:
//! the master seed determines every replicate seed and every target Ne.

use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::storage::SplitLabel;
use crate::{Error, Result};

const SPLIT_TOLERANCE: f64 = 1e-6;
const MAX_SEED: u64 = 1 << 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub simulation: SimulationConfig,
    pub split: SplitConfig,
    pub training: TrainingConfig,
}

/// Parameters of the coalescent simulations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Number of replicates (one target Ne each)
    pub num_replicates: usize,
    /// Number of sampled individuals per replicate
    pub sample_size: usize,
    /// Chromosome copies per individual
    pub ploidy: usize,
    /// Sequence length in base pairs
    pub sequence_length: f64,
    /// Per base pair, per generation
    pub recombination_rate: f64,
    /// Per base pair, per generation
    pub mutation_rate: f64,
    pub ne_min: f64,
    pub ne_max: f64,
    /// Master seed; every replicate seed and target derives from it
    pub seed: u64,
    /// Worker threads for the simulation pool (all logical CPUs if unset)
    pub workers: Option<usize>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            num_replicates: 1000,
            sample_size: 10,
            ploidy: 2,
            sequence_length: 1e6,
            recombination_rate: 1e-8,
            mutation_rate: 1e-8,
            ne_min: 1_000.0,
            ne_max: 20_000.0,
            seed: 42,
            workers: None,
        }
    }
}

impl SimulationConfig {
    pub fn haplotypes(&self) -> usize {
        self.sample_size * self.ploidy
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    pub train: f64,
    pub validation: f64,
    pub test: f64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        SplitConfig {
            train: 0.7,
            validation: 0.15,
            test: 0.15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Fixed feature length; arrays are padded or truncated to it
    pub max_snps: usize,
    pub pad_value: f64,
    pub hidden_sizes: [usize; 3],
    pub batch_size: usize,
    pub drop_last: bool,
    pub epochs: usize,
    pub learning_rate: f64,
    pub momentum: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            max_snps: 2000,
            pad_value: 0.0,
            hidden_sizes: [256, 128, 64],
            batch_size: 32,
            drop_last: false,
            epochs: 10,
            learning_rate: 1e-2,
            momentum: 0.0,
        }
    }
}

impl TrainingConfig {
    /// Layer widths from input to output.
    pub fn layer_sizes(&self) -> [usize; 5] {
        let [h1, h2, h3] = self.hidden_sizes;
        [self.max_snps, h1, h2, h3, 1]
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| Error::io(path, e))
    }

    pub fn validate(&self) -> Result<()> {
        self.validate_split()?;

        let sim = &self.simulation;
        let invalid = |reason: String| Err(Error::InvalidConfig(reason));
        if sim.num_replicates == 0 {
            return invalid("num_replicates must be positive".to_string());
        }
        if sim.sample_size == 0 || sim.ploidy == 0 {
            return invalid("sample_size and ploidy must be positive".to_string());
        }
        if !(sim.sequence_length.is_finite() && sim.sequence_length > 0.0) {
            return invalid(format!(
                "sequence_length must be positive, got {}",
                sim.sequence_length
            ));
        }
        for (name, rate) in [
            ("recombination_rate", sim.recombination_rate),
            ("mutation_rate", sim.mutation_rate),
        ] {
            if !(rate.is_finite() && rate >= 0.0) {
                return invalid(format!("{name} must be non-negative, got {rate}"));
            }
        }
        if !(sim.ne_min.is_finite() && sim.ne_min > 0.0 && sim.ne_max.is_finite())
            || sim.ne_max < sim.ne_min
        {
            return invalid(format!(
                "need 0 < ne_min <= ne_max, got [{}, {}]",
                sim.ne_min, sim.ne_max
            ));
        }
        if sim.workers == Some(0) {
            return invalid("workers must be positive".to_string());
        }

        let training = &self.training;
        if training.max_snps == 0 || training.hidden_sizes.contains(&0) {
            return invalid("max_snps and hidden_sizes must be positive".to_string());
        }
        if training.batch_size == 0 {
            return invalid("batch_size must be positive".to_string());
        }
        if !(training.learning_rate.is_finite() && training.learning_rate > 0.0) {
            return invalid(format!(
                "learning_rate must be positive, got {}",
                training.learning_rate
            ));
        }
        if !(0.0..1.0).contains(&training.momentum) {
            return invalid(format!(
                "momentum must lie in [0, 1), got {}",
                training.momentum
            ));
        }
        Ok(())
    }

    fn validate_split(&self) -> Result<()> {
        let SplitConfig {
            train,
            validation,
            test,
        } = self.split;
        let sum = train + validation + test;
        let in_range = [train, validation, test]
            .iter()
            .all(|f| (0.0..=1.0).contains(f));
        if !in_range || (sum - 1.0).abs() > SPLIT_TOLERANCE {
            return Err(Error::InvalidSplit {
                train,
                validation,
                test,
                sum,
            });
        }
        Ok(())
    }

    /// Draws replicate seeds, then targets, from one master stream.
    fn draw_replicates(&self) -> (Vec<u64>, Vec<f64>) {
        let sim = &self.simulation;
        let mut rng = StdRng::seed_from_u64(sim.seed);
        let seeds = (0..sim.num_replicates)
            .map(|_| rng.gen_range(1..MAX_SEED))
            .collect();
        let targets = (0..sim.num_replicates)
            .map(|_| {
                if sim.ne_max > sim.ne_min {
                    rng.gen_range(sim.ne_min..=sim.ne_max)
                } else {
                    sim.ne_min
                }
            })
            .collect();
        (seeds, targets)
    }

    /// One seed per replicate, each in `1..2^32`.
    pub fn replicate_seeds(&self) -> Vec<u64> {
        self.draw_replicates().0
    }

    /// One target Ne per replicate, uniform on `[ne_min, ne_max]`.
    pub fn sample_targets(&self) -> Vec<f64> {
        self.draw_replicates().1
    }

    /// Replicates per split: floor for train and validation, the rest for test.
    pub fn split_counts(&self) -> (usize, usize, usize) {
        let n = self.simulation.num_replicates;
        let train = (self.split.train * n as f64).floor() as usize;
        let validation = (self.split.validation * n as f64).floor() as usize;
        let test = n.saturating_sub(train + validation);
        (train, validation, test)
    }

    /// Split label of every replicate, in replicate order.
    pub fn split_labels(&self) -> Result<Vec<SplitLabel>> {
        self.validate_split()?;
        let (train, validation, test) = self.split_counts();
        let labels: Vec<SplitLabel> = std::iter::repeat(SplitLabel::Train)
            .take(train)
            .chain(std::iter::repeat(SplitLabel::Validation).take(validation))
            .chain(std::iter::repeat(SplitLabel::Test).take(test))
            .collect();
        if labels.len() != self.simulation.num_replicates {
            return Err(Error::LabelCountMismatch {
                labels: labels.len(),
                replicates: self.simulation.num_replicates,
            });
        }
        Ok(labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_split(train: f64, validation: f64, test: f64) -> PipelineConfig {
        PipelineConfig {
            split: SplitConfig {
                train,
                validation,
                test,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_split_must_sum_to_one() {
        assert!(with_split(0.8, 0.1, 0.1).validate().is_ok());
        assert!(with_split(1.0, 0.0, 0.0).validate().is_ok());
        assert!(matches!(
            with_split(0.8, 0.2, 0.2).validate(),
            Err(Error::InvalidSplit { .. })
        ));
        assert!(matches!(
            with_split(0.5, 0.1, 0.1).split_labels(),
            Err(Error::InvalidSplit { .. })
        ));
        assert!(with_split(1.2, -0.1, -0.1).validate().is_err());
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        let mut config = PipelineConfig::default();
        config.simulation.ne_min = 5_000.0;
        config.simulation.ne_max = 10.0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config = PipelineConfig::default();
        config.simulation.mutation_rate = -1.0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.training.momentum = 1.0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.simulation.workers = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_seeds_and_targets_are_deterministic() {
        let mut config = PipelineConfig::default();
        config.simulation.num_replicates = 50;
        let seeds = config.replicate_seeds();
        assert_eq!(seeds, config.replicate_seeds());
        assert_eq!(seeds.len(), 50);
        assert!(seeds.iter().all(|&s| (1..MAX_SEED).contains(&s)));

        let targets = config.sample_targets();
        assert_eq!(targets, config.sample_targets());
        assert!(targets
            .iter()
            .all(|&ne| (config.simulation.ne_min..=config.simulation.ne_max).contains(&ne)));

        config.simulation.seed += 1;
        assert_ne!(seeds, config.replicate_seeds());
    }

    #[test]
    fn test_fixed_target_when_range_is_a_point() {
        let mut config = PipelineConfig::default();
        config.simulation.num_replicates = 3;
        config.simulation.ne_min = 500.0;
        config.simulation.ne_max = 500.0;
        assert_eq!(config.sample_targets(), vec![500.0; 3]);
    }

    #[test]
    fn test_split_label_counts() {
        let mut config = with_split(0.7, 0.15, 0.15);
        config.simulation.num_replicates = 101;
        let (train, validation, test) = config.split_counts();
        assert_eq!((train, validation), (70, 15));
        assert_eq!(test, 16);

        let labels = config.split_labels().unwrap();
        assert_eq!(labels.len(), 101);
        let count = |label| labels.iter().filter(|&&l| l == label).count();
        assert_eq!(count(SplitLabel::Train), train);
        assert_eq!(count(SplitLabel::Validation), validation);
        assert_eq!(count(SplitLabel::Test), test);
        assert_eq!(labels[0], SplitLabel::Train);
        assert_eq!(labels[100], SplitLabel::Test);
    }

    #[test]
    fn test_config_json_roundtrip_and_partial_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = PipelineConfig::default();
        config.simulation.num_replicates = 12;
        config.training.hidden_sizes = [8, 4, 2];
        config.save(&path).unwrap();
        assert_eq!(PipelineConfig::load(&path).unwrap(), config);

        std::fs::write(&path, r#"{"simulation": {"num_replicates": 5}}"#).unwrap();
        let partial = PipelineConfig::load(&path).unwrap();
        assert_eq!(partial.simulation.num_replicates, 5);
        assert_eq!(partial.split, SplitConfig::default());
    }

    #[test]
    fn test_layer_sizes() {
        let config = TrainingConfig {
            max_snps: 100,
            hidden_sizes: [32, 16, 8],
            ..Default::default()
        };
        assert_eq!(config.layer_sizes(), [100, 32, 16, 8, 1]);
    }
}
