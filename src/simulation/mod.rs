//! Generates the training data: one coalescent replicate per target Ne,
//! persisted as an array of site positions, indexed by a manifest.

mod coalescent;

pub use coalescent::Coalescent;

use std::path::{Path, PathBuf};

use crossbeam::channel::Sender;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::storage::{write_manifest, write_npy_f64, ManifestRow};
use crate::{Error, Result};

pub const REPLICATE_DIR: &str = "replicates";
pub const MANIFEST_FILE: &str = "manifest.csv";
pub const CONFIG_FILE: &str = "config.json";

/// Progress of a simulation batch, published while it runs.
#[derive(Debug, Clone, PartialEq)]
pub enum SimulationEvent {
    Started { replicates: usize },
    ReplicateDone { index: usize, sites: usize },
    Finished { manifest: PathBuf },
}

pub fn replicate_path(index: usize) -> PathBuf {
    Path::new(REPLICATE_DIR).join(format!("rep_{index:05}.npy"))
}

/// Simulates every replicate of `config` into `output_dir` and writes the
/// manifest. The first failing replicate aborts the batch.
pub fn run_simulations(
    config: &PipelineConfig,
    output_dir: &Path,
    events: Option<&Sender<SimulationEvent>>,
) -> Result<Vec<ManifestRow>> {
    config.validate()?;
    let sim = &config.simulation;
    let seeds = config.replicate_seeds();
    let targets = config.sample_targets();
    let labels = config.split_labels()?;

    let replicate_dir = output_dir.join(REPLICATE_DIR);
    std::fs::create_dir_all(&replicate_dir).map_err(|e| Error::io(&replicate_dir, e))?;
    config.save(&output_dir.join(CONFIG_FILE))?;

    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(workers) = sim.workers {
        builder = builder.num_threads(workers);
    }
    let pool = builder
        .build()
        .map_err(|e| Error::InvalidConfig(format!("cannot start worker pool: {e}")))?;

    info!(
        replicates = sim.num_replicates,
        workers = pool.current_num_threads(),
        output = %output_dir.display(),
        "simulating replicates"
    );
    let notify = |event: SimulationEvent| {
        if let Some(sender) = events {
            // a dropped receiver only means nobody is watching
            let _ = sender.send(event);
        }
    };
    notify(SimulationEvent::Started {
        replicates: sim.num_replicates,
    });

    let rows = pool.install(|| {
        (0..sim.num_replicates)
            .into_par_iter()
            .map(|index| -> Result<ManifestRow> {
                let coalescent = Coalescent {
                    haplotypes: sim.haplotypes(),
                    ploidy: sim.ploidy,
                    sequence_length: sim.sequence_length,
                    recombination_rate: sim.recombination_rate,
                    mutation_rate: sim.mutation_rate,
                    ne: targets[index],
                };
                let mut rng = StdRng::seed_from_u64(seeds[index]);
                let positions = coalescent
                    .simulate(&mut rng)
                    .map_err(|reason| Error::Simulation { index, reason })?;

                let path = replicate_path(index);
                write_npy_f64(&output_dir.join(&path), &positions)?;
                debug!(index, ne = targets[index], sites = positions.len(), "replicate done");
                notify(SimulationEvent::ReplicateDone {
                    index,
                    sites: positions.len(),
                });
                Ok(ManifestRow {
                    ne: targets[index],
                    path,
                    split: labels[index],
                })
            })
            .collect::<Result<Vec<_>>>()
    })?;

    let manifest = output_dir.join(MANIFEST_FILE);
    write_manifest(&manifest, &rows)?;
    info!(manifest = %manifest.display(), "simulation finished");
    notify(SimulationEvent::Finished { manifest });
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{read_manifest, read_npy_f64, SplitLabel};

    fn small_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.simulation.num_replicates = 6;
        config.simulation.sample_size = 4;
        config.simulation.sequence_length = 1e4;
        config.simulation.mutation_rate = 1e-7;
        config.simulation.ne_min = 100.0;
        config.simulation.ne_max = 1000.0;
        config.simulation.workers = Some(2);
        config.split.train = 0.5;
        config.split.validation = 0.25;
        config.split.test = 0.25;
        config
    }

    #[test]
    fn test_replicate_path() {
        assert_eq!(
            replicate_path(7),
            Path::new("replicates").join("rep_00007.npy")
        );
    }

    #[test]
    fn test_run_simulations_writes_arrays_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config();
        let (sender, receiver) = crossbeam::channel::unbounded();
        let rows = run_simulations(&config, dir.path(), Some(&sender)).unwrap();
        drop(sender);

        assert_eq!(rows.len(), 6);
        assert_eq!(read_manifest(&dir.path().join(MANIFEST_FILE)).unwrap(), rows);
        let splits: Vec<SplitLabel> = rows.iter().map(|r| r.split).collect();
        assert_eq!(
            splits,
            [
                SplitLabel::Train,
                SplitLabel::Train,
                SplitLabel::Train,
                SplitLabel::Validation,
                SplitLabel::Test,
                SplitLabel::Test,
            ]
        );
        for (row, ne) in rows.iter().zip(config.sample_targets()) {
            assert_eq!(row.ne, ne);
            let positions = read_npy_f64(&dir.path().join(&row.path)).unwrap();
            assert!(positions.windows(2).all(|w| w[0] <= w[1]));
        }

        let events: Vec<SimulationEvent> = receiver.iter().collect();
        assert_eq!(events.first(), Some(&SimulationEvent::Started { replicates: 6 }));
        let done = events
            .iter()
            .filter(|e| matches!(e, SimulationEvent::ReplicateDone { .. }))
            .count();
        assert_eq!(done, 6);
        assert!(matches!(events.last(), Some(SimulationEvent::Finished { .. })));
        assert!(dir.path().join(CONFIG_FILE).exists());
    }

    #[test]
    fn test_runs_are_reproducible() {
        let config = small_config();
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let rows = run_simulations(&config, first.path(), None).unwrap();
        run_simulations(&config, second.path(), None).unwrap();
        for row in rows {
            assert_eq!(
                read_npy_f64(&first.path().join(&row.path)).unwrap(),
                read_npy_f64(&second.path().join(&row.path)).unwrap()
            );
        }
    }

    #[test]
    fn test_invalid_split_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = small_config();
        config.split.test = 0.5;
        assert!(matches!(
            run_simulations(&config, dir.path(), None),
            Err(Error::InvalidSplit { .. })
        ));
        assert!(!dir.path().join(MANIFEST_FILE).exists());
        assert!(!dir.path().join(REPLICATE_DIR).exists());
    }

    #[test]
    fn test_failing_replicate_aborts_batch() {
        let dir = tempfile::tempdir().unwrap();
        let blocked = dir.path().join(replicate_path(3));
        std::fs::create_dir_all(&blocked).unwrap();

        let (sender, receiver) = crossbeam::channel::unbounded();
        let err = run_simulations(&small_config(), dir.path(), Some(&sender)).unwrap_err();
        drop(sender);

        match err {
            Error::Io { path, .. } => assert_eq!(path, blocked),
            other => panic!("expected an I/O error, got {other}"),
        }
        assert!(!dir.path().join(MANIFEST_FILE).exists());
        let events: Vec<SimulationEvent> = receiver.iter().collect();
        assert!(!events
            .iter()
            .any(|e| matches!(e, SimulationEvent::Finished { .. })));
    }
}
