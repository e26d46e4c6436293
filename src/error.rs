use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("split fractions must sum to one, got {train} + {validation} + {test} = {sum}")]
    InvalidSplit {
        train: f64,
        validation: f64,
        test: f64,
        sum: f64,
    },

    #[error("derived {labels} split labels for {replicates} replicates")]
    LabelCountMismatch { labels: usize, replicates: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("simulation of replicate {index} failed: {reason}")]
    Simulation { index: usize, reason: String },

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: malformed .npy file: {reason}")]
    Npy { path: PathBuf, reason: String },

    #[error("{path}:{line}: {reason}")]
    Manifest {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("ragged batch: expected {expected} features per example, found {found}")]
    RaggedBatch { expected: usize, found: usize },

    #[error("invalid model: {0}")]
    Model(String),

    #[error("plotting failed: {0}")]
    Plot(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Error {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
