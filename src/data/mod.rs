//! Feeding replicates to the network: an indexable dataset over the manifest
//! and a shuffling, batching loader on top of it.

mod dataset;
mod loader;

pub use dataset::{Dataset, Example, SnpDataset, TargetScaler};
pub use loader::{Batch, Batches, DataLoader};
