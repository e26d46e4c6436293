//! On-disk artifacts: per-replicate `.npy` arrays and the CSV manifest that
//! indexes them.

mod manifest;
mod npy;

pub use manifest::{read_manifest, write_manifest, ManifestRow, SplitLabel, MANIFEST_HEADER};
pub use npy::{read_npy_f64, write_npy_f64};
