pub mod config;
pub mod data;
pub mod device;
mod error;
pub mod evaluate;
pub mod nn;
pub mod optim;
pub mod simulation;
pub mod storage;
pub mod tensor;
pub mod train;

pub use error::{Error, Result};
