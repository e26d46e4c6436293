//! Accelerator selection.
//!
//! Tensors in this crate always live in host memory; the chosen device is
//! reported so that runs record where they would have been placed.

use std::fmt;
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    Cpu,
    Cuda(usize),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(index) => write!(f, "cuda:{index}"),
        }
    }
}

/// Index of the least utilized GPU in `nvidia-smi` CSV output (one
/// percentage per line). Ties go to the lowest index.
pub fn least_busy(utilization: &str) -> Option<usize> {
    let loads = utilization
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.parse::<u32>().ok())
        .collect::<Option<Vec<u32>>>()?;
    loads
        .iter()
        .enumerate()
        .min_by_key(|&(index, &load)| (load, index))
        .map(|(index, _)| index)
}

fn query_utilization() -> Result<String, String> {
    let output = Command::new("nvidia-smi")
        .args([
            "--query-gpu=utilization.gpu",
            "--format=csv,noheader,nounits",
        ])
        .output()
        .map_err(|e| format!("cannot run nvidia-smi: {e}"))?;
    if !output.status.success() {
        return Err(format!("nvidia-smi exited with {}", output.status));
    }
    String::from_utf8(output.stdout).map_err(|e| format!("nvidia-smi output is not UTF-8: {e}"))
}

/// The least busy GPU, or the CPU when none can be queried.
pub fn select_device() -> Device {
    select_with(query_utilization)
}

fn select_with(query: impl FnOnce() -> Result<String, String>) -> Device {
    let device = match query() {
        Ok(output) => match least_busy(&output) {
            Some(index) => Device::Cuda(index),
            None => {
                warn!(output = %output.trim(), "unreadable GPU utilization, using cpu");
                Device::Cpu
            }
        },
        Err(reason) => {
            info!(%reason, "no GPU available, using cpu");
            Device::Cpu
        }
    };
    info!(%device, "selected device");
    device
}

#[test]
fn test_least_busy() {
    assert_eq!(least_busy("35\n3\n80\n"), Some(1));
    assert_eq!(least_busy("0\n0\n"), Some(0));
    assert_eq!(least_busy(" 12 \n"), Some(0));
}

#[test]
fn test_least_busy_rejects_bad_output() {
    assert_eq!(least_busy(""), None);
    assert_eq!(least_busy("No devices were found"), None);
    assert_eq!(least_busy("10\n[N/A]\n"), None);
}

#[test]
fn test_falls_back_to_cpu() {
    assert_eq!(select_with(|| Err("missing".to_string())), Device::Cpu);
    assert_eq!(select_with(|| Ok("garbage".to_string())), Device::Cpu);
    assert_eq!(select_with(|| Ok("50\n20\n".to_string())), Device::Cuda(1));
}

#[test]
fn test_display() {
    assert_eq!(Device::Cpu.to_string(), "cpu");
    assert_eq!(Device::Cuda(2).to_string(), "cuda:2");
}
