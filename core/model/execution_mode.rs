use serde_derive::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::*;

/// The hardware a resource is built to execute on. Resources that fail to build in one mode are
/// retried in the next one.
///
#[derive(
    Default, Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize,
)]
pub enum ExecutionMode {
    /// Let the kernel use every available compute unit, including the accelerator.
    #[default]
    All,
    CpuAndGpu,
    CpuOnly,
}

impl ExecutionMode {
    /// The default preference order used when nothing else is configured.
    pub fn preference_order() -> Vec<ExecutionMode> {
        vec![
            ExecutionMode::All,
            ExecutionMode::CpuAndGpu,
            ExecutionMode::CpuOnly,
        ]
    }

    /// The mode that follows `self` in `order`, wrapping around at the end. Modes missing from
    /// `order` restart at its first entry.
    pub fn next_in(&self, order: &[ExecutionMode]) -> ExecutionMode {
        match order.iter().position(|mode| mode == self) {
            Some(idx) => order[(idx + 1) % order.len()],
            None => order.first().copied().unwrap_or(*self),
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ExecutionMode::All => "all",
            ExecutionMode::CpuAndGpu => "cpu-and-gpu",
            ExecutionMode::CpuOnly => "cpu-only",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum ExecutionModeError {
    #[error("Invalid execution mode {0}. Valid modes are: all, cpu-and-gpu, and cpu-only.")]
    InvalidMode(String),
}

impl FromStr for ExecutionMode {
    type Err = ExecutionModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(ExecutionMode::All),
            "cpu-and-gpu" => Ok(ExecutionMode::CpuAndGpu),
            "cpu-only" => Ok(ExecutionMode::CpuOnly),
            _ => Err(ExecutionModeError::InvalidMode(s.to_string())),
        }
    }
}
