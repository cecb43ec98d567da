//! # Computational kernel
//!
//! The orchestrator never runs inference itself. It locates resources with a `Locator`, builds
//! them into a `Pipeline` with a `Kernel`, and asks the pipeline to run. Both kernel calls are
//! blocking and long, so they are always made from a blocking thread.
//!
mod locator;

pub use locator::*;

use crate::model::ExecutionMode;
use serde_derive::{Deserialize, Serialize};
use std::path::Path;

/// Loads a resource from disk into something that can be run.
pub trait Kernel: Send + Sync + 'static {
    type Pipeline: Pipeline;

    fn load(&self, location: &Path, mode: ExecutionMode) -> anyhow::Result<Self::Pipeline>;
}

/// A loaded, ready to run resource.
pub trait Pipeline: Send + Sync + 'static {
    type Output: Clone + Send + Sync + 'static;

    /// Run for `steps` steps, calling `on_step` after each one. Returning `false` from `on_step`
    /// asks the pipeline to stop as soon as it can.
    fn run(
        &self,
        params: &GenerationParams,
        steps: u32,
        on_step: &mut dyn FnMut(StepProgress<Self::Output>) -> bool,
    ) -> anyhow::Result<Vec<Self::Output>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    pub prompt: String,
    pub negative_prompt: String,
    pub seed: u64,
    pub guidance_scale: f32,
    pub image_count: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            negative_prompt: String::new(),
            seed: 0,
            guidance_scale: 7.5,
            image_count: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepProgress<O> {
    pub step: u32,
    pub total: u32,
    pub previews: Vec<O>,
}

/// What to generate, and with which resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub model: String,
    pub params: GenerationParams,
    /// Falls back to `Config::default_steps` when missing.
    #[serde(default)]
    pub steps: Option<u32>,
}

impl GenerationRequest {
    pub fn new<M: Into<String>>(model: M, params: GenerationParams) -> Self {
        Self {
            model: model.into(),
            params,
            steps: None,
        }
    }

    pub fn with_steps(mut self, steps: u32) -> Self {
        self.steps = Some(steps);
        self
    }
}
