use crate::events::EventChannel;
use crate::model::ExecutionMode;
use crate::sync::Arc;
use std::path::PathBuf;
use std::time::Instant;
use thiserror::*;

/// A collection of options that affect how the orchestrator runs jobs.
///
#[derive(Builder, Debug, Clone)]
#[builder(build_fn(error = "ConfigError", validate = "Self::validate"))]
pub struct Config {
    /// The time at which this configuration was created.
    #[builder(default = "self.default_created_at()")]
    created_at: Instant,

    /// The preference order in which execution modes are tried when constructing a resource.
    /// A failed construction moves on to the next mode, wrapping around at the end.
    #[builder(default = "self.default_fallback_modes()")]
    fallback_modes: Vec<ExecutionMode>,

    /// How many sampling steps a generation runs when the request does not say.
    #[builder(default = "25")]
    default_steps: u32,

    /// The directory in which resources (models) are located by key.
    #[builder(setter(into), default = "self.default_resource_root()")]
    resource_root: PathBuf,

    /// Whether failed jobs stay in the registry until they are explicitly cleared.
    #[builder(default = "true")]
    retain_failed_jobs: bool,

    /// The Event Channel used across the orchestrator.
    /// NOTE: this is safe to clone since it is really an [Arc] to a shared queue.
    #[builder(default = "self.default_event_channel()")]
    event_channel: Arc<EventChannel>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            created_at: Instant::now(),
            fallback_modes: ExecutionMode::preference_order(),
            default_steps: 25,
            resource_root: PathBuf::from("./models"),
            retain_failed_jobs: true,
            event_channel: Arc::new(EventChannel::new()),
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn fallback_modes(&self) -> &[ExecutionMode] {
        &self.fallback_modes
    }

    pub fn default_steps(&self) -> u32 {
        self.default_steps
    }

    pub fn resource_root(&self) -> &PathBuf {
        &self.resource_root
    }

    pub fn retain_failed_jobs(&self) -> bool {
        self.retain_failed_jobs
    }

    pub fn event_channel(&self) -> Arc<EventChannel> {
        self.event_channel.clone()
    }
}

impl ConfigBuilder {
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(modes) = &self.fallback_modes {
            if modes.is_empty() {
                return Err(ConfigError::NoFallbackModes);
            }
            for (idx, mode) in modes.iter().enumerate() {
                if modes[..idx].contains(mode) {
                    return Err(ConfigError::DuplicateFallbackMode(*mode));
                }
            }
        }
        if self.default_steps == Some(0) {
            return Err(ConfigError::NoSteps);
        }
        Ok(())
    }

    fn default_created_at(&self) -> Instant {
        Instant::now()
    }

    fn default_fallback_modes(&self) -> Vec<ExecutionMode> {
        ExecutionMode::preference_order()
    }

    fn default_resource_root(&self) -> PathBuf {
        PathBuf::from("./models")
    }

    fn default_event_channel(&self) -> Arc<EventChannel> {
        EventChannel::new().into()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("At least one fallback execution mode is required")]
    NoFallbackModes,

    #[error("The fallback execution mode {0} was listed more than once")]
    DuplicateFallbackMode(ExecutionMode),

    #[error("The default number of steps must be greater than zero")]
    NoSteps,

    #[error("Attempted to build a Config struct while missing fields: {0:?}")]
    BuilderError(derive_builder::UninitializedFieldError),
}

impl From<derive_builder::UninitializedFieldError> for ConfigError {
    fn from(err: derive_builder::UninitializedFieldError) -> Self {
        Self::BuilderError(err)
    }
}
