use kiln_core::{Config, ConfigError, ExecutionMode};
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(Default, Debug, Clone, StructOpt)]
pub struct Flags {
    #[structopt(
        help = r"The directory in which models are looked up by name.",
        long = "models-dir"
    )]
    pub(crate) models_dir: Option<PathBuf>,

    #[structopt(
        help = r"The execution modes to try when loading a model, in order.
A model that fails to load is retried in the next mode.

Valid modes are: all, cpu-and-gpu, and cpu-only.
",
        long = "fallback-modes",
        use_delimiter = true
    )]
    pub(crate) fallback_modes: Vec<ExecutionMode>,

    #[structopt(
        help = r"How many sampling steps to run when a request does not say.",
        long = "default-steps"
    )]
    pub(crate) default_steps: Option<u32>,

    #[structopt(
        help = r"Forget failed jobs as soon as they fail, instead of keeping them for inspection.",
        long = "discard-failed-jobs"
    )]
    pub(crate) discard_failed_jobs: bool,
}

impl TryFrom<Flags> for Config {
    type Error = ConfigError;

    fn try_from(flags: Flags) -> Result<Self, Self::Error> {
        let mut config = Config::builder();

        config.retain_failed_jobs(!flags.discard_failed_jobs);

        if let Some(dir) = flags.models_dir {
            config.resource_root(dir);
        }

        if !flags.fallback_modes.is_empty() {
            config.fallback_modes(flags.fallback_modes);
        }

        if let Some(steps) = flags.default_steps {
            config.default_steps(steps);
        }

        config.build()
    }
}
