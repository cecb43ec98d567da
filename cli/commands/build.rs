use crate::flags::Flags;
use crate::graph_file::GraphFile;
use crate::reporter::StatusReporter;
use crate::simulator::SimulatedKernel;
use kiln_core::{Config, JobStatus, Orchestrator};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use structopt::StructOpt;

#[derive(StructOpt, Debug, Clone)]
#[structopt(
    name = "build",
    setting = structopt::clap::AppSettings::ColoredHelp,
    about = "Build every rule of a dependency graph",
)]
pub struct BuildCommand {
    #[structopt(
        help = r"The JSON file describing the graph to build.

Each rule has a name, and optionally: deps, steps, step_ms,
fail, exclusive, or nested rules to make it a composite.
",
        parse(from_os_str)
    )]
    graph: PathBuf,

    #[structopt(flatten)]
    flags: Flags,
}

impl BuildCommand {
    pub async fn run(self) -> Result<(), anyhow::Error> {
        let rule = GraphFile::read(&self.graph).await?.into_rule()?;

        let config = Config::try_from(self.flags)?;
        let reporter = StatusReporter::new(config.event_channel(), "Building");
        let orchestrator = Orchestrator::new(config, SimulatedKernel::new(Duration::ZERO));

        let job = orchestrator.build(rule);
        let status = reporter.run(Arc::new(job.clone())).await;
        orchestrator.shutdown();

        match status {
            JobStatus::Succeeded => Ok(()),
            JobStatus::Failed(err) => Err(anyhow::anyhow!("{} failed: {}", job.label(), err)),
            JobStatus::Cancelled(reason) => {
                Err(anyhow::anyhow!("{} was cancelled: {}", job.label(), reason))
            }
            status => Err(anyhow::anyhow!("{} stopped while {}", job.label(), status)),
        }
    }
}
