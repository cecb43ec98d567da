use crate::flags::Flags;
use crate::reporter::StatusReporter;
use crate::simulator::SimulatedKernel;
use kiln_core::{Config, GenerationParams, GenerationRequest, JobError, Orchestrator};
use std::sync::Arc;
use std::time::Duration;
use structopt::StructOpt;

#[derive(StructOpt, Debug, Clone)]
#[structopt(
    name = "generate",
    setting = structopt::clap::AppSettings::ColoredHelp,
    about = "Generate images with a model from the models directory",
)]
pub struct GenerateCommand {
    #[structopt(help = r"The name of the model to use.", long = "model")]
    model: String,

    #[structopt(help = r"What to generate.", long = "prompt")]
    prompt: String,

    #[structopt(help = r"What to steer away from.", long = "negative-prompt", default_value = "")]
    negative_prompt: String,

    #[structopt(help = r"How many sampling steps to run.", long = "steps")]
    steps: Option<u32>,

    #[structopt(help = r"How many images to generate.", long = "count", default_value = "1")]
    count: u32,

    #[structopt(help = r"The seed of the first image.", long = "seed", default_value = "0")]
    seed: u64,

    #[structopt(long = "guidance-scale", default_value = "7.5")]
    guidance_scale: f32,

    #[structopt(
        help = r"How long each simulated sampling step takes, in milliseconds.",
        long = "step-ms",
        default_value = "5"
    )]
    step_ms: u64,

    #[structopt(flatten)]
    flags: Flags,
}

impl GenerateCommand {
    pub async fn run(self) -> Result<(), anyhow::Error> {
        let config = Config::try_from(self.flags)?;
        let reporter = StatusReporter::new(config.event_channel(), "Generating");
        let kernel = SimulatedKernel::new(Duration::from_millis(self.step_ms));
        let orchestrator = Orchestrator::new(config, kernel);

        let params = GenerationParams {
            prompt: self.prompt,
            negative_prompt: self.negative_prompt,
            seed: self.seed,
            guidance_scale: self.guidance_scale,
            image_count: self.count,
        };
        let mut request = GenerationRequest::new(self.model, params);
        request.steps = self.steps;

        let job = orchestrator.generate(request);
        reporter.run(Arc::new(job.clone())).await;
        orchestrator.shutdown();

        match job.wait_for_value().await {
            Ok(outputs) => {
                for output in outputs {
                    println!("{:>12} {}", "Generated", output);
                }
                Ok(())
            }
            Err(JobError::Cancelled { reason }) => {
                Err(anyhow::anyhow!("{} was cancelled: {}", job.label(), reason))
            }
            Err(err) => Err(anyhow::anyhow!("{} failed: {}", job.label(), err)),
        }
    }
}
