//! Stand-ins for real work: a kernel that pretends to sample images, and leaf tasks that pretend
//! to build something, one timed step after another.
//!
use kiln_core::{
    ExecutionMode, GenerationParams, Job, JobContext, JobError, JobId, JobKind, Kernel, Pipeline,
    StepProgress, Taskable,
};
use std::path::Path;
use std::time::Duration;
use tracing::*;

#[derive(Debug, Clone)]
pub struct SimulatedKernel {
    step_delay: Duration,
}

impl SimulatedKernel {
    pub fn new(step_delay: Duration) -> Self {
        Self { step_delay }
    }
}

impl Kernel for SimulatedKernel {
    type Pipeline = SimulatedPipeline;

    fn load(&self, location: &Path, mode: ExecutionMode) -> anyhow::Result<SimulatedPipeline> {
        let name = location
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .ok_or_else(|| anyhow::anyhow!("{} does not name a model", location.display()))?;
        debug!("Loaded {} in {} mode", name, mode);
        Ok(SimulatedPipeline {
            name,
            step_delay: self.step_delay,
        })
    }
}

#[derive(Debug)]
pub struct SimulatedPipeline {
    name: String,
    step_delay: Duration,
}

impl Pipeline for SimulatedPipeline {
    type Output = String;

    fn run(
        &self,
        params: &GenerationParams,
        steps: u32,
        on_step: &mut dyn FnMut(StepProgress<String>) -> bool,
    ) -> anyhow::Result<Vec<String>> {
        for step in 1..=steps {
            std::thread::sleep(self.step_delay);
            let keep_going = on_step(StepProgress {
                step,
                total: steps,
                previews: vec![],
            });
            if !keep_going {
                anyhow::bail!("sampling stopped at step {} of {}", step, steps);
            }
        }

        Ok((0..params.image_count)
            .map(|idx| format!("{}-{}.png", self.name, params.seed + u64::from(idx)))
            .collect())
    }
}

/// A leaf task that takes `steps` steps of `step_delay` each, and optionally fails at the end.
#[derive(Debug, Clone)]
pub struct SimulatedTask {
    pub steps: u32,
    pub step_delay: Duration,
    pub fail: bool,
}

impl Taskable for SimulatedTask {
    fn create_job(&self, rule: &str, parent: Option<JobId>) -> Job<()> {
        let task = self.clone();
        let name = rule.to_string();
        let body = move |ctx: JobContext<()>| task.run(name, ctx);
        match parent {
            Some(parent) => Job::child(parent, rule, JobKind::Task, body),
            None => Job::new(rule, JobKind::Task, body),
        }
    }
}

impl SimulatedTask {
    async fn run(self, rule: String, ctx: JobContext<()>) -> Result<(), JobError> {
        ctx.set_total(u64::from(self.steps));
        for step in 1..=self.steps {
            ctx.until_cancelled(tokio::time::sleep(self.step_delay))
                .await?;
            ctx.report_progress(u64::from(step), None);
        }
        if self.fail {
            return Err(anyhow::anyhow!("{} failed on purpose", rule).into());
        }
        Ok(())
    }
}
