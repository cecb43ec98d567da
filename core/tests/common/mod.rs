use kiln_core::{ExecutionMode, GenerationParams, Kernel, Pipeline, StepProgress};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A kernel that "loads" any path, except in the modes it was told to fail in.
#[derive(Clone, Default)]
pub struct FakeKernel {
    pub loads: Arc<Mutex<Vec<ExecutionMode>>>,
    pub failing_modes: Vec<ExecutionMode>,
    pub step_delay: Duration,
}

impl FakeKernel {
    pub fn failing_in(modes: &[ExecutionMode]) -> Self {
        Self {
            failing_modes: modes.to_vec(),
            ..Self::default()
        }
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    pub fn loads(&self) -> Vec<ExecutionMode> {
        self.loads.lock().unwrap().clone()
    }
}

impl Kernel for FakeKernel {
    type Pipeline = FakePipeline;

    fn load(&self, location: &Path, mode: ExecutionMode) -> anyhow::Result<FakePipeline> {
        self.loads.lock().unwrap().push(mode);
        if self.failing_modes.contains(&mode) {
            anyhow::bail!("{} cannot run in {}", location.display(), mode);
        }
        let name = location
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(FakePipeline {
            name,
            mode,
            step_delay: self.step_delay,
        })
    }
}

pub struct FakePipeline {
    pub name: String,
    pub mode: ExecutionMode,
    pub step_delay: Duration,
}

impl Pipeline for FakePipeline {
    type Output = String;

    fn run(
        &self,
        params: &GenerationParams,
        steps: u32,
        on_step: &mut dyn FnMut(StepProgress<String>) -> bool,
    ) -> anyhow::Result<Vec<String>> {
        for step in 1..=steps {
            std::thread::sleep(self.step_delay);
            let progress = StepProgress {
                step,
                total: steps,
                previews: vec![format!("preview {step}")],
            };
            if !on_step(progress) {
                anyhow::bail!("stopped at step {step}");
            }
        }
        Ok((0..params.image_count)
            .map(|idx| format!("{}/{}/{}", self.name, params.prompt, params.seed + u64::from(idx)))
            .collect())
    }
}

/// Send the orchestrator's traces to the test output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub async fn eventually<F: Fn() -> bool>(condition: F) {
    for _ in 0..5_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition was not met in time");
}
