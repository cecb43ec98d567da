use crate::cache::ResourceCache;
use crate::events::EventChannel;
use crate::graph::{GraphScheduler, Rule};
use crate::job::{Job, JobContext, JobError};
use crate::kernel::{
    DirLocator, GenerationParams, GenerationRequest, Kernel, Locator, Pipeline, StepProgress,
};
use crate::model::{ExecutionMode, JobKind, JobState};
use crate::queue::SerialQueue;
use crate::registry::JobRegistry;
use crate::sync::Arc;
use crate::Config;
use tokio::task::JoinError;
use tracing::{instrument, *};

/// The outputs of a generation run with the kernel `K`.
pub type Outputs<K> = Vec<<<K as Kernel>::Pipeline as Pipeline>::Output>;

/// A generation job. Its progress is measured in sampling steps, and carries the latest previews.
pub type GenerationJob<K> = Job<Outputs<K>, Outputs<K>>;

/// # Orchestrator
///
/// This struct owns the shared state every job goes through: the `JobRegistry` that tracks them,
/// the `SerialQueue` that guards the compute resource, the `ResourceCache` of loaded pipelines
/// and the `GraphScheduler` that runs dependency graphs.
///
/// Must be created from within a tokio runtime.
///
pub struct Orchestrator<K: Kernel, L: Locator = DirLocator> {
    config: Config,
    kernel: Arc<K>,
    locator: Arc<L>,
    registry: JobRegistry,
    queue: SerialQueue,
    cache: ResourceCache<String, K::Pipeline>,
    scheduler: GraphScheduler,
}

impl<K: Kernel, L: Locator> Clone for Orchestrator<K, L> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            kernel: self.kernel.clone(),
            locator: self.locator.clone(),
            registry: self.registry.clone(),
            queue: self.queue.clone(),
            cache: self.cache.clone(),
            scheduler: self.scheduler.clone(),
        }
    }
}

impl<K: Kernel> Orchestrator<K, DirLocator> {
    /// An orchestrator that finds resources under `Config::resource_root`.
    pub fn new(config: Config, kernel: K) -> Self {
        let locator = DirLocator::new(config.resource_root().clone());
        Self::with_locator(config, kernel, locator)
    }
}

impl<K: Kernel, L: Locator> Orchestrator<K, L> {
    #[instrument(name = "Orchestrator::with_locator", skip(kernel, locator))]
    pub fn with_locator(config: Config, kernel: K, locator: L) -> Self {
        let registry = JobRegistry::new(&config);
        let queue = SerialQueue::new(&config);
        let cache = ResourceCache::new(&config);
        let scheduler = GraphScheduler::new(&config, registry.clone(), queue.clone());
        Self {
            config,
            kernel: Arc::new(kernel),
            locator: Arc::new(locator),
            registry,
            queue,
            cache,
            scheduler,
        }
    }

    /// Start generating with the resource named by `request.model`.
    ///
    /// The resource is loaded through the cache, so concurrent generations share one load. Both
    /// loading and sampling go through the serial queue. Cancelling the returned job cancels its
    /// sampling step, never a load other generations may be waiting on.
    ///
    #[instrument(name = "Orchestrator::generate", skip(self))]
    pub fn generate(&self, request: GenerationRequest) -> GenerationJob<K> {
        let orchestrator = self.clone();
        let job = Job::new(
            format!("generate with {}", request.model),
            JobKind::Generate,
            move |ctx| orchestrator.run_generation(request, ctx),
        );
        self.registry.register(&job);
        job.resume()
    }

    /// Start building `rule`, and everything it depends on.
    #[instrument(name = "Orchestrator::build", skip(self, rule), fields(rule = %rule.name()))]
    pub fn build(&self, rule: Rule) -> Job<()> {
        self.scheduler.schedule(&rule, None)
    }

    /// Forget the resource loaded for `key` so the next generation loads it again, with the next
    /// execution mode. Returns that mode.
    pub fn retry_resource(&self, key: &str) -> ExecutionMode {
        self.cache.drop_for_retry(&key.to_string())
    }

    /// Remove every failed job from the registry. Returns how many were removed.
    pub fn clear_failed(&self) -> usize {
        self.registry.clear_failed()
    }

    /// Stop admitting work to the serial queue and drop every cached resource.
    pub fn shutdown(&self) {
        self.queue.shutdown();
        self.cache.clear();
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn queue(&self) -> &SerialQueue {
        &self.queue
    }

    pub fn cache(&self) -> &ResourceCache<String, K::Pipeline> {
        &self.cache
    }

    pub fn event_channel(&self) -> Arc<EventChannel> {
        self.config.event_channel()
    }

    async fn run_generation(
        self,
        request: GenerationRequest,
        ctx: JobContext<Outputs<K>>,
    ) -> Result<Outputs<K>, JobError> {
        let steps = request.steps.unwrap_or_else(|| self.config.default_steps());
        ctx.set_total(u64::from(steps));

        let load = self.load(&request.model);
        let pipeline = ctx.until_cancelled(load.wait_for_value()).await??;

        let sample = Job::child(
            ctx.id(),
            format!("sample with {}", request.model),
            JobKind::Sample,
            move |sctx| sample(pipeline, request.params, steps, sctx),
        );
        self.registry.register(&sample);
        if let Err(err) = self.queue.enqueue_job(&sample) {
            let _ = sample.cancel(err.to_string());
            return Err(err.into());
        }

        let mut progress = sample.subscribe_progress();
        let state = loop {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => {
                    let _ = sample.cancel("generation cancelled");
                    break sample.wait().await;
                }
                state = sample.wait() => break state,
                changed = progress.changed() => {
                    if changed.is_err() {
                        break sample.wait().await;
                    }
                    let current = progress.borrow_and_update().clone();
                    ctx.report_progress(current.completed(), current.payload().cloned());
                }
            }
        };

        match state {
            JobState::Succeeded(outputs) => {
                ctx.report_progress(u64::from(steps), None);
                Ok(outputs)
            }
            JobState::Failed(err) => Err(err),
            JobState::Cancelled(reason) => Err(JobError::Cancelled { reason }),
            state => Err(JobError::InvalidState {
                job: sample.id(),
                status: state.status().name(),
                action: "collect outputs of",
            }),
        }
    }

    fn load(&self, key: &str) -> Job<Arc<K::Pipeline>> {
        self.cache.get_or_create(key.to_string(), |key, mode| {
            let locator = self.locator.clone();
            let kernel = self.kernel.clone();
            let resource = key.clone();
            let job = Job::new(
                format!("load {} ({})", key, mode),
                JobKind::LoadResource,
                move |ctx| load_resource(locator, kernel, resource, mode, ctx),
            );
            self.registry.register(&job);
            if let Err(err) = self.queue.enqueue_job(&job) {
                warn!("Could not queue the load of {}: {}", key, err);
                let _ = job.cancel(err.to_string());
            }
            job
        })
    }
}

async fn load_resource<K: Kernel, L: Locator>(
    locator: Arc<L>,
    kernel: Arc<K>,
    key: String,
    mode: ExecutionMode,
    ctx: JobContext<()>,
) -> Result<Arc<K::Pipeline>, JobError> {
    let location = ctx.until_cancelled(locator.locate(&key)).await??;
    ctx.check_cancelled()?;

    debug!("Loading {} from {:?} with {}", key, location, mode);
    let pipeline = tokio::task::spawn_blocking(move || kernel.load(&location, mode))
        .await
        .map_err(join_error)??;
    Ok(Arc::new(pipeline))
}

async fn sample<P: Pipeline>(
    pipeline: Arc<P>,
    params: GenerationParams,
    steps: u32,
    ctx: JobContext<Vec<P::Output>>,
) -> Result<Vec<P::Output>, JobError> {
    ctx.set_total(u64::from(steps));
    let reporter = ctx.reporter();
    let token = ctx.cancellation_token();

    let outputs = tokio::task::spawn_blocking(move || {
        let mut on_step = |progress: StepProgress<P::Output>| {
            reporter.report(u64::from(progress.step), Some(progress.previews));
            !token.is_cancelled()
        };
        pipeline.run(&params, steps, &mut on_step)
    })
    .await
    .map_err(join_error)??;

    ctx.check_cancelled()?;
    Ok(outputs)
}

fn join_error(err: JoinError) -> JobError {
    if err.is_panic() {
        let panic = err.into_panic();
        let message = panic
            .downcast_ref::<&str>()
            .map(|msg| msg.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        return JobError::Panicked { message };
    }
    JobError::cancelled(err.to_string())
}
