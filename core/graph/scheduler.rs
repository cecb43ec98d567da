use super::{BuildGraph, CompositeRule, GraphError, LeafRule, Rule};
use crate::events::event::SchedulerEvent;
use crate::events::EventChannel;
use crate::job::{Job, JobContext, JobError};
use crate::model::{JobId, JobKind, JobState};
use crate::queue::SerialQueue;
use crate::registry::JobRegistry;
use crate::sync::Arc;
use crate::Config;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tracing::{instrument, *};

type Finished = (String, Job<()>, JobState<()>);

/// The `GraphScheduler` turns rules into running jobs.
///
/// Leaf rules become the job their `Taskable` creates. Composite rules become a `Build` job that
/// walks the nested graph one generation at a time: it starts every buildable rule, waits for
/// at least one of them to finish, records every child that has finished by then, and repeats
/// until nothing remains.
///
/// A run fails with `ChildFailed` on the first child failure, and is cancelled as soon as a child
/// is cancelled. Either way, the children still in flight are cancelled and nothing else starts.
///
#[derive(Clone, Debug)]
pub struct GraphScheduler {
    registry: JobRegistry,
    queue: SerialQueue,
    event_channel: Arc<EventChannel>,
}

impl GraphScheduler {
    pub fn new(config: &Config, registry: JobRegistry, queue: SerialQueue) -> Self {
        Self {
            registry,
            queue,
            event_channel: config.event_channel(),
        }
    }

    /// Create, register and start the job for `rule`.
    ///
    #[instrument(name = "GraphScheduler::schedule", skip(self, rule), fields(rule = %rule.name()))]
    pub fn schedule(&self, rule: &Rule, parent: Option<JobId>) -> Job<()> {
        match rule {
            Rule::Leaf(leaf) => self.schedule_leaf(leaf, parent),
            Rule::Composite(composite) => self.schedule_composite(composite, parent),
        }
    }

    fn schedule_leaf(&self, leaf: &LeafRule, parent: Option<JobId>) -> Job<()> {
        let job = leaf.create_job(parent);
        self.registry.register(&job);

        if !leaf.is_exclusive() {
            return job.resume();
        }

        if let Err(err) = self.queue.enqueue_job(&job) {
            warn!("Could not queue {}: {}", leaf.name(), err);
            let _ = job.cancel(err.to_string());
        }
        job
    }

    fn schedule_composite(&self, composite: &CompositeRule, parent: Option<JobId>) -> Job<()> {
        let scheduler = self.clone();
        let graph = composite.graph().clone();
        let body = move |ctx: JobContext<()>| scheduler.drive(graph, ctx);
        let job = match parent {
            Some(parent) => Job::child(parent, composite.name(), JobKind::Build, body),
            None => Job::new(composite.name(), JobKind::Build, body),
        };
        self.registry.register(&job);
        job.resume()
    }

    // NOTE: boxed by hand, since a run schedules the composites nested in it and so its future
    // would otherwise be defined in terms of itself.
    fn drive(self, graph: BuildGraph, ctx: JobContext<()>) -> BoxFuture<'static, Result<(), JobError>> {
        async move {
            let run = ctx.id();
            let mut run_state = RunState::new(graph);
            ctx.set_total(run_state.graph.len() as u64);

            let result = self.generations(&mut run_state, &ctx).await;

            if result.is_err() {
                let reason = format!("run {} stopped", run);
                for job in run_state.launched.iter().filter(|job| !job.is_terminal()) {
                    let _ = job.cancel(reason.as_str());
                }
            }

            let status = match &result {
                Ok(()) => "succeeded",
                Err(JobError::Cancelled { .. }) => "cancelled",
                Err(_) if ctx.is_cancelled() => "cancelled",
                Err(_) => "failed",
            };
            self.event_channel.send(SchedulerEvent::RunFinished {
                run,
                status: status.to_string(),
            });
            result
        }
        .boxed()
    }

    async fn generations(&self, run_state: &mut RunState, ctx: &JobContext<()>) -> Result<(), JobError> {
        let run = ctx.id();
        loop {
            ctx.check_cancelled()?;

            let buildable: Vec<Rule> = run_state
                .graph
                .buildable_rules()
                .into_iter()
                .cloned()
                .collect();

            if !buildable.is_empty() {
                let names: Vec<String> = buildable.iter().map(|r| r.name().to_string()).collect();
                debug!("Run {} starting generation: {:?}", run, names);
                run_state.graph.will_start_building(&names);
                self.event_channel.send(SchedulerEvent::GenerationStarted {
                    run,
                    rules: names,
                });

                for rule in buildable {
                    let job = self.schedule(&rule, Some(run));
                    run_state.launch(rule.name().to_string(), job);
                }
            }

            if run_state.graph.is_done() {
                return Ok(());
            }

            if run_state.in_flight.is_empty() {
                let remaining = run_state
                    .graph
                    .remaining()
                    .into_iter()
                    .map(str::to_string)
                    .collect();
                return Err(GraphError::Stalled { remaining }.into());
            }

            let next = tokio::select! {
                biased;
                _ = ctx.cancelled() => None,
                next = run_state.in_flight.next() => next,
            };
            let Some(first) = next else {
                ctx.check_cancelled()?;
                continue;
            };

            let mut finished = vec![first];
            while let Some(Some(next)) = run_state.in_flight.next().now_or_never() {
                finished.push(next);
            }

            for (rule, job, state) in finished {
                match state {
                    JobState::Succeeded(()) => {
                        if run_state.graph.did_finish_building(&rule) {
                            run_state.done += 1;
                            ctx.report_progress(run_state.done, None);
                            self.event_channel
                                .send(SchedulerEvent::RuleFinished { run, rule });
                        }
                    }
                    JobState::Failed(err) => {
                        return Err(JobError::ChildFailed {
                            rule,
                            job: job.id(),
                            source: Box::new(err),
                        })
                    }
                    JobState::Cancelled(reason) => {
                        return Err(JobError::cancelled(format!(
                            "{} was cancelled: {}",
                            rule, reason
                        )))
                    }
                    state => debug!("{} finished waiting while {}", rule, state.status()),
                }
            }

            let cancelled_child = self
                .registry
                .children_of(run)
                .into_iter()
                .find(|child| child.status().is_cancelled());
            if let Some(child) = cancelled_child {
                return Err(JobError::cancelled(format!(
                    "{} was cancelled",
                    child.label()
                )));
            }
        }
    }
}

struct RunState {
    graph: BuildGraph,
    in_flight: FuturesUnordered<BoxFuture<'static, Finished>>,
    launched: Vec<Job<()>>,
    done: u64,
}

impl RunState {
    fn new(graph: BuildGraph) -> Self {
        Self {
            graph,
            in_flight: FuturesUnordered::new(),
            launched: vec![],
            done: 0,
        }
    }

    fn launch(&mut self, rule: String, job: Job<()>) {
        self.launched.push(job.clone());
        self.in_flight.push(
            async move {
                let state = job.wait().await;
                (rule, job, state)
            }
            .boxed(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event::Event;
    use crate::graph::Taskable;
    use crate::testing::eventually;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Clone, Copy)]
    enum Outcome {
        Succeed,
        Fail,
        NotFound,
        Hang,
    }

    #[derive(Clone, Default)]
    struct Journal {
        log: Arc<Mutex<Vec<String>>>,
        active: Arc<AtomicUsize>,
        max_active: Arc<AtomicUsize>,
    }

    impl Journal {
        fn record(&self, line: String) {
            self.log.lock().unwrap().push(line);
        }

        fn lines(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        fn position(&self, line: &str) -> usize {
            self.lines()
                .iter()
                .position(|l| l == line)
                .unwrap_or_else(|| panic!("{line} was never recorded"))
        }

        fn contains(&self, line: &str) -> bool {
            self.lines().iter().any(|l| l == line)
        }
    }

    struct Step {
        journal: Journal,
        delay: Duration,
        outcome: Outcome,
    }

    impl Taskable for Step {
        fn create_job(&self, rule: &str, parent: Option<JobId>) -> Job<()> {
            let journal = self.journal.clone();
            let delay = self.delay;
            let outcome = self.outcome;
            let name = rule.to_string();
            let body = move |ctx: JobContext<()>| run_step(journal, delay, outcome, name, ctx);
            match parent {
                Some(parent) => Job::child(parent, rule, JobKind::Task, body),
                None => Job::new(rule, JobKind::Task, body),
            }
        }
    }

    async fn run_step(
        journal: Journal,
        delay: Duration,
        outcome: Outcome,
        name: String,
        ctx: JobContext<()>,
    ) -> Result<(), JobError> {
        journal.record(format!("start {name}"));
        let active = journal.active.fetch_add(1, Ordering::SeqCst) + 1;
        journal.max_active.fetch_max(active, Ordering::SeqCst);
        let slept = ctx.until_cancelled(tokio::time::sleep(delay)).await;
        journal.active.fetch_sub(1, Ordering::SeqCst);
        slept?;

        match outcome {
            Outcome::Succeed => (),
            Outcome::Fail => return Err(anyhow::anyhow!("{name} broke").into()),
            Outcome::NotFound => return Err(JobError::NotFound { key: name }),
            Outcome::Hang => {
                ctx.until_cancelled(futures::future::pending::<()>()).await?;
            }
        }
        journal.record(format!("finish {name}"));
        Ok(())
    }

    struct Fixture {
        config: Config,
        registry: JobRegistry,
        scheduler: GraphScheduler,
        journal: Journal,
    }

    impl Fixture {
        fn new() -> Self {
            let config = Config::default();
            let registry = JobRegistry::new(&config);
            let queue = SerialQueue::new(&config);
            let scheduler = GraphScheduler::new(&config, registry.clone(), queue);
            Self {
                config,
                registry,
                scheduler,
                journal: Journal::default(),
            }
        }

        fn leaf(&self, name: &str, deps: &[&str], outcome: Outcome) -> LeafRule {
            self.leaf_taking(name, deps, outcome, Duration::from_millis(5))
        }

        fn leaf_taking(&self, name: &str, deps: &[&str], outcome: Outcome, delay: Duration) -> LeafRule {
            let step = Step {
                journal: self.journal.clone(),
                delay,
                outcome,
            };
            LeafRule::new(name, step).depends_on(deps.iter().copied())
        }

        fn run(&self, name: &str, rules: Vec<Rule>) -> Job<()> {
            let graph = BuildGraph::new(rules).unwrap();
            self.scheduler
                .schedule(&CompositeRule::new(name, graph).into(), None)
        }

        fn generations(&self, run: JobId) -> Vec<Vec<String>> {
            self.config
                .event_channel()
                .consumer()
                .drain()
                .into_iter()
                .filter_map(|event| match event {
                    Event::SchedulerEvent(SchedulerEvent::GenerationStarted { run: r, rules })
                        if r == run =>
                    {
                        Some(rules)
                    }
                    _ => None,
                })
                .collect()
        }
    }

    #[tokio::test]
    async fn dependents_wait_for_all_of_their_dependencies() {
        let f = Fixture::new();
        let run = f.run(
            "diamond",
            vec![
                f.leaf("a", &[], Outcome::Succeed).into(),
                f.leaf_taking("b", &[], Outcome::Succeed, Duration::from_millis(20))
                    .into(),
                f.leaf("c", &["a", "b"], Outcome::Succeed).into(),
            ],
        );

        assert_matches!(run.wait().await, JobState::Succeeded(()));
        let start_c = f.journal.position("start c");
        assert!(f.journal.position("finish a") < start_c);
        assert!(f.journal.position("finish b") < start_c);
        assert_eq!(run.progress().completed(), 3);
        assert_eq!(run.progress().total(), 3);
    }

    #[tokio::test]
    async fn a_failed_dependency_stops_the_run() {
        let f = Fixture::new();
        let run = f.run(
            "diamond",
            vec![
                f.leaf("a", &[], Outcome::Succeed).into(),
                f.leaf("b", &[], Outcome::Fail).into(),
                f.leaf("c", &["a", "b"], Outcome::Succeed).into(),
            ],
        );

        assert_matches!(
            run.wait().await,
            JobState::Failed(JobError::ChildFailed { rule, source, .. })
                if rule == "b" && matches!(*source, JobError::Kernel(_))
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!f.journal.contains("start c"));
    }

    #[tokio::test]
    async fn cancelling_a_child_cancels_the_run() {
        let f = Fixture::new();
        let run = f.run(
            "chain",
            vec![
                f.leaf("a", &[], Outcome::Hang).into(),
                f.leaf("b", &["a"], Outcome::Succeed).into(),
            ],
        );

        eventually(|| f.journal.contains("start a")).await;
        let children = f.registry.children_of(run.id());
        assert_eq!(children.len(), 1);
        children[0].cancel("user").unwrap();

        assert_matches!(run.wait().await, JobState::Cancelled(_));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!f.journal.contains("start b"));
    }

    #[tokio::test]
    async fn cancelling_the_run_cancels_its_children() {
        let f = Fixture::new();
        let run = f.run("hang", vec![f.leaf("a", &[], Outcome::Hang).into()]);

        eventually(|| f.journal.contains("start a")).await;
        let child = f.registry.children_of(run.id()).remove(0);
        run.cancel("user").unwrap();

        assert_matches!(run.wait().await, JobState::Cancelled(reason) if reason == "user");
        assert!(child.wait_status().await.is_cancelled());
    }

    #[tokio::test]
    async fn independent_rules_run_in_a_single_generation() {
        let f = Fixture::new();
        let delay = Duration::from_millis(30);
        let run = f.run(
            "fan-out",
            vec![
                f.leaf_taking("a", &[], Outcome::Succeed, delay).into(),
                f.leaf_taking("b", &[], Outcome::Succeed, delay).into(),
                f.leaf_taking("c", &[], Outcome::Succeed, delay).into(),
            ],
        );

        assert_matches!(run.wait().await, JobState::Succeeded(()));
        assert_eq!(
            f.generations(run.id()),
            vec![vec!["a".to_string(), "b".to_string(), "c".to_string()]]
        );
        assert_eq!(f.journal.max_active.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn not_found_leaves_are_named_by_their_parent() {
        let f = Fixture::new();
        let run = f.run("pipeline", vec![f.leaf("vae", &[], Outcome::NotFound).into()]);

        let err = run.wait_for_value().await.unwrap_err();
        assert_eq!(err.failed_rule(), Some("vae"));
        assert_matches!(
            err,
            JobError::ChildFailed { source, .. }
                if matches!(*source, JobError::NotFound { ref key } if key == "vae")
        );

        eventually(|| !f.registry.failed().is_empty()).await;
        let failed = f.registry.failed();
        assert!(failed.iter().any(|job| job.label() == "vae"));
    }

    #[tokio::test]
    async fn composites_run_their_nested_graphs() {
        let f = Fixture::new();
        let inner = BuildGraph::new(vec![
            f.leaf("x", &[], Outcome::Succeed),
            f.leaf("y", &["x"], Outcome::Succeed),
        ])
        .unwrap();
        let run = f.run(
            "outer",
            vec![
                CompositeRule::new("inner", inner).into(),
                f.leaf("z", &["inner"], Outcome::Succeed).into(),
            ],
        );

        assert_matches!(run.wait().await, JobState::Succeeded(()));
        assert!(f.journal.position("finish x") < f.journal.position("start y"));
        assert!(f.journal.position("finish y") < f.journal.position("start z"));
    }

    #[tokio::test]
    async fn nested_failures_point_at_the_leaf() {
        let f = Fixture::new();
        let inner = BuildGraph::new(vec![f.leaf("unet", &[], Outcome::Fail)]).unwrap();
        let run = f.run("outer", vec![CompositeRule::new("inner", inner).into()]);

        let err = run.wait_for_value().await.unwrap_err();
        assert_matches!(&err, JobError::ChildFailed { rule, .. } if rule == "inner");
        assert_eq!(err.failed_rule(), Some("unet"));
    }

    #[tokio::test]
    async fn exclusive_leaves_never_overlap() {
        let f = Fixture::new();
        let delay = Duration::from_millis(10);
        let run = f.run(
            "exclusive",
            vec![
                f.leaf_taking("a", &[], Outcome::Succeed, delay).exclusive(true).into(),
                f.leaf_taking("b", &[], Outcome::Succeed, delay).exclusive(true).into(),
                f.leaf_taking("c", &[], Outcome::Succeed, delay).exclusive(true).into(),
            ],
        );

        assert_matches!(run.wait().await, JobState::Succeeded(()));
        assert_eq!(f.journal.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn leaves_can_be_scheduled_on_their_own() {
        let f = Fixture::new();
        let job = f
            .scheduler
            .schedule(&f.leaf("solo", &[], Outcome::Succeed).into(), None);
        assert_matches!(job.wait().await, JobState::Succeeded(()));
        assert!(f.journal.contains("finish solo"));
    }
}
