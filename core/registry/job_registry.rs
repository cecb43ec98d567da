use crate::events::event::JobEvent;
use crate::events::EventChannel;
use crate::job::{Job, JobHandle};
use crate::model::{JobId, JobKind, JobStatus};
use crate::sync::{Arc, Mutex};
use crate::Config;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use std::sync::PoisonError;
use tracing::{instrument, *};

/// The Job Registry keeps track of every job in flight, so that they can be enumerated,
/// grouped by kind, and displayed.
///
/// The registry is the sole owner of the jobs it tracks: anyone else (a parent job looking for
/// its children, a UI) refers to them by `JobId`. Mutations are serialized; reads may happen
/// concurrently.
///
#[derive(Clone, Debug)]
pub struct JobRegistry {
    jobs: Arc<DashMap<JobId, Arc<dyn JobHandle>>>,

    event_channel: Arc<EventChannel>,

    retain_failed_jobs: bool,

    // NOTE: only used to serialize mutations, so that a removal can never interleave with the
    // insertion of the same job.
    _write_lock: Arc<Mutex<()>>,
}

enum Change {
    Status(JobStatus),
    Progress(u64, u64),
}

impl JobRegistry {
    pub fn new(config: &Config) -> Self {
        Self {
            jobs: Arc::new(DashMap::new()),
            event_channel: config.event_channel(),
            retain_failed_jobs: config.retain_failed_jobs(),
            _write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Insert a job without observing it. Returns false if the job was already registered.
    ///
    #[instrument(name = "JobRegistry::insert", skip(self, job), fields(job = %job.id()))]
    pub fn insert(&self, job: Arc<dyn JobHandle>) -> bool {
        let _lock = self._write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.jobs.contains_key(&job.id()) {
            return false;
        }
        self.event_channel.send(JobEvent::JobRegistered {
            id: job.id(),
            label: job.label().to_string(),
            kind: job.kind(),
            parent: job.parent(),
        });
        self.jobs.insert(job.id(), job);
        true
    }

    /// Insert a job and observe it until it finishes.
    ///
    /// Every state change and progress report is forwarded to the event channel. Once the job
    /// reaches a terminal state it is removed, unless it failed: failed jobs stay until they are
    /// cleared so that they can be inspected.
    ///
    pub fn register<T, P>(&self, job: &Job<T, P>)
    where
        T: Clone + Send + Sync + 'static,
        P: Clone + Send + Sync + 'static,
    {
        self.track(Arc::new(job.clone()))
    }

    pub fn track(&self, job: Arc<dyn JobHandle>) {
        if !self.insert(job.clone()) {
            return;
        }

        let registry = self.clone();
        tokio::spawn(async move {
            let statuses = job.status_changes().map(Change::Status);
            let progress = job
                .progress_changes()
                .map(|(completed, total)| Change::Progress(completed, total));
            let mut changes = stream::select(statuses, progress);

            while let Some(change) = changes.next().await {
                match change {
                    Change::Progress(0, _) => (),
                    Change::Progress(completed, total) => {
                        registry.event_channel.send(JobEvent::JobProgressed {
                            id: job.id(),
                            label: job.label().to_string(),
                            completed,
                            total,
                        })
                    }
                    Change::Status(status) => {
                        registry.event_channel.send(JobEvent::JobStateChanged {
                            id: job.id(),
                            label: job.label().to_string(),
                            status: status.name().to_string(),
                            error: match &status {
                                JobStatus::Failed(err) => Some(err.to_string()),
                                _ => None,
                            },
                        });
                        if status.is_terminal() {
                            registry.retire(job.id(), &status);
                            break;
                        }
                    }
                }
            }
        });
    }

    fn retire(&self, id: JobId, status: &JobStatus) {
        if status.is_failed() && self.retain_failed_jobs {
            debug!("Keeping failed job {} for inspection", id);
            return;
        }
        self.remove(id);
    }

    #[instrument(name = "JobRegistry::remove", skip(self))]
    pub fn remove(&self, id: JobId) -> Option<Arc<dyn JobHandle>> {
        let _lock = self._write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (_, job) = self.jobs.remove(&id)?;
        self.event_channel.send(JobEvent::JobRemoved { id });
        Some(job)
    }

    pub fn get(&self, id: JobId) -> Option<Arc<dyn JobHandle>> {
        self.jobs.get(&id).map(|r| r.value().clone())
    }

    pub fn contains(&self, id: JobId) -> bool {
        self.jobs.contains_key(&id)
    }

    /// All registered jobs, oldest first.
    pub fn list(&self) -> Vec<Arc<dyn JobHandle>> {
        self.collect(|_| true)
    }

    pub fn of_kind(&self, kind: JobKind) -> Vec<Arc<dyn JobHandle>> {
        self.collect(|job| job.kind() == kind)
    }

    /// The registered jobs whose parent is `parent`, oldest first.
    pub fn children_of(&self, parent: JobId) -> Vec<Arc<dyn JobHandle>> {
        self.collect(|job| job.parent() == Some(parent))
    }

    pub fn failed(&self) -> Vec<Arc<dyn JobHandle>> {
        self.collect(|job| job.status().is_failed())
    }

    /// Cancel every live child of `parent`. Returns how many were asked to stop.
    #[instrument(name = "JobRegistry::cancel_children", skip(self, reason))]
    pub fn cancel_children(&self, parent: JobId, reason: &str) -> usize {
        self.children_of(parent)
            .into_iter()
            .filter(|child| child.cancel(reason).is_ok())
            .count()
    }

    /// Drop every failed job. Returns how many were removed.
    #[instrument(name = "JobRegistry::clear_failed", skip(self))]
    pub fn clear_failed(&self) -> usize {
        self.failed()
            .into_iter()
            .filter_map(|job| self.remove(job.id()))
            .count()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn collect<F>(&self, keep: F) -> Vec<Arc<dyn JobHandle>>
    where
        F: Fn(&Arc<dyn JobHandle>) -> bool,
    {
        let mut jobs: Vec<Arc<dyn JobHandle>> = self
            .jobs
            .iter()
            .filter(|r| keep(r.value()))
            .map(|r| r.value().clone())
            .collect();
        jobs.sort_by_key(|job| (job.created_at(), job.id()));
        jobs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobError;
    use crate::testing::eventually;

    fn ok_job(label: &str) -> Job<()> {
        Job::new(label.to_string(), JobKind::Task, |_ctx| async { Ok(()) })
    }

    fn failing_job(label: &str) -> Job<()> {
        Job::new(label.to_string(), JobKind::Task, |_ctx| async {
            Err(JobError::NotFound { key: "sd".into() })
        })
    }

    #[cfg(shuttle)]
    #[test]
    fn conc_inserting_the_same_job_registers_it_once() {
        use crate::sync::*;

        shuttle::check_dfs(
            move || {
                let reg = Arc::new(JobRegistry::new(&Config::default()));
                let job: Arc<dyn JobHandle> = Arc::new(ok_job("same"));

                let mut handles = vec![];
                for _ in 0..3 {
                    let reg = reg.clone();
                    let job = job.clone();
                    let handle = thread::spawn(move || {
                        reg.insert(job);
                    });
                    handles.push(handle);
                }

                for handle in handles {
                    handle.join().unwrap()
                }

                assert!(reg.contains(job.id()));
                assert_eq!(reg.len(), 1);
            },
            None,
        );
    }

    #[test]
    fn inserting_twice_is_a_noop() {
        let reg = JobRegistry::new(&Config::default());
        let job: Arc<dyn JobHandle> = Arc::new(ok_job("twice"));
        assert!(reg.insert(job.clone()));
        assert!(!reg.insert(job));
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test]
    async fn succeeded_jobs_are_removed_once_observed() {
        let reg = JobRegistry::new(&Config::default());
        let job = ok_job("done");
        reg.register(&job);
        assert!(reg.contains(job.id()));
        job.resume().wait().await;
        eventually(|| !reg.contains(job.id())).await;
    }

    #[tokio::test]
    async fn cancelled_jobs_are_removed_once_observed() {
        let reg = JobRegistry::new(&Config::default());
        let job = ok_job("never");
        reg.register(&job);
        job.cancel("user").unwrap();
        eventually(|| reg.is_empty()).await;
    }

    #[tokio::test]
    async fn failed_jobs_stay_until_cleared() {
        let reg = JobRegistry::new(&Config::default());
        let job = failing_job("broken");
        reg.register(&job);
        job.resume().wait().await;
        eventually(|| reg.failed().len() == 1).await;
        assert!(reg.contains(job.id()));

        assert_eq!(reg.clear_failed(), 1);
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn failed_jobs_can_be_dropped_right_away() {
        let config = Config::builder().retain_failed_jobs(false).build().unwrap();
        let reg = JobRegistry::new(&config);
        let job = failing_job("broken");
        reg.register(&job);
        job.resume().wait().await;
        eventually(|| reg.is_empty()).await;
    }

    #[test]
    fn children_are_listed_in_creation_order() {
        let reg = JobRegistry::new(&Config::default());
        let parent = ok_job("parent");
        let children: Vec<Job<()>> = (0..3)
            .map(|i| {
                Job::child(parent.id(), format!("child-{i}"), JobKind::Task, |_ctx| async {
                    Ok(())
                })
            })
            .collect();

        reg.insert(Arc::new(parent.clone()));
        for child in children.iter().rev() {
            reg.insert(Arc::new(child.clone()));
        }

        let listed: Vec<JobId> = reg.children_of(parent.id()).iter().map(|j| j.id()).collect();
        let mut expected: Vec<&Job<()>> = children.iter().collect();
        expected.sort_by_key(|j| (j.created_at(), j.id()));
        let expected: Vec<JobId> = expected.iter().map(|j| j.id()).collect();
        assert_eq!(listed, expected);
        assert_eq!(reg.list().len(), 4);
    }

    #[test]
    fn jobs_can_be_filtered_by_kind() {
        let reg = JobRegistry::new(&Config::default());
        let task = ok_job("task");
        let sample: Job<u32> = Job::new("sample", JobKind::Sample, |_ctx| async { Ok(1) });
        reg.insert(Arc::new(task));
        reg.insert(Arc::new(sample.clone()));

        let samples = reg.of_kind(JobKind::Sample);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].id(), sample.id());
        assert!(reg.of_kind(JobKind::Generate).is_empty());
    }

    #[test]
    fn cancelling_children_leaves_the_parent_alone() {
        let reg = JobRegistry::new(&Config::default());
        let parent = ok_job("parent");
        let child: Job<()> =
            Job::child(parent.id(), "child", JobKind::Task, |_ctx| async { Ok(()) });
        reg.insert(Arc::new(parent.clone()));
        reg.insert(Arc::new(child.clone()));

        assert_eq!(reg.cancel_children(parent.id(), "parent cancelled"), 1);
        assert_matches!(child.status(), JobStatus::Cancelled(_));
        assert_matches!(parent.status(), JobStatus::Pending);
    }

    #[tokio::test]
    async fn state_changes_are_published() {
        let config = Config::default();
        let consumer = config.event_channel().consumer();
        let reg = JobRegistry::new(&config);
        let job = ok_job("published");
        reg.register(&job);
        job.resume().wait().await;
        eventually(|| reg.is_empty()).await;

        let events = consumer.drain();
        assert_matches!(
            events.first(),
            Some(crate::events::event::Event::JobEvent(JobEvent::JobRegistered { .. }))
        );
        assert!(events.iter().any(|e| matches!(
            e,
            crate::events::event::Event::JobEvent(JobEvent::JobStateChanged { status, .. })
                if status == "succeeded"
        )));
        assert_matches!(
            events.last(),
            Some(crate::events::event::Event::JobEvent(JobEvent::JobRemoved { .. }))
        );
    }
}
