use super::QueueError;
use crate::events::event::QueueEvent;
use crate::events::EventChannel;
use crate::job::{Job, JobHandle};
use crate::model::JobStatus;
use crate::sync::Arc;
use crate::Config;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, *};

/// A FIFO queue that runs at most one job at a time against the shared compute resource.
///
/// The queue is an actor: a single task owns the receiving end and admits jobs one by one,
/// resuming each and waiting for it to reach a terminal state before admitting the next. It does
/// not know what the jobs do, only when they are allowed to start.
///
/// Jobs that are no longer `Pending` by the time they reach the front of the queue (because they
/// were cancelled while waiting) are skipped right away.
///
/// Must be created from within a tokio runtime.
///
#[derive(Clone, Debug)]
pub struct SerialQueue {
    sender: mpsc::UnboundedSender<Arc<dyn JobHandle>>,
    waiting: Arc<AtomicUsize>,
    event_channel: Arc<EventChannel>,
    shutdown: CancellationToken,
}

impl SerialQueue {
    #[instrument(name = "SerialQueue::new", skip(config))]
    pub fn new(config: &Config) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let queue = Self {
            sender,
            waiting: Arc::new(AtomicUsize::new(0)),
            event_channel: config.event_channel(),
            shutdown: CancellationToken::new(),
        };
        let admitter = Admitter {
            waiting: queue.waiting.clone(),
            event_channel: queue.event_channel.clone(),
            shutdown: queue.shutdown.clone(),
        };
        tokio::spawn(admitter.run(receiver));
        queue
    }

    /// Admit `job` for exclusive execution once every job enqueued before it has finished.
    ///
    #[instrument(name = "SerialQueue::enqueue", skip(self, job), fields(job = %job.id()))]
    pub fn enqueue(&self, job: Arc<dyn JobHandle>) -> Result<(), QueueError> {
        let id = job.id();
        let label = job.label().to_string();
        self.waiting.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(job).is_err() {
            self.waiting.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueError::Closed { job: id });
        }
        self.event_channel
            .send(QueueEvent::JobEnqueued { id, label });
        Ok(())
    }

    pub fn enqueue_job<T, P>(&self, job: &Job<T, P>) -> Result<(), QueueError>
    where
        T: Clone + Send + Sync + 'static,
        P: Clone + Send + Sync + 'static,
    {
        self.enqueue(Arc::new(job.clone()))
    }

    /// How many jobs are waiting to be admitted.
    pub fn len(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop admitting jobs. The job currently running is left to finish, and every job still
    /// waiting is cancelled.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// The receiving side of a `SerialQueue`. It holds no sender, so it stops once every queue handle
/// is dropped.
struct Admitter {
    waiting: Arc<AtomicUsize>,
    event_channel: Arc<EventChannel>,
    shutdown: CancellationToken,
}

impl Admitter {
    async fn run(self, mut receiver: mpsc::UnboundedReceiver<Arc<dyn JobHandle>>) {
        loop {
            let job = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                job = receiver.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            self.waiting.fetch_sub(1, Ordering::SeqCst);

            let id = job.id();
            let label = job.label().to_string();
            if !matches!(job.status(), JobStatus::Pending) {
                debug!("Skipping {} ({}): {}", label, id, job.status());
                self.event_channel.send(QueueEvent::JobSkipped { id, label });
                continue;
            }

            debug!("Admitting {} ({})", label, id);
            self.event_channel.send(QueueEvent::JobAdmitted {
                id,
                label: label.clone(),
            });
            job.resume();
            let status = job.wait_status().await;
            debug!("Released {} ({}) as {}", label, id, status);
        }

        receiver.close();
        while let Ok(job) = receiver.try_recv() {
            self.waiting.fetch_sub(1, Ordering::SeqCst);
            let _ = job.cancel("serial queue shut down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobError;
    use crate::model::{JobKind, JobState};
    use crate::testing::eventually;
    use crate::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::oneshot;

    type Log = Arc<Mutex<Vec<String>>>;

    fn logged_job(name: &'static str, log: Log, hold: Duration) -> Job<()> {
        Job::new(name, JobKind::Sample, move |_ctx| async move {
            log.lock().unwrap().push(format!("{name}:start"));
            tokio::time::sleep(hold).await;
            log.lock().unwrap().push(format!("{name}:end"));
            Ok(())
        })
    }

    fn gated_job(name: &'static str, gate: oneshot::Receiver<()>) -> Job<()> {
        Job::new(name, JobKind::Sample, move |_ctx| async move {
            gate.await
                .map_err(|_| JobError::cancelled("gate dropped"))?;
            Ok(())
        })
    }

    #[tokio::test]
    async fn later_jobs_never_start_before_earlier_ones_finish() {
        let queue = SerialQueue::new(&Config::default());
        let log: Log = Arc::new(Mutex::new(vec![]));
        let a = logged_job("a", log.clone(), Duration::from_millis(20));
        let b = logged_job("b", log.clone(), Duration::from_millis(1));

        queue.enqueue_job(&a).unwrap();
        queue.enqueue_job(&b).unwrap();
        b.wait().await;

        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:start", "a:end", "b:start", "b:end"]
        );
    }

    #[tokio::test]
    async fn at_most_one_job_runs_at_a_time() {
        let queue = SerialQueue::new(&Config::default());
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let jobs: Vec<Job<()>> = (0..10)
            .map(|i| {
                let running = running.clone();
                let max_seen = max_seen.clone();
                Job::new(format!("job-{i}"), JobKind::Sample, move |_ctx| async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();

        for job in &jobs {
            queue.enqueue_job(job).unwrap();
        }
        for job in &jobs {
            assert_matches!(job.wait().await, JobState::Succeeded(()));
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_waiting_jobs_are_skipped_without_delay() {
        let queue = SerialQueue::new(&Config::default());
        let (release_a, gate_a) = oneshot::channel();
        let a = gated_job("a", gate_a);
        let b: Job<()> = Job::new("b", JobKind::Sample, |_ctx| async { Ok(()) });
        let c: Job<()> = Job::new("c", JobKind::Sample, |_ctx| async { Ok(()) });

        queue.enqueue_job(&a).unwrap();
        queue.enqueue_job(&b).unwrap();
        queue.enqueue_job(&c).unwrap();

        b.cancel("no longer needed").unwrap();
        assert_matches!(c.status(), JobStatus::Pending);
        release_a.send(()).unwrap();

        assert_matches!(c.wait().await, JobState::Succeeded(()));
        assert_matches!(b.state(), JobState::Cancelled(_));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn shutting_down_cancels_waiting_jobs() {
        let queue = SerialQueue::new(&Config::default());
        let (release_a, gate_a) = oneshot::channel();
        let a = gated_job("a", gate_a);
        let b: Job<()> = Job::new("b", JobKind::Sample, |_ctx| async { Ok(()) });

        queue.enqueue_job(&a).unwrap();
        queue.enqueue_job(&b).unwrap();
        eventually(|| matches!(a.status(), JobStatus::Running)).await;

        queue.shutdown();
        release_a.send(()).unwrap();

        assert_matches!(a.wait().await, JobState::Succeeded(()));
        assert_matches!(b.wait().await, JobState::Cancelled(r) if r == "serial queue shut down");

        let late: Job<()> = Job::new("late", JobKind::Sample, |_ctx| async { Ok(()) });
        eventually(|| queue.enqueue_job(&late).is_err()).await;
    }

    #[tokio::test]
    async fn the_actor_stops_once_every_handle_is_dropped() {
        let queue = SerialQueue::new(&Config::default());
        let job: Job<()> = Job::new("only", JobKind::Sample, |_ctx| async { Ok(()) });
        queue.enqueue_job(&job).unwrap();
        assert_matches!(job.wait().await, JobState::Succeeded(()));

        let waiting = Arc::downgrade(&queue.waiting);
        drop(queue);
        eventually(|| waiting.upgrade().is_none()).await;
    }
}
