use super::{JobContext, JobError, ProgressReporter};
use crate::model::{JobId, JobKind, JobState, JobStatus, Progress};
use crate::sync::{Arc, Mutex, MutexGuard};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::PoisonError;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, *};

type Body<T, P> = Box<dyn FnOnce(JobContext<P>) -> BoxFuture<'static, Result<T, JobError>> + Send>;

type FailureHandler = Box<dyn FnOnce(&JobError) + Send>;

/// A unit of asynchronous, cancellable, observable work with a single terminal outcome.
///
/// A `Job` is a cheap handle: clones refer to the same underlying job. It is created `Pending`
/// around a body, starts running on `resume`, and reaches exactly one of `Succeeded`, `Failed`,
/// or `Cancelled`. Every transition is published on a `watch` channel, so any number of tasks
/// can `wait` on it or observe it.
///
/// `T` is the result of the job, and `P` is the payload that comes along with progress reports.
///
pub struct Job<T, P = ()> {
    inner: Arc<Inner<T, P>>,
}

struct Inner<T, P> {
    id: JobId,
    label: String,
    kind: JobKind,
    parent: Option<JobId>,
    created_at: DateTime<Utc>,
    state: watch::Sender<JobState<T>>,
    progress: Arc<watch::Sender<Progress<P>>>,
    token: CancellationToken,

    // NOTE: every state transition happens while holding this lock, which is what makes the
    // first terminal state the only one.
    lifecycle: Mutex<Lifecycle<T, P>>,
}

struct Lifecycle<T, P> {
    body: Option<Body<T, P>>,
    on_failure: Vec<FailureHandler>,
    cancel_reason: Option<String>,
}

impl<T, P> Clone for Job<T, P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, P> std::fmt::Debug for Job<T, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("kind", &self.inner.kind)
            .field("status", &self.inner.state.borrow().status())
            .finish()
    }
}

impl<T, P> Job<T, P>
where
    T: Clone + Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
{
    pub fn new<L, F, Fut>(label: L, kind: JobKind, body: F) -> Self
    where
        L: Into<String>,
        F: FnOnce(JobContext<P>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, JobError>> + Send + 'static,
    {
        Self::create(None, label.into(), kind, body)
    }

    /// Create a job that belongs to `parent`. The parent can later enumerate it through the
    /// `JobRegistry`.
    pub fn child<L, F, Fut>(parent: JobId, label: L, kind: JobKind, body: F) -> Self
    where
        L: Into<String>,
        F: FnOnce(JobContext<P>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, JobError>> + Send + 'static,
    {
        Self::create(Some(parent), label.into(), kind, body)
    }

    fn create<F, Fut>(parent: Option<JobId>, label: String, kind: JobKind, body: F) -> Self
    where
        F: FnOnce(JobContext<P>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, JobError>> + Send + 'static,
    {
        let body: Body<T, P> = Box::new(move |ctx| body(ctx).boxed());
        let (state, _) = watch::channel(JobState::Pending);
        let (progress, _) = watch::channel(Progress::default());
        Self {
            inner: Arc::new(Inner {
                id: JobId::next(),
                label,
                kind,
                parent,
                created_at: Utc::now(),
                state,
                progress: Arc::new(progress),
                token: CancellationToken::new(),
                lifecycle: Mutex::new(Lifecycle {
                    body: Some(body),
                    on_failure: vec![],
                    cancel_reason: None,
                }),
            }),
        }
    }

    pub fn id(&self) -> JobId {
        self.inner.id
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn kind(&self) -> JobKind {
        self.inner.kind
    }

    pub fn parent(&self) -> Option<JobId> {
        self.inner.parent
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    pub fn state(&self) -> JobState<T> {
        self.inner.state.borrow().clone()
    }

    pub fn status(&self) -> JobStatus {
        self.inner.state.borrow().status()
    }

    pub fn is_terminal(&self) -> bool {
        self.inner.state.borrow().is_terminal()
    }

    /// Whether cancellation has been requested, regardless of the current state.
    pub fn is_cancel_requested(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    pub fn progress(&self) -> Progress<P> {
        self.inner.progress.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<JobState<T>> {
        self.inner.state.subscribe()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<Progress<P>> {
        self.inner.progress.subscribe()
    }

    pub fn set_total(&self, total: u64) -> bool {
        self.reporter().set_total(total)
    }

    pub fn report_progress(&self, completed: u64, payload: Option<P>) {
        self.reporter().report(completed, payload)
    }

    pub(crate) fn reporter(&self) -> ProgressReporter<P> {
        ProgressReporter::new(self.inner.progress.clone())
    }

    /// Start executing the body of this job.
    ///
    /// Only the first call on a `Pending` job does anything; resuming a job that is running or
    /// already finished returns the same job.
    ///
    #[instrument(name = "Job::resume", skip(self), fields(job = %self.inner.id, label = %self.inner.label))]
    pub fn resume(&self) -> Self {
        let body = {
            let mut lifecycle = self.lifecycle();
            let is_pending = self.inner.state.borrow().is_pending();
            if !is_pending {
                return self.clone();
            }
            let Some(body) = lifecycle.body.take() else {
                return self.clone();
            };
            self.inner.state.send_replace(JobState::Running);
            body
        };

        let ctx = JobContext::new(self.inner.id, self.inner.token.clone(), self.reporter());
        let job = self.clone();
        let span = info_span!("job", id = %self.inner.id, kind = %self.inner.kind);
        tokio::spawn(
            async move {
                let result = AssertUnwindSafe(body(ctx)).catch_unwind().await;
                job.complete(result);
            }
            .instrument(span),
        );

        self.clone()
    }

    /// Request cooperative cancellation.
    ///
    /// A job that never started is cancelled right away. A running job has its cancellation
    /// signal raised, and it is up to its body to observe it.
    ///
    #[instrument(name = "Job::cancel", skip(self, reason), fields(job = %self.inner.id))]
    pub fn cancel<R: Into<String>>(&self, reason: R) -> Result<(), JobError> {
        let reason = reason.into();
        let mut lifecycle = self.lifecycle();
        let status = self.inner.state.borrow().status();
        match status {
            JobStatus::Pending => {
                debug!("Cancelling job before it started: {}", reason);
                lifecycle.body = None;
                lifecycle.on_failure.clear();
                lifecycle.cancel_reason = Some(reason.clone());
                self.inner.token.cancel();
                self.inner.state.send_replace(JobState::Cancelled(reason));
                Ok(())
            }
            JobStatus::Running => {
                debug!("Requesting cancellation: {}", reason);
                lifecycle.cancel_reason.get_or_insert(reason);
                self.inner.token.cancel();
                Ok(())
            }
            status => Err(JobError::InvalidState {
                job: self.inner.id,
                status: status.name(),
                action: "cancel",
            }),
        }
    }

    /// Register a handler to run if, and only if, this job fails. Handlers run before the
    /// `Failed` state is published. If the job has already failed the handler runs right away.
    ///
    /// Handlers must not call back into this same job.
    ///
    pub fn on_failure<F>(&self, handler: F)
    where
        F: FnOnce(&JobError) + Send + 'static,
    {
        let mut lifecycle = self.lifecycle();
        let state = self.inner.state.borrow().status();
        match state {
            JobStatus::Failed(err) => handler(&err),
            JobStatus::Pending | JobStatus::Running => lifecycle.on_failure.push(Box::new(handler)),
            _ => (),
        }
    }

    /// Suspend until the job reaches a terminal state.
    pub async fn wait(&self) -> JobState<T> {
        let mut rx = self.inner.state.subscribe();
        let result = rx.wait_for(|state| state.is_terminal()).await;
        match result {
            Ok(state) => state.clone(),
            // NOTE: the sender lives as long as `self`, so this is not expected to happen.
            Err(_) => self.state(),
        }
    }

    /// Like `wait`, but unwraps the outcome.
    pub async fn wait_for_value(&self) -> Result<T, JobError> {
        match self.wait().await {
            JobState::Succeeded(value) => Ok(value),
            JobState::Failed(err) => Err(err),
            JobState::Cancelled(reason) => Err(JobError::Cancelled { reason }),
            state => Err(JobError::InvalidState {
                job: self.inner.id,
                status: state.status().name(),
                action: "wait for",
            }),
        }
    }

    fn complete(&self, result: std::thread::Result<Result<T, JobError>>) {
        let next = match result {
            Ok(Ok(value)) => JobState::Succeeded(value),
            Ok(Err(err)) if self.inner.token.is_cancelled() => {
                debug!("Job exited with {} after cancellation was requested", err);
                JobState::Cancelled(self.cancel_reason())
            }
            Ok(Err(JobError::Cancelled { reason })) => JobState::Cancelled(reason),
            Ok(Err(err)) => JobState::Failed(err),
            Err(panic) => JobState::Failed(JobError::Panicked {
                message: panic_message(panic),
            }),
        };
        self.transition(next);
    }

    fn transition(&self, next: JobState<T>) -> bool {
        let mut lifecycle = self.lifecycle();
        let is_terminal = self.inner.state.borrow().is_terminal();
        if is_terminal {
            return false;
        }

        let handlers = std::mem::take(&mut lifecycle.on_failure);
        match &next {
            JobState::Failed(err) => {
                warn!("{} ({}) failed: {}", self.inner.label, self.inner.id, err);
                for handler in handlers {
                    handler(err);
                }
            }
            JobState::Cancelled(reason) => {
                debug!("{} ({}) cancelled: {}", self.inner.label, self.inner.id, reason)
            }
            _ => debug!("{} ({}) succeeded", self.inner.label, self.inner.id),
        }

        lifecycle.body = None;
        self.inner.state.send_replace(next);
        true
    }

    fn cancel_reason(&self) -> String {
        self.lifecycle()
            .cancel_reason
            .clone()
            .unwrap_or_else(|| "cancellation requested".to_string())
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle<T, P>> {
        self.inner
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
