use super::JobError;
use crate::model::{JobId, Progress};
use crate::sync::Arc;
use std::future::Future;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// A handle to a job's progress channel.
///
/// Reporting is synchronous, so a reporter can be moved into a blocking thread (for example, the
/// progress callback of a kernel call).
///
pub struct ProgressReporter<P> {
    progress: Arc<watch::Sender<Progress<P>>>,
}

impl<P> Clone for ProgressReporter<P> {
    fn clone(&self) -> Self {
        Self {
            progress: self.progress.clone(),
        }
    }
}

impl<P> ProgressReporter<P> {
    pub(crate) fn new(progress: Arc<watch::Sender<Progress<P>>>) -> Self {
        Self { progress }
    }

    pub fn report(&self, completed: u64, payload: Option<P>) {
        self.progress
            .send_if_modified(|progress| progress.advance(completed, payload));
    }

    /// Returns false if some units were already reported, in which case the total is kept.
    pub fn set_total(&self, total: u64) -> bool {
        self.progress
            .send_if_modified(|progress| progress.set_total(total))
    }

    pub fn total(&self) -> u64 {
        self.progress.borrow().total()
    }
}

/// The execution context handed to a job's body.
///
/// It carries the job's cancellation signal, which the body is expected to observe, and the
/// channel through which it reports progress.
///
pub struct JobContext<P> {
    id: JobId,
    token: CancellationToken,
    reporter: ProgressReporter<P>,
}

impl<P> JobContext<P> {
    pub(crate) fn new(id: JobId, token: CancellationToken, reporter: ProgressReporter<P>) -> Self {
        Self {
            id,
            token,
            reporter,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// A clone of the underlying cancellation signal, for code that needs to poll it from
    /// somewhere else (a blocking thread, for instance).
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn check_cancelled(&self) -> Result<(), JobError> {
        if self.token.is_cancelled() {
            return Err(JobError::cancelled("cancellation requested"));
        }
        Ok(())
    }

    /// Drive `fut` until it completes or the job is cancelled, whichever happens first.
    pub async fn until_cancelled<F>(&self, fut: F) -> Result<F::Output, JobError>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(JobError::cancelled("cancellation requested")),
            out = fut => Ok(out),
        }
    }

    pub fn report_progress(&self, completed: u64, payload: Option<P>) {
        self.reporter.report(completed, payload)
    }

    pub fn set_total(&self, total: u64) -> bool {
        self.reporter.set_total(total)
    }

    pub fn reporter(&self) -> ProgressReporter<P> {
        self.reporter.clone()
    }
}
