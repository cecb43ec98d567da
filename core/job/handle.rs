use super::{Job, JobError};
use crate::model::{JobId, JobKind, JobStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};

/// The capabilities shared by every job regardless of its result type.
///
/// This is what the `JobRegistry` stores, and what observers (a UI, a reporter, the scheduler
/// polling its children) use to look at jobs of different kinds side by side.
///
#[async_trait]
pub trait JobHandle: Send + Sync + std::fmt::Debug {
    fn id(&self) -> JobId;

    fn label(&self) -> &str;

    fn kind(&self) -> JobKind;

    fn parent(&self) -> Option<JobId>;

    fn created_at(&self) -> DateTime<Utc>;

    fn status(&self) -> JobStatus;

    /// Completed and total units of work.
    fn progress_units(&self) -> (u64, u64);

    fn cancel(&self, reason: &str) -> Result<(), JobError>;

    fn resume(&self);

    async fn wait_status(&self) -> JobStatus;

    /// A stream that yields the current status, and then every status change.
    fn status_changes(&self) -> BoxStream<'static, JobStatus>;

    /// A stream that yields the current progress units, and then every change to them.
    fn progress_changes(&self) -> BoxStream<'static, (u64, u64)>;
}

#[async_trait]
impl<T, P> JobHandle for Job<T, P>
where
    T: Clone + Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
{
    fn id(&self) -> JobId {
        Job::id(self)
    }

    fn label(&self) -> &str {
        Job::label(self)
    }

    fn kind(&self) -> JobKind {
        Job::kind(self)
    }

    fn parent(&self) -> Option<JobId> {
        Job::parent(self)
    }

    fn created_at(&self) -> DateTime<Utc> {
        Job::created_at(self)
    }

    fn status(&self) -> JobStatus {
        Job::status(self)
    }

    fn progress_units(&self) -> (u64, u64) {
        let progress = Job::progress(self);
        (progress.completed(), progress.total())
    }

    fn cancel(&self, reason: &str) -> Result<(), JobError> {
        Job::cancel(self, reason)
    }

    fn resume(&self) {
        Job::resume(self);
    }

    async fn wait_status(&self) -> JobStatus {
        self.wait().await.status()
    }

    fn status_changes(&self) -> BoxStream<'static, JobStatus> {
        let rx = self.subscribe();
        stream::unfold((rx, true), |(mut rx, first)| async move {
            if !first {
                rx.changed().await.ok()?;
            }
            let status = rx.borrow_and_update().status();
            Some((status, (rx, false)))
        })
        .boxed()
    }

    fn progress_changes(&self) -> BoxStream<'static, (u64, u64)> {
        let rx = self.subscribe_progress();
        stream::unfold((rx, true), |(mut rx, first)| async move {
            if !first {
                rx.changed().await.ok()?;
            }
            let units = {
                let progress = rx.borrow_and_update();
                (progress.completed(), progress.total())
            };
            Some((units, (rx, false)))
        })
        .boxed()
    }
}
