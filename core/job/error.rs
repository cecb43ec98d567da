use crate::graph::GraphError;
use crate::model::JobId;
use crate::queue::QueueError;
use crate::sync::Arc;
use thiserror::*;

/// Every way a job can end without a value.
///
/// Errors are shared between all the waiters of a job, so this type is cheap to clone: opaque
/// errors coming from the computational kernel are kept behind an [Arc].
///
#[derive(Error, Debug, Clone)]
pub enum JobError {
    #[error("Could not find a resource for {key}")]
    NotFound { key: String },

    #[error("Cannot {action} {job} while it is {status}")]
    InvalidState {
        job: JobId,
        status: &'static str,
        action: &'static str,
    },

    #[error("Child {rule} ({job}) failed: {source}")]
    ChildFailed {
        rule: String,
        job: JobId,
        source: Box<JobError>,
    },

    #[error("Job was cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("Job panicked: {message}")]
    Panicked { message: String },

    #[error(transparent)]
    GraphError(GraphError),

    #[error(transparent)]
    QueueError(QueueError),

    #[error("{0:#}")]
    Kernel(Arc<anyhow::Error>),
}

impl JobError {
    pub fn kernel(err: anyhow::Error) -> Self {
        Self::Kernel(Arc::new(err))
    }

    pub(crate) fn cancelled<R: Into<String>>(reason: R) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, JobError::Cancelled { .. })
    }

    /// The rule named by a `ChildFailed` error. Nested failures are followed down to the rule
    /// that actually failed.
    pub fn failed_rule(&self) -> Option<&str> {
        match self {
            JobError::ChildFailed { rule, source, .. } => {
                Some(source.failed_rule().unwrap_or(rule.as_str()))
            }
            _ => None,
        }
    }
}

impl From<GraphError> for JobError {
    fn from(err: GraphError) -> Self {
        Self::GraphError(err)
    }
}

impl From<QueueError> for JobError {
    fn from(err: QueueError) -> Self {
        Self::QueueError(err)
    }
}

impl From<anyhow::Error> for JobError {
    fn from(err: anyhow::Error) -> Self {
        Self::kernel(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_rule_points_at_the_innermost_child() {
        let leaf = JobError::ChildFailed {
            rule: "vae".into(),
            job: JobId::next(),
            source: Box::new(JobError::NotFound { key: "vae".into() }),
        };
        let composite = JobError::ChildFailed {
            rule: "decoder".into(),
            job: JobId::next(),
            source: Box::new(leaf),
        };
        assert_eq!(composite.failed_rule(), Some("vae"));
        assert_eq!(JobError::cancelled("user").failed_rule(), None);
    }

    #[test]
    fn kernel_errors_keep_their_context() {
        let err = JobError::kernel(anyhow::anyhow!("out of memory").context("loading unet"));
        assert_eq!(err.to_string(), "loading unet: out of memory");
    }
}
