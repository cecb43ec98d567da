use crate::job::JobError;

/// The lifecycle of a job.
///
/// `Pending` and `Running` are the only non-terminal states. Once a job reaches any of the
/// other three it never transitions again.
///
#[derive(Default, Debug, Clone)]
pub enum JobState<T> {
    #[default]
    Pending,
    Running,
    Succeeded(T),
    Failed(JobError),
    Cancelled(String),
}

impl<T> JobState<T> {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Pending | JobState::Running)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, JobState::Pending)
    }

    pub fn status(&self) -> JobStatus {
        match self {
            JobState::Pending => JobStatus::Pending,
            JobState::Running => JobStatus::Running,
            JobState::Succeeded(_) => JobStatus::Succeeded,
            JobState::Failed(err) => JobStatus::Failed(err.clone()),
            JobState::Cancelled(reason) => JobStatus::Cancelled(reason.clone()),
        }
    }
}

/// A value-less summary of a `JobState`, used wherever jobs of different result types are
/// observed together.
///
#[derive(Debug, Clone)]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed(JobError),
    Cancelled(String),
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending | JobStatus::Running)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, JobStatus::Failed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, JobStatus::Cancelled(_))
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, JobStatus::Succeeded)
    }

    pub fn name(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed(_) => "failed",
            JobStatus::Cancelled(_) => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
