use crate::model::{ExecutionMode, JobId, JobKind};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum JobEvent {
    JobRegistered {
        id: JobId,
        label: String,
        kind: JobKind,
        parent: Option<JobId>,
    },
    JobStateChanged {
        id: JobId,
        label: String,
        status: String,
        error: Option<String>,
    },
    JobProgressed {
        id: JobId,
        label: String,
        completed: u64,
        total: u64,
    },
    JobRemoved {
        id: JobId,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum QueueEvent {
    JobEnqueued { id: JobId, label: String },
    JobAdmitted { id: JobId, label: String },
    JobSkipped { id: JobId, label: String },
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum CacheEvent {
    ResourceHit {
        key: String,
    },
    ResourceConstructionStarted {
        key: String,
        mode: ExecutionMode,
    },
    ResourceEvicted {
        key: String,
        next_mode: ExecutionMode,
    },
    ResourceDroppedForRetry {
        key: String,
        next_mode: ExecutionMode,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SchedulerEvent {
    GenerationStarted { run: JobId, rules: Vec<String> },
    RuleFinished { run: JobId, rule: String },
    RunFinished { run: JobId, status: String },
}

#[derive(Default, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Event {
    /// The "nothing happened" event.
    #[default]
    Noop,
    JobEvent(JobEvent),
    QueueEvent(QueueEvent),
    CacheEvent(CacheEvent),
    SchedulerEvent(SchedulerEvent),
}

impl From<JobEvent> for Event {
    fn from(value: JobEvent) -> Self {
        Event::JobEvent(value)
    }
}

impl From<QueueEvent> for Event {
    fn from(value: QueueEvent) -> Self {
        Event::QueueEvent(value)
    }
}

impl From<CacheEvent> for Event {
    fn from(value: CacheEvent) -> Self {
        Event::CacheEvent(value)
    }
}

impl From<SchedulerEvent> for Event {
    fn from(value: SchedulerEvent) -> Self {
        Event::SchedulerEvent(value)
    }
}
