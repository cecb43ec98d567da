//! # Kiln
//!
//! Kiln orchestrates long-running, cancellable, observable jobs over a single shared compute
//! resource. The flow begins by creating a `Config` and using it to build an `Orchestrator`.
//! From there, the `Orchestrator` can run generation requests against a `Kernel`, or build a
//! graph of `Rule`s, and every job it starts can be followed through its `JobRegistry` and the
//! `EventChannel`.
//!

pub mod cache;
pub(crate) mod config;
pub mod events;
pub mod graph;
pub mod job;
pub mod kernel;
pub mod model;
pub(crate) mod orchestrator;
pub mod queue;
pub mod registry;
pub(crate) mod sync;
#[cfg(test)]
pub(crate) mod testing;

pub use cache::ResourceCache;
pub use config::*;
pub use graph::{BuildGraph, CompositeRule, GraphError, GraphScheduler, LeafRule, Rule, Taskable};
pub use job::{Job, JobContext, JobError, JobHandle, ProgressReporter};
pub use kernel::{
    DirLocator, GenerationParams, GenerationRequest, Kernel, Locator, Pipeline, StepProgress,
};
pub use model::{ExecutionMode, JobId, JobKind, JobState, JobStatus, Progress};
pub use orchestrator::*;
pub use queue::{QueueError, SerialQueue};
pub use registry::JobRegistry;

#[macro_use]
extern crate derive_builder;

#[cfg(test)]
#[macro_use]
extern crate assert_matches;

#[cfg(test)]
extern crate quickcheck;
#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;
