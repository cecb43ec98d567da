//! # Dependency graph scheduling
//!
//! A build is described as a tree of `Rule`s: leaves are directly executable, composites own a
//! nested `BuildGraph`. The `GraphScheduler` drives a graph generation by generation, starting
//! every rule as soon as its dependencies have finished.
//!
mod build_graph;
mod error;
mod rule;
mod scheduler;

pub use build_graph::*;
pub use error::*;
pub use rule::*;
pub use scheduler::*;
