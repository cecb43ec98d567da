//! # Observable, cancellable jobs
//!
//! A [Job] wraps an async body with a uniform lifecycle (`Pending → Running → terminal`),
//! progress reporting and cooperative cancellation. [JobHandle] erases the result type so jobs
//! of different kinds can be stored and observed together.
//!
mod context;
mod error;
mod handle;
#[allow(clippy::module_inception)]
mod job;

pub use context::*;
pub use error::*;
pub use handle::*;
pub use job::*;
