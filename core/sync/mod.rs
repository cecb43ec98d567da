//! Re-exports of the synchronization primitives used by jobs, the registry, and the resource
//! cache. Under `--cfg shuttle` test builds these come from `shuttle` instead, so the
//! interleavings of those types can be explored.
//!

#[cfg(all(shuttle, test))]
pub(crate) use shuttle::{sync::*, thread};

#[cfg(not(all(shuttle, test)))]
pub(crate) use std::sync::*;
