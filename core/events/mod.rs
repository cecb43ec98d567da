//! # Orchestration events
//!
//! Every job registration, state change and progress report, along with queue admissions,
//! cache decisions and scheduler generations, is published here as a self-contained `Event`.
//! This is the stream a presentation layer consumes to display in-flight work.
//!
mod channel;
mod consumer;
pub mod event;

pub use channel::*;
pub use consumer::*;
