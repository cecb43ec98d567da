//! # Serial execution over the shared accelerator
//!
mod error;
mod serial_queue;

pub use error::*;
pub use serial_queue::*;
