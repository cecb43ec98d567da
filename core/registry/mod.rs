mod job_registry;

pub use job_registry::*;
