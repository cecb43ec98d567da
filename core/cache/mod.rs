//! # Deduplicating cache of expensive resources
//!
mod resource_cache;

pub use resource_cache::*;
