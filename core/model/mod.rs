mod execution_mode;
mod job_id;
mod job_kind;
mod job_state;
mod progress;

pub use execution_mode::*;
pub use job_id::*;
pub use job_kind::*;
pub use job_state::*;
pub use progress::*;
