use crate::model::JobId;
use thiserror::*;

#[derive(Error, Debug, Clone)]
pub enum QueueError {
    #[error("Cannot enqueue {job}: the serial queue has shut down")]
    Closed { job: JobId },
}
