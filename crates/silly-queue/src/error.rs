use thiserror::Error;

pub use crate::command::CommandError;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("queue io error: {0}")]
    Io(#[from] std::io::Error),
}
