use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("socket table exhausted")]
    TableFull,
    #[error("unknown or stale sid")]
    UnknownSid,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
