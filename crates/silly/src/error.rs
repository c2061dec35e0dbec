use thiserror::Error;

#[derive(Error, Debug)]
pub enum SillyError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("socket subsystem error: {0}")]
    Net(#[from] silly_net::NetError),
    #[error("signal subsystem error: {0}")]
    Signal(#[from] silly_signal::SignalError),
    #[error("message queue error: {0}")]
    Queue(#[from] silly_queue::QueueError),
}
