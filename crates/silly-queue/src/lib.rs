pub mod command;
pub mod error;
pub mod message;
pub mod mpsc;
pub mod sid;
pub mod wakeup;

pub use command::{Command, CommandTag, MulticastFinalizer};
pub use error::QueueError;
pub use message::{Message, MessageKind};
pub use mpsc::Queue;
pub use sid::Sid;
pub use wakeup::WakeupPipe;
