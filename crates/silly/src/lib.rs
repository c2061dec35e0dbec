mod config;
mod daemon;
mod error;
mod runtime;
mod worker;

pub use config::{ClusterConfig, Config};
pub use error::SillyError;
pub use runtime::Runtime;
pub use silly_cluster::{self as cluster, Cluster};
pub use silly_hpack::{self as hpack, Hpack};
pub use silly_net::{self as net};
pub use silly_queue::{self as queue, Command, Message, MessageKind, Sid};
pub use silly_signal as signal;
pub use silly_timer as timer;
pub use silly_timing as timing;
pub use silly_utils::{self as utils, ThreadPriority};
pub use worker::{Callback, Worker};
