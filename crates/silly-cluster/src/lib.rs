mod codec;
mod error;
mod incomplete;
mod packet;

pub use codec::Cluster;
pub use error::ClusterError;
pub use packet::Packet;
