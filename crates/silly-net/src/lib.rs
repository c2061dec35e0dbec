pub mod error;
pub mod multicast;
pub mod peer_addr;
pub mod poll;
pub mod socket;
pub mod stream;
pub mod table;
pub mod udp;

pub use error::NetError;
pub use peer_addr::PeerAddr;
pub use poll::{Demultiplexer, MioDemultiplexer, Readiness};
pub use socket::SocketThread;
pub use table::{Protocol, SocketState, SocketTable};
