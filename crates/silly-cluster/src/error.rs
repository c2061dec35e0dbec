use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterError {
    #[error("packet size too small")]
    PacketTooSmall,
    #[error("packet size exceeds hard limit")]
    HardLimit,
}
