use silly_queue::Sid;

/// A fully reassembled cluster frame, decoded into its request/response
/// halves. `cmd`/`traceid` are `None` for a response (ack) frame, matching
/// the wire format's ack-bit-tagged session field carrying no command or
/// trace id of its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub fd: Sid,
    pub session: u32,
    pub is_ack: bool,
    pub cmd: Option<u32>,
    pub traceid: Option<u64>,
    pub payload: Box<[u8]>,
}
