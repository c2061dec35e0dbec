use std::collections::{HashMap, VecDeque};

use silly_queue::Sid;
use tracing::warn;

use crate::error::ClusterError;
use crate::incomplete::{FeedStep, Incomplete, ACK_BIT};
use crate::packet::Packet;

/// Once a fd's reassembly fails a size check, the codec never attempts to
/// resynchronize mid-stream -- it remembers the failure so every subsequent
/// `push` for that fd keeps returning it until the caller calls `clear`.
enum FdState {
    Active(Incomplete),
    Poisoned(ClusterError),
}

/// The cluster framing codec: packetizes length-prefixed frames off the wire
/// per-fd, and packs outgoing request/response frames. One `Cluster` is
/// shared by every connection a worker multiplexes; `fd` selects which
/// connection's partial state a `push` call advances.
pub struct Cluster {
    hardlimit: u32,
    softlimit: u32,
    session_counter: u32,
    incompletes: HashMap<Sid, FdState>,
    queue: VecDeque<Packet>,
}

fn decode_packet(fd: Sid, body: Vec<u8>) -> Packet {
    let session_raw = u32::from_le_bytes(body[0..4].try_into().unwrap());
    if session_raw & ACK_BIT != 0 {
        Packet {
            fd,
            session: session_raw & !ACK_BIT,
            is_ack: true,
            cmd: None,
            traceid: None,
            payload: body[4..].to_vec().into_boxed_slice(),
        }
    } else {
        let cmd = u32::from_le_bytes(body[4..8].try_into().unwrap());
        let traceid = u64::from_le_bytes(body[8..16].try_into().unwrap());
        Packet {
            fd,
            session: session_raw,
            is_ack: false,
            cmd: Some(cmd),
            traceid: Some(traceid),
            payload: body[16..].to_vec().into_boxed_slice(),
        }
    }
}

impl Cluster {
    pub fn new(hardlimit: u32, softlimit: u32) -> Self {
        Cluster {
            hardlimit,
            softlimit,
            session_counter: 0,
            incompletes: HashMap::new(),
            queue: VecDeque::new(),
        }
    }

    /// Feeds newly-read bytes for `fd` into its reassembly state, pushing
    /// every frame that completes onto the packet queue. Returns the error
    /// (and poisons the fd) the first time a size check fails; the caller is
    /// expected to close and `clear` the fd in response.
    pub fn push(&mut self, fd: Sid, mut data: &[u8]) -> Result<(), ClusterError> {
        loop {
            if let Some(FdState::Poisoned(err)) = self.incompletes.get(&fd) {
                return Err(*err);
            }

            let state = self.incompletes.entry(fd).or_insert_with(|| FdState::Active(Incomplete::new()));
            let FdState::Active(incomplete) = state else { unreachable!() };

            match incomplete.feed(data, self.hardlimit) {
                Ok(FeedStep::NeedMore(consumed)) => {
                    data = &data[consumed..];
                    if data.is_empty() {
                        return Ok(());
                    }
                }
                Ok(FeedStep::Complete { consumed, body }) => {
                    self.queue.push_back(decode_packet(fd, body));
                    self.incompletes.remove(&fd);
                    data = &data[consumed..];
                    if data.is_empty() {
                        return Ok(());
                    }
                }
                Err(err) => {
                    self.incompletes.insert(fd, FdState::Poisoned(err));
                    return Err(err);
                }
            }
        }
    }

    pub fn pop(&mut self) -> Option<Packet> {
        self.queue.pop_front()
    }

    /// Drops all reassembly state for `fd`, including a poisoned entry.
    /// Call after closing a fd that failed `push`, or on any ordinary
    /// connection teardown, so a reused `Sid` slot never inherits stale
    /// partial frame bytes.
    pub fn clear(&mut self, fd: Sid) {
        self.incompletes.remove(&fd);
    }

    fn next_session(&mut self) -> u32 {
        let session = self.session_counter;
        self.session_counter = self.session_counter.wrapping_add(1);
        if session >= ACK_BIT {
            self.session_counter = 0;
            0
        } else {
            session
        }
    }

    fn check_pack_size(&self, size: usize) -> Result<(), ClusterError> {
        if size > self.hardlimit as usize {
            return Err(ClusterError::HardLimit);
        }
        if size > self.softlimit as usize {
            warn!(size, softlimit = self.softlimit, "silly-cluster: outgoing frame exceeds soft limit");
        }
        Ok(())
    }

    /// Packs a request frame and returns the session id it was assigned
    /// alongside the wire bytes, ready to hand to the socket thread's send
    /// path.
    pub fn request(&mut self, cmd: u32, traceid: u64, payload: &[u8]) -> Result<(u32, Vec<u8>), ClusterError> {
        let body_len = 4 + 4 + 8 + payload.len();
        self.check_pack_size(body_len)?;

        let session = self.next_session();
        let mut buf = Vec::with_capacity(4 + body_len);
        buf.extend_from_slice(&(body_len as u32).to_le_bytes());
        buf.extend_from_slice(&session.to_le_bytes());
        buf.extend_from_slice(&cmd.to_le_bytes());
        buf.extend_from_slice(&traceid.to_le_bytes());
        buf.extend_from_slice(payload);
        Ok((session, buf))
    }

    /// Packs a response (ack) frame for a previously received request's
    /// session id.
    pub fn response(&self, session: u32, payload: &[u8]) -> Result<Vec<u8>, ClusterError> {
        let body_len = 4 + payload.len();
        self.check_pack_size(body_len)?;

        let mut buf = Vec::with_capacity(4 + body_len);
        buf.extend_from_slice(&(body_len as u32).to_le_bytes());
        buf.extend_from_slice(&(session | ACK_BIT).to_le_bytes());
        buf.extend_from_slice(payload);
        Ok(buf)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn frame_bytes(cluster: &mut Cluster, cmd: u32, traceid: u64, payload: &[u8]) -> Vec<u8> {
        cluster.request(cmd, traceid, payload).unwrap().1
    }

    #[test]
    fn round_trips_a_whole_frame_in_one_push() {
        let mut cluster = Cluster::new(1 << 20, 1 << 16);
        let fd = Sid::from_raw(1);
        let wire = frame_bytes(&mut cluster, 7, 42, b"hello");

        cluster.push(fd, &wire).unwrap();
        let packet = cluster.pop().unwrap();
        assert_eq!(packet.fd, fd);
        assert_eq!(packet.cmd, Some(7));
        assert_eq!(packet.traceid, Some(42));
        assert_eq!(&*packet.payload, b"hello");
        assert!(cluster.pop().is_none());
    }

    #[test]
    fn reassembles_a_frame_split_across_many_pushes() {
        let mut cluster = Cluster::new(1 << 20, 1 << 16);
        let fd = Sid::from_raw(1);
        let wire = frame_bytes(&mut cluster, 7, 42, b"hello world");

        for byte in &wire {
            cluster.push(fd, std::slice::from_ref(byte)).unwrap();
        }

        let packet = cluster.pop().unwrap();
        assert_eq!(&*packet.payload, b"hello world");
    }

    #[test]
    fn drains_two_frames_delivered_in_one_read() {
        let mut cluster = Cluster::new(1 << 20, 1 << 16);
        let fd = Sid::from_raw(1);
        let mut wire = frame_bytes(&mut cluster, 1, 1, b"a");
        wire.extend(frame_bytes(&mut cluster, 2, 2, b"b"));

        cluster.push(fd, &wire).unwrap();
        assert_eq!(&*cluster.pop().unwrap().payload, b"a");
        assert_eq!(&*cluster.pop().unwrap().payload, b"b");
    }

    #[test]
    fn oversize_frame_poisons_the_fd_until_cleared() {
        let mut cluster = Cluster::new(128, 64);
        let fd = Sid::from_raw(1);
        let mut wire = vec![0u8; 4];
        wire[0..4].copy_from_slice(&129u32.to_le_bytes());
        wire.extend_from_slice(&[0u8; 129]);

        assert_eq!(cluster.push(fd, &wire), Err(ClusterError::HardLimit));
        assert_eq!(cluster.push(fd, &[1, 2, 3]), Err(ClusterError::HardLimit));

        cluster.clear(fd);
        cluster.push(fd, &frame_bytes(&mut cluster, 1, 1, b"ok")).unwrap();
        assert_eq!(&*cluster.pop().unwrap().payload, b"ok");
    }

    #[test]
    fn response_frame_carries_the_ack_bit_and_no_cmd() {
        let mut cluster = Cluster::new(1 << 20, 1 << 16);
        let fd = Sid::from_raw(1);
        let wire = cluster.response(99, b"reply").unwrap();

        cluster.push(fd, &wire).unwrap();
        let packet = cluster.pop().unwrap();
        assert!(packet.is_ack);
        assert_eq!(packet.session, 99);
        assert_eq!(packet.cmd, None);
        assert_eq!(&*packet.payload, b"reply");
    }

    #[test]
    fn session_ids_wrap_at_the_ack_bit_boundary() {
        let mut cluster = Cluster::new(1 << 20, 1 << 16);
        cluster.session_counter = ACK_BIT - 1;
        let (first, _) = cluster.request(0, 0, b"").unwrap();
        let (second, _) = cluster.request(0, 0, b"").unwrap();
        assert_eq!(first, ACK_BIT - 1);
        assert_eq!(second, 0);
    }
}
