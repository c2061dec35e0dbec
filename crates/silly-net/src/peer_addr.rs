use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

/// Peer address carried on a UDP datagram message. An explicit `{v4, v6}`
/// union rather than a raw `sockaddr_storage` blob, so the worker can
/// inspect and reuse the address (as the send target for a reply) without
/// depending on the layout of a particular OS's socket address structure.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PeerAddr {
    V4 { ip: Ipv4Addr, port: u16 },
    V6 { ip: Ipv6Addr, port: u16, scope_id: u32 },
}

impl From<SocketAddr> for PeerAddr {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => PeerAddr::V4 { ip: *v4.ip(), port: v4.port() },
            SocketAddr::V6(v6) => {
                PeerAddr::V6 { ip: *v6.ip(), port: v6.port(), scope_id: v6.scope_id() }
            }
        }
    }
}

impl From<PeerAddr> for SocketAddr {
    fn from(addr: PeerAddr) -> Self {
        match addr {
            PeerAddr::V4 { ip, port } => SocketAddr::V4(SocketAddrV4::new(ip, port)),
            PeerAddr::V6 { ip, port, scope_id } => {
                SocketAddr::V6(SocketAddrV6::new(ip, port, 0, scope_id))
            }
        }
    }
}

const TAG_V4: u8 = 4;
const TAG_V6: u8 = 6;

impl PeerAddr {
    /// Wire size of this address's encoding, including its tag byte --
    /// `UdpData` messages are prefixed with this many bytes so the worker
    /// can recover the sender and `UdpSend` a reply to the same peer.
    pub const fn encoded_len(self) -> usize {
        match self {
            PeerAddr::V4 { .. } => 1 + 4 + 2,
            PeerAddr::V6 { .. } => 1 + 16 + 2 + 4,
        }
    }

    pub fn encode(self, out: &mut Vec<u8>) {
        match self {
            PeerAddr::V4 { ip, port } => {
                out.push(TAG_V4);
                out.extend_from_slice(&ip.octets());
                out.extend_from_slice(&port.to_le_bytes());
            }
            PeerAddr::V6 { ip, port, scope_id } => {
                out.push(TAG_V6);
                out.extend_from_slice(&ip.octets());
                out.extend_from_slice(&port.to_le_bytes());
                out.extend_from_slice(&scope_id.to_le_bytes());
            }
        }
    }

    /// Decodes a prefix written by [`PeerAddr::encode`], returning the
    /// address and the number of bytes it consumed.
    pub fn decode(bytes: &[u8]) -> Option<(PeerAddr, usize)> {
        match *bytes.first()? {
            TAG_V4 if bytes.len() >= 7 => {
                let ip = Ipv4Addr::new(bytes[1], bytes[2], bytes[3], bytes[4]);
                let port = u16::from_le_bytes(bytes[5..7].try_into().ok()?);
                Some((PeerAddr::V4 { ip, port }, 7))
            }
            TAG_V6 if bytes.len() >= 23 => {
                let ip = Ipv6Addr::from(<[u8; 16]>::try_from(&bytes[1..17]).ok()?);
                let port = u16::from_le_bytes(bytes[17..19].try_into().ok()?);
                let scope_id = u32::from_le_bytes(bytes[19..23].try_into().ok()?);
                Some((PeerAddr::V6 { ip, port, scope_id }, 23))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_v4() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let peer = PeerAddr::from(addr);
        assert_eq!(SocketAddr::from(peer), addr);
    }

    #[test]
    fn wire_round_trips_v4_and_v6() {
        let v4 = PeerAddr::from("127.0.0.1:9000".parse::<SocketAddr>().unwrap());
        let mut buf = Vec::new();
        v4.encode(&mut buf);
        assert_eq!(buf.len(), v4.encoded_len());
        let (decoded, used) = PeerAddr::decode(&buf).unwrap();
        assert_eq!(decoded, v4);
        assert_eq!(used, buf.len());

        let v6 = PeerAddr::from("[::1]:9000".parse::<SocketAddr>().unwrap());
        let mut buf = Vec::new();
        v6.encode(&mut buf);
        assert_eq!(buf.len(), v6.encoded_len());
        let (decoded, used) = PeerAddr::decode(&buf).unwrap();
        assert_eq!(decoded, v6);
        assert_eq!(used, buf.len());
    }

    #[test]
    fn decode_rejects_truncated_input() {
        assert!(PeerAddr::decode(&[TAG_V4, 1, 2]).is_none());
        assert!(PeerAddr::decode(&[]).is_none());
    }
}
