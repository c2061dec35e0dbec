use std::net::SocketAddr;
use std::sync::Arc;

use crate::sid::Sid;

/// Invoked by the socket thread once per recipient of a [`Command::SendMulticast`],
/// whether that recipient's chunk was written in full or discarded because
/// the socket closed first.
pub trait MulticastFinalizer: Send + Sync {
    fn on_sent(&self, sid: Sid, ok: bool);
}

/// Tag byte identifying a [`Command`] variant, shared between the in-process
/// enum and the on-wire header below.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandTag {
    Connect = 0,
    Listen = 1,
    Send = 2,
    Close = 3,
    ReadEnable = 4,
    Terminate = 5,
    UdpBind = 6,
    UdpConnect = 7,
    UdpSend = 8,
}

impl TryFrom<u8> for CommandTag {
    type Error = CommandError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Ok(match tag {
            0 => CommandTag::Connect,
            1 => CommandTag::Listen,
            2 => CommandTag::Send,
            3 => CommandTag::Close,
            4 => CommandTag::ReadEnable,
            5 => CommandTag::Terminate,
            6 => CommandTag::UdpBind,
            7 => CommandTag::UdpConnect,
            8 => CommandTag::UdpSend,
            other => return Err(CommandError::UnknownTag(other)),
        })
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command tag {0}")]
    UnknownTag(u8),
    #[error("truncated command record, need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
}

/// A typed record the worker sends the socket thread. Travels through the
/// same `Mutex<VecDeque<_>>` shape as [`crate::message::Message`]; the fixed
/// `{tag, pad, size}` header below mirrors the wire layout a record would
/// take if this ever crossed a real pipe (see `encode`/`decode`), kept in
/// sync so the two representations can't silently drift apart.
pub enum Command {
    Connect { sid: Sid, addr: SocketAddr },
    Listen { sid: Sid, addr: SocketAddr, backlog: u32 },
    Send { sid: Sid, payload: Box<[u8]> },
    Close { sid: Sid },
    ReadEnable { sid: Sid, enable: bool },
    Terminate,
    UdpBind { sid: Sid, addr: SocketAddr },
    UdpConnect { sid: Sid, addr: SocketAddr },
    UdpSend { sid: Sid, addr: SocketAddr, payload: Box<[u8]> },
    /// Fan out `buf` to every `sid` in `recipients`, sharing one backing
    /// allocation. `finalizer` is called once per recipient regardless of
    /// outcome, so the caller can free/account for the shared buffer once
    /// every clone has been retired. Process-local only -- unlike the other
    /// variants, this one cannot cross a byte pipe (the finalizer is a trait
    /// object), so `encode`/`decode` do not support it.
    SendMulticast { recipients: Box<[Sid]>, buf: Arc<[u8]>, finalizer: Arc<dyn MulticastFinalizer> },
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Connect { sid, addr } => f.debug_struct("Connect").field("sid", sid).field("addr", addr).finish(),
            Command::Listen { sid, addr, backlog } => f
                .debug_struct("Listen")
                .field("sid", sid)
                .field("addr", addr)
                .field("backlog", backlog)
                .finish(),
            Command::Send { sid, payload } => {
                f.debug_struct("Send").field("sid", sid).field("len", &payload.len()).finish()
            }
            Command::Close { sid } => f.debug_struct("Close").field("sid", sid).finish(),
            Command::ReadEnable { sid, enable } => {
                f.debug_struct("ReadEnable").field("sid", sid).field("enable", enable).finish()
            }
            Command::Terminate => f.write_str("Terminate"),
            Command::UdpBind { sid, addr } => f.debug_struct("UdpBind").field("sid", sid).field("addr", addr).finish(),
            Command::UdpConnect { sid, addr } => {
                f.debug_struct("UdpConnect").field("sid", sid).field("addr", addr).finish()
            }
            Command::UdpSend { sid, addr, payload } => f
                .debug_struct("UdpSend")
                .field("sid", sid)
                .field("addr", addr)
                .field("len", &payload.len())
                .finish(),
            Command::SendMulticast { recipients, buf, .. } => f
                .debug_struct("SendMulticast")
                .field("recipients", recipients)
                .field("len", &buf.len())
                .finish(),
        }
    }
}

impl Command {
    pub fn tag(&self) -> CommandTag {
        match self {
            Command::Connect { .. } => CommandTag::Connect,
            Command::Listen { .. } => CommandTag::Listen,
            Command::Send { .. } => CommandTag::Send,
            Command::Close { .. } => CommandTag::Close,
            Command::ReadEnable { .. } => CommandTag::ReadEnable,
            Command::Terminate => CommandTag::Terminate,
            Command::UdpBind { .. } => CommandTag::UdpBind,
            Command::UdpConnect { .. } => CommandTag::UdpConnect,
            Command::UdpSend { .. } => CommandTag::UdpSend,
            Command::SendMulticast { .. } => {
                panic!("SendMulticast is process-local and has no wire tag")
            }
        }
    }

    /// Serializes to the wire layout: `{tag: u8, pad: u8, size: u16}` little
    /// endian header, then a tag-specific body. Used only when a `Command`
    /// needs to cross an actual byte pipe (e.g. `silly-cluster` forwarding a
    /// remote command); the in-process path pushes `Command` values
    /// directly onto the queue. `SendMulticast` carries a trait object and
    /// can only ever take the in-process path; calling this on one is a bug
    /// in the caller.
    pub fn encode(&self, out: &mut Vec<u8>) {
        if let Command::SendMulticast { .. } = self {
            panic!("SendMulticast cannot be encoded onto a byte pipe");
        }
        let body_start = out.len() + 4;
        out.extend_from_slice(&[self.tag() as u8, 0, 0, 0]);
        match self {
            Command::Connect { sid, addr } | Command::Listen { sid, addr, .. } => {
                out.extend_from_slice(&sid.raw().to_le_bytes());
                encode_addr(addr, out);
                if let Command::Listen { backlog, .. } = self {
                    out.extend_from_slice(&backlog.to_le_bytes());
                }
            }
            Command::Send { sid, payload } => {
                out.extend_from_slice(&sid.raw().to_le_bytes());
                out.extend_from_slice(payload);
            }
            Command::Close { sid } => out.extend_from_slice(&sid.raw().to_le_bytes()),
            Command::ReadEnable { sid, enable } => {
                out.extend_from_slice(&sid.raw().to_le_bytes());
                out.push(*enable as u8);
            }
            Command::Terminate => {}
            Command::UdpBind { sid, addr } | Command::UdpConnect { sid, addr } => {
                out.extend_from_slice(&sid.raw().to_le_bytes());
                encode_addr(addr, out);
            }
            Command::UdpSend { sid, addr, payload } => {
                out.extend_from_slice(&sid.raw().to_le_bytes());
                encode_addr(addr, out);
                out.extend_from_slice(payload);
            }
            Command::SendMulticast { .. } => unreachable!("checked above"),
        }
        let size = (out.len() - body_start) as u16;
        out[body_start - 2..body_start].copy_from_slice(&size.to_le_bytes());
    }
}

fn encode_addr(addr: &SocketAddr, out: &mut Vec<u8>) {
    match addr {
        SocketAddr::V4(v4) => {
            out.push(4);
            out.extend_from_slice(&v4.ip().octets());
            out.extend_from_slice(&v4.port().to_le_bytes());
        }
        SocketAddr::V6(v6) => {
            out.push(6);
            out.extend_from_slice(&v6.ip().octets());
            out.extend_from_slice(&v6.port().to_le_bytes());
        }
    }
}

fn decode_addr(buf: &[u8]) -> Result<(SocketAddr, usize), CommandError> {
    let need = |n: usize| -> Result<(), CommandError> {
        if buf.len() < n { Err(CommandError::Truncated { need: n, have: buf.len() }) } else { Ok(()) }
    };
    need(1)?;
    match buf[0] {
        4 => {
            need(1 + 4 + 2)?;
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&buf[1..5]);
            let port = u16::from_le_bytes([buf[5], buf[6]]);
            Ok((SocketAddr::from((octets, port)), 7))
        }
        6 => {
            need(1 + 16 + 2)?;
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&buf[1..17]);
            let port = u16::from_le_bytes([buf[17], buf[18]]);
            Ok((SocketAddr::from((octets, port)), 19))
        }
        other => Err(CommandError::UnknownTag(other)),
    }
}

pub fn decode(buf: &[u8]) -> Result<Command, CommandError> {
    if buf.len() < 4 {
        return Err(CommandError::Truncated { need: 4, have: buf.len() });
    }
    let tag = CommandTag::try_from(buf[0])?;
    let size = u16::from_le_bytes([buf[2], buf[3]]) as usize;
    let body = &buf[4..];
    if body.len() < size {
        return Err(CommandError::Truncated { need: size, have: body.len() });
    }
    let body = &body[..size];

    let read_sid = |b: &[u8]| -> Result<Sid, CommandError> {
        if b.len() < 4 {
            return Err(CommandError::Truncated { need: 4, have: b.len() });
        }
        Ok(Sid::from_raw(u32::from_le_bytes([b[0], b[1], b[2], b[3]])))
    };

    Ok(match tag {
        CommandTag::Connect => {
            let sid = read_sid(body)?;
            let (addr, _) = decode_addr(&body[4..])?;
            Command::Connect { sid, addr }
        }
        CommandTag::Listen => {
            let sid = read_sid(body)?;
            let (addr, consumed) = decode_addr(&body[4..])?;
            let rest = &body[4 + consumed..];
            if rest.len() < 4 {
                return Err(CommandError::Truncated { need: 4, have: rest.len() });
            }
            let backlog = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
            Command::Listen { sid, addr, backlog }
        }
        CommandTag::Send => {
            let sid = read_sid(body)?;
            Command::Send { sid, payload: body[4..].to_vec().into_boxed_slice() }
        }
        CommandTag::Close => Command::Close { sid: read_sid(body)? },
        CommandTag::ReadEnable => {
            let sid = read_sid(body)?;
            let enable = *body.get(4).ok_or(CommandError::Truncated { need: 5, have: body.len() })? != 0;
            Command::ReadEnable { sid, enable }
        }
        CommandTag::Terminate => Command::Terminate,
        CommandTag::UdpBind => {
            let sid = read_sid(body)?;
            let (addr, _) = decode_addr(&body[4..])?;
            Command::UdpBind { sid, addr }
        }
        CommandTag::UdpConnect => {
            let sid = read_sid(body)?;
            let (addr, _) = decode_addr(&body[4..])?;
            Command::UdpConnect { sid, addr }
        }
        CommandTag::UdpSend => {
            let sid = read_sid(body)?;
            let (addr, consumed) = decode_addr(&body[4..])?;
            let payload = body[4 + consumed..].to_vec().into_boxed_slice();
            Command::UdpSend { sid, addr, payload }
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn close_round_trips() {
        let cmd = Command::Close { sid: Sid::from_raw(77) };
        let mut buf = Vec::new();
        cmd.encode(&mut buf);
        let decoded = decode(&buf).unwrap();
        match decoded {
            Command::Close { sid } => assert_eq!(sid.raw(), 77),
            other => panic!("wrong variant decoded: {other:?}"),
        }
    }

    #[test]
    fn send_round_trips_with_payload() {
        let cmd = Command::Send { sid: Sid::from_raw(3), payload: b"hello".to_vec().into_boxed_slice() };
        let mut buf = Vec::new();
        cmd.encode(&mut buf);
        let decoded = decode(&buf).unwrap();
        match decoded {
            Command::Send { sid, payload } => {
                assert_eq!(sid.raw(), 3);
                assert_eq!(&*payload, b"hello");
            }
            other => panic!("wrong variant decoded: {other:?}"),
        }
    }

    #[test]
    fn truncated_header_errors() {
        assert_eq!(decode(&[0, 0]), Err(CommandError::Truncated { need: 4, have: 2 }));
    }
}
