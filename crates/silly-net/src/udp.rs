use std::io;
use std::os::fd::{AsRawFd, RawFd};

use tracing::debug;

use crate::peer_addr::PeerAddr;

const UDP_BUF_SIZE: usize = 64 * 1024;

pub enum RecvOutcome<'a> {
    Datagram { payload: &'a [u8], peer: PeerAddr },
    WouldBlock,
    Error,
}

/// A bound or connected UDP socket. Unlike TCP, every successful `recv`
/// produces exactly one message -- datagrams are message-preserving, never
/// coalesced or split by the socket thread.
pub struct UdpSocket {
    socket: mio::net::UdpSocket,
    buf: Vec<u8>,
}

impl UdpSocket {
    pub fn new(socket: mio::net::UdpSocket) -> Self {
        UdpSocket { socket, buf: vec![0; UDP_BUF_SIZE] }
    }

    pub fn fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    pub fn recv_ready(&mut self) -> RecvOutcome<'_> {
        match self.socket.recv_from(&mut self.buf) {
            Ok((n, peer)) => RecvOutcome::Datagram { payload: &self.buf[..n], peer: peer.into() },
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => RecvOutcome::WouldBlock,
            Err(err) => {
                debug!(?err, "udp: recv failed");
                RecvOutcome::Error
            }
        }
    }

    pub fn send_to(&self, buf: &[u8], peer: PeerAddr) -> io::Result<usize> {
        self.socket.send_to(buf, peer.into())
    }

    pub fn connect(&self, peer: PeerAddr) -> io::Result<()> {
        self.socket.connect(peer.into())
    }
}
