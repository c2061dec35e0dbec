use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;

use mio::Token;
use tracing::debug;

use crate::poll::Demultiplexer;

/// Invoked once a queued [`SendItem::Shared`] chunk is retired, successfully
/// or not. `bool` is the same success/failure flag the owning `Message`'s
/// finalizer callback expects.
pub type SendCompletion = Box<dyn FnOnce(bool) + Send>;

/// One queued send. `Shared` backs multicast sends: several connections hold
/// a clone of the same `Arc<[u8]>` and each tracks its own write offset, so
/// the backing buffer is freed only once every recipient has retired its
/// chunk.
enum SendItem {
    Owned(Box<[u8]>),
    Shared { buf: Arc<[u8]>, offset: usize, on_complete: Option<SendCompletion> },
}

impl SendItem {
    fn bytes(&self) -> &[u8] {
        match self {
            SendItem::Owned(b) => b,
            SendItem::Shared { buf, offset, .. } => &buf[*offset..],
        }
    }

    fn len(&self) -> usize {
        self.bytes().len()
    }

    fn advance(&mut self, n: usize) {
        match self {
            SendItem::Owned(b) => *b = b[n..].into(),
            SendItem::Shared { offset, .. } => *offset += n,
        }
    }

    /// Consumes the item, firing its completion callback (if any) with the
    /// outcome of its final write attempt.
    fn complete(self, ok: bool) {
        if let SendItem::Shared { on_complete: Some(cb), .. } = self {
            cb(ok);
        }
    }
}

const RX_BUF_FLOOR: usize = 4 * 1024;
const RX_BUF_CAP: usize = 1024 * 1024;

#[derive(Debug, PartialEq, Eq)]
pub enum ConnState {
    Alive,
    Disconnected,
}

pub enum ReadOutcome<'a> {
    Data(&'a [u8]),
    WouldBlock,
    Disconnected,
}

/// One TCP connection. Byte-stream pass-through only: a readable event
/// yields raw bytes exactly as received, with no framing applied here
/// (framing, when needed, is a worker-side concern implemented by
/// `silly-cluster`/`silly-hpack`).
///
/// `rx_buf` grows by doubling (up to `RX_BUF_CAP`) whenever a read fills it
/// completely -- a sign more data is likely pending -- and shrinks by
/// halving (down to `RX_BUF_FLOOR`) whenever a read comes back much smaller
/// than the buffer, so a connection that briefly bursts doesn't keep a
/// megabyte buffer pinned for its idle lifetime.
pub struct TcpConnection {
    stream: mio::net::TcpStream,
    rx_buf: Vec<u8>,
    send_backlog: VecDeque<SendItem>,
    /// Invariant: `writable_armed == !send_backlog.is_empty()`.
    writable_armed: bool,
}

impl TcpConnection {
    pub fn new(stream: mio::net::TcpStream) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        Ok(TcpConnection {
            stream,
            rx_buf: vec![0; RX_BUF_FLOOR],
            send_backlog: VecDeque::new(),
            writable_armed: false,
        })
    }

    pub fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    /// Checks `SO_ERROR` on the underlying socket; used to distinguish a
    /// completed non-blocking connect from a refused one when the first
    /// writable event for a `Connecting` socket arrives.
    pub fn take_error(&self) -> io::Result<Option<io::Error>> {
        self.stream.take_error()
    }

    pub fn peer_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.stream.peer_addr()
    }

    pub fn pending_send_bytes(&self) -> usize {
        self.send_backlog.iter().map(SendItem::len).sum()
    }

    /// Reads once and applies the grow/shrink heuristic. Call in a loop
    /// until `WouldBlock` or `Disconnected`.
    pub fn read_ready(&mut self) -> ReadOutcome<'_> {
        match self.stream.read(&mut self.rx_buf) {
            Ok(0) => ReadOutcome::Disconnected,
            Ok(n) => {
                if n == self.rx_buf.len() && self.rx_buf.len() < RX_BUF_CAP {
                    self.rx_buf.resize(self.rx_buf.len() * 2, 0);
                } else if n < self.rx_buf.len() / 4 && self.rx_buf.len() > RX_BUF_FLOOR {
                    self.rx_buf.resize((self.rx_buf.len() / 2).max(RX_BUF_FLOOR), 0);
                }
                ReadOutcome::Data(&self.rx_buf[..n])
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => ReadOutcome::WouldBlock,
            Err(err) => {
                debug!(?err, "tcp: read failed");
                ReadOutcome::Disconnected
            }
        }
    }

    /// Optimistic send: writes immediately if the backlog is empty; any
    /// unwritten remainder (or the whole chunk, if the write would block)
    /// is queued and WRITABLE interest is armed.
    pub fn send(
        &mut self,
        demux: &mut impl Demultiplexer,
        token: Token,
        chunk: Box<[u8]>,
    ) -> ConnState {
        self.send_item(demux, token, SendItem::Owned(chunk))
    }

    /// Queues a clone of a shared multicast buffer. `on_complete` fires
    /// exactly once, whether the chunk is fully written, the write fails, or
    /// the connection is closed with it still queued -- the same "once per
    /// recipient, success or failure" contract `MulticastFinalizer` expects.
    pub fn send_shared(
        &mut self,
        demux: &mut impl Demultiplexer,
        token: Token,
        buf: Arc<[u8]>,
        on_complete: SendCompletion,
    ) -> ConnState {
        self.send_item(demux, token, SendItem::Shared { buf, offset: 0, on_complete: Some(on_complete) })
    }

    fn send_item(&mut self, demux: &mut impl Demultiplexer, token: Token, item: SendItem) -> ConnState {
        if !self.send_backlog.is_empty() {
            self.send_backlog.push_back(item);
            return self.arm_writable(demux, token);
        }

        match self.stream.write(item.bytes()) {
            Ok(0) => {
                item.complete(false);
                ConnState::Disconnected
            }
            Ok(n) if n == item.len() => {
                item.complete(true);
                ConnState::Alive
            }
            Ok(n) => {
                let mut item = item;
                item.advance(n);
                self.send_backlog.push_back(item);
                self.arm_writable(demux, token)
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.send_backlog.push_back(item);
                self.arm_writable(demux, token)
            }
            Err(err) => {
                debug!(?err, "tcp: write failed");
                item.complete(false);
                ConnState::Disconnected
            }
        }
    }

    /// Flushes the backlog until the kernel blocks or it empties, then
    /// drops WRITABLE interest if fully drained.
    pub fn drain_backlog(&mut self, demux: &mut impl Demultiplexer, token: Token) -> ConnState {
        while let Some(front) = self.send_backlog.front() {
            match self.stream.write(front.bytes()) {
                Ok(0) => {
                    let item = self.send_backlog.pop_front().unwrap();
                    item.complete(false);
                    return ConnState::Disconnected;
                }
                Ok(n) if n == front.len() => {
                    let item = self.send_backlog.pop_front().unwrap();
                    item.complete(true);
                }
                Ok(n) => {
                    self.send_backlog.front_mut().unwrap().advance(n);
                    break;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    debug!(?err, "tcp: backlog write failed");
                    let item = self.send_backlog.pop_front().unwrap();
                    item.complete(false);
                    return ConnState::Disconnected;
                }
            }
        }

        if self.send_backlog.is_empty() && self.writable_armed {
            if let Err(err) = demux.write_enable(self.fd(), token, false) {
                debug!(?err, "tcp: write_enable(false) failed");
                return ConnState::Disconnected;
            }
            self.writable_armed = false;
        }

        ConnState::Alive
    }

    fn arm_writable(&mut self, demux: &mut impl Demultiplexer, token: Token) -> ConnState {
        if !self.writable_armed {
            if let Err(err) = demux.write_enable(self.fd(), token, true) {
                debug!(?err, "tcp: write_enable(true) failed");
                return ConnState::Disconnected;
            }
            self.writable_armed = true;
        }
        ConnState::Alive
    }

    pub fn close(&mut self, demux: &mut impl Demultiplexer) {
        let _ = demux.del(self.fd());
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
        for item in self.send_backlog.drain(..) {
            item.complete(false);
        }
    }
}
