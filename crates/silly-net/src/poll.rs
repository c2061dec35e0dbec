use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use mio::event::Source;
use mio::{Events, Interest, Token};

/// Readiness reported for one registered fd by a single [`Demultiplexer::wait`] call.
#[derive(Copy, Clone, Debug)]
pub struct Readiness {
    pub token: Token,
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
}

/// The capability set every OS readiness backend (epoll, kqueue, select)
/// must expose. `mio::Poll` already multiplexes these per platform; this
/// trait exists so the socket thread's event loop is written once against
/// five abstract operations -- create, add, del, write_enable, wait --
/// rather than against `mio` directly.
pub trait Demultiplexer {
    fn add(&mut self, fd: RawFd, token: Token, writable: bool) -> io::Result<()>;
    fn del(&mut self, fd: RawFd) -> io::Result<()>;
    fn write_enable(&mut self, fd: RawFd, token: Token, enable: bool) -> io::Result<()>;
    /// Blocks up to `timeout` (or forever if `None`) and fills `out` with
    /// readiness events. Returns the number of events written.
    fn wait(&mut self, out: &mut Vec<Readiness>, timeout: Option<Duration>) -> io::Result<usize>;
}

/// Production [`Demultiplexer`] backed by `mio::Poll`, which selects
/// epoll/kqueue/IOCP per platform.
pub struct MioDemultiplexer {
    poll: mio::Poll,
    events: Events,
}

impl MioDemultiplexer {
    pub fn new(events_capacity: usize) -> io::Result<Self> {
        Ok(MioDemultiplexer { poll: mio::Poll::new()?, events: Events::with_capacity(events_capacity) })
    }

    fn interest(writable: bool) -> Interest {
        if writable { Interest::READABLE | Interest::WRITABLE } else { Interest::READABLE }
    }
}

impl Demultiplexer for MioDemultiplexer {
    fn add(&mut self, fd: RawFd, token: Token, writable: bool) -> io::Result<()> {
        let mut source = mio::unix::SourceFd(&fd);
        self.poll.registry().register(&mut source, token, Self::interest(writable))
    }

    fn del(&mut self, fd: RawFd) -> io::Result<()> {
        let mut source = mio::unix::SourceFd(&fd);
        self.poll.registry().deregister(&mut source)
    }

    fn write_enable(&mut self, fd: RawFd, token: Token, enable: bool) -> io::Result<()> {
        let mut source = mio::unix::SourceFd(&fd);
        self.poll.registry().reregister(&mut source, token, Self::interest(enable))
    }

    fn wait(&mut self, out: &mut Vec<Readiness>, timeout: Option<Duration>) -> io::Result<usize> {
        self.poll.poll(&mut self.events, timeout)?;
        out.clear();
        for ev in self.events.iter() {
            out.push(Readiness {
                token: ev.token(),
                readable: ev.is_readable(),
                writable: ev.is_writable(),
                error: ev.is_error(),
            });
        }
        Ok(out.len())
    }
}

/// Registers an already-existing `mio` I/O source (a `TcpListener`, a bound
/// `UdpSocket`) directly, bypassing the raw-fd path used for the command
/// and message queue wakeup pipes.
pub fn register_source<S: Source>(
    demux: &mut MioDemultiplexer,
    source: &mut S,
    token: Token,
    writable: bool,
) -> io::Result<()> {
    demux.poll.registry().register(source, token, MioDemultiplexer::interest(writable))
}

pub fn reregister_source<S: Source>(
    demux: &mut MioDemultiplexer,
    source: &mut S,
    token: Token,
    writable: bool,
) -> io::Result<()> {
    demux.poll.registry().reregister(source, token, MioDemultiplexer::interest(writable))
}

pub fn deregister_source<S: Source>(demux: &mut MioDemultiplexer, source: &mut S) -> io::Result<()> {
    demux.poll.registry().deregister(source)
}
