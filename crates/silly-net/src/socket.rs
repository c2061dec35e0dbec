use std::sync::Arc;

use mio::Token;
use silly_queue::{Command, Message, MessageKind, MulticastFinalizer, Queue, Sid};
use tracing::{debug, error, warn};

use crate::poll::{Demultiplexer, MioDemultiplexer, Readiness};
use crate::stream::{ConnState, ReadOutcome, TcpConnection};
use crate::table::{Protocol, SocketState, SocketTable};
use crate::udp::{RecvOutcome, UdpSocket};

const WAKEUP_TOKEN: Token = Token(usize::MAX);

enum SocketKind {
    Listener(mio::net::TcpListener),
    Tcp(TcpConnection),
    Udp(UdpSocket),
}

fn token_for(sid: Sid, k: u32) -> Token {
    Token(sid.index(k) as usize)
}

/// The socket multiplexer thread: owns every fd, drains commands from the
/// worker, pumps the demultiplexer, and turns readiness into messages.
///
/// `sockets` is indexed by socket-table slot and touched only from this
/// thread; `table` is the cross-thread-visible view (state, peer address,
/// pending byte count) that `reserve()` and the worker may read
/// concurrently.
pub struct SocketThread<D: Demultiplexer = MioDemultiplexer> {
    demux: D,
    table: Arc<SocketTable>,
    commands: Arc<Queue<Command>>,
    messages: Arc<Queue<Message>>,
    sockets: Vec<Option<SocketKind>>,
    readiness: Vec<Readiness>,
}

impl<D: Demultiplexer> SocketThread<D> {
    pub fn new(
        demux: D,
        table: Arc<SocketTable>,
        commands: Arc<Queue<Command>>,
        messages: Arc<Queue<Message>>,
    ) -> Self {
        let capacity = table.capacity();
        SocketThread {
            demux,
            table,
            commands,
            messages,
            sockets: (0..capacity).map(|_| None).collect(),
            readiness: Vec::with_capacity(256),
        }
    }

    /// Runs the event loop until a `Terminate` command is processed.
    /// Blocking: call from a dedicated thread.
    pub fn run(mut self) {
        if let Err(err) = self.demux.add(self.commands.wakeup_fd(), WAKEUP_TOKEN, false) {
            error!(?err, "socket thread: failed to register command wakeup pipe");
            return;
        }

        loop {
            if self.process_commands() == ControlFlow::Stop {
                return;
            }

            if let Err(err) = self.demux.wait(&mut self.readiness, None) {
                error!(?err, "socket thread: wait failed");
                continue;
            }

            let events = std::mem::take(&mut self.readiness);
            for ev in &events {
                if ev.token == WAKEUP_TOKEN {
                    self.commands.drain_wakeup_bytes();
                    continue;
                }
                self.handle_event(*ev);
            }
            self.readiness = events;
        }
    }

    fn process_commands(&mut self) -> ControlFlow {
        for cmd in self.commands.drain_batch() {
            match cmd {
                Command::Listen { sid, addr, backlog: _ } => self.do_listen(sid, addr),
                Command::Connect { sid, addr } => self.do_connect(sid, addr),
                Command::Send { sid, payload } => self.do_send(sid, payload),
                Command::Close { sid } => self.do_close(sid),
                Command::ReadEnable { sid, enable } => self.do_read_enable(sid, enable),
                Command::Terminate => return ControlFlow::Stop,
                Command::UdpBind { sid, addr } => self.do_udp_bind(sid, addr),
                Command::UdpConnect { sid, addr } => self.do_udp_connect(sid, addr),
                Command::UdpSend { sid, addr, payload } => self.do_udp_send(sid, addr, payload),
                Command::SendMulticast { recipients, buf, finalizer } => {
                    self.do_send_multicast(&recipients, buf, finalizer)
                }
            }
        }
        ControlFlow::Continue
    }

    fn do_listen(&mut self, sid: Sid, addr: std::net::SocketAddr) {
        let token = token_for(sid, self.table.k());
        match mio::net::TcpListener::bind(addr) {
            Ok(listener) => {
                if let Err(err) = self.demux.add(fd_of(&listener), token, false) {
                    warn!(?err, ?addr, "socket thread: listen register failed");
                    self.table.free(sid);
                    return;
                }
                let bound_port = listener.local_addr().map(|a| a.port()).unwrap_or(0);
                self.table.set_state(sid, SocketState::Listen);
                self.table.with_data(sid, |d| d.protocol = Some(Protocol::Tcp));
                self.sockets[token.0] = Some(SocketKind::Listener(listener));
                self.messages.push(Message::new(
                    MessageKind::ListenOk,
                    sid,
                    0,
                    bound_port.to_le_bytes().into(),
                ));
            }
            Err(err) => {
                warn!(?err, ?addr, "socket thread: listen failed");
                self.table.free(sid);
            }
        }
    }

    /// Non-blocking connect: registered for writability immediately, since a
    /// connect's completion (success or refusal) is signalled by the first
    /// writable event rather than by `connect()` itself returning.
    fn do_connect(&mut self, sid: Sid, addr: std::net::SocketAddr) {
        let token = token_for(sid, self.table.k());
        match mio::net::TcpStream::connect(addr) {
            Ok(stream) => match TcpConnection::new(stream) {
                Ok(conn) => {
                    if let Err(err) = self.demux.add(conn.fd(), token, true) {
                        warn!(?err, ?addr, "socket thread: connect register failed");
                        self.table.free(sid);
                        return;
                    }
                    self.table.set_state(sid, SocketState::Connecting);
                    self.table.with_data(sid, |d| {
                        d.protocol = Some(Protocol::Tcp);
                        d.peer_addr = Some(addr.into());
                    });
                    self.sockets[token.0] = Some(SocketKind::Tcp(conn));
                }
                Err(err) => {
                    warn!(?err, ?addr, "socket thread: connect setup failed");
                    self.table.free(sid);
                }
            },
            Err(err) => {
                warn!(?err, ?addr, "socket thread: connect failed");
                self.table.free(sid);
                self.messages.push(Message::new(
                    MessageKind::Close,
                    sid,
                    err.raw_os_error().unwrap_or(-1) as u64,
                    Box::new([]),
                ));
            }
        }
    }

    fn do_send(&mut self, sid: Sid, payload: Box<[u8]>) {
        let token = token_for(sid, self.table.k());
        let Some(Some(SocketKind::Tcp(conn))) = self.sockets.get_mut(token.0) else {
            warn!(?sid, "socket thread: send to unknown/non-tcp socket");
            return;
        };
        if conn.send(&mut self.demux, token, payload) == ConnState::Disconnected {
            self.emit_close(sid, token, 0);
        } else {
            let pending = conn.pending_send_bytes();
            self.table.with_data(sid, |d| d.pending_send_bytes = pending);
        }
    }

    /// Fans a shared buffer out to every recipient still alive; a recipient
    /// that is gone or not a TCP socket is treated the same as a send that
    /// fails outright -- the finalizer still fires for it, just immediately
    /// and with `ok = false`, so the caller always sees exactly one callback
    /// per entry in `recipients`.
    fn do_send_multicast(&mut self, recipients: &[Sid], buf: Arc<[u8]>, finalizer: Arc<dyn MulticastFinalizer>) {
        for &sid in recipients {
            let token = token_for(sid, self.table.k());
            let Some(Some(SocketKind::Tcp(conn))) = self.sockets.get_mut(token.0) else {
                finalizer.on_sent(sid, false);
                continue;
            };
            let cb_finalizer = finalizer.clone();
            let state = conn.send_shared(&mut self.demux, token, buf.clone(), Box::new(move |ok| {
                cb_finalizer.on_sent(sid, ok);
            }));
            if state == ConnState::Disconnected {
                self.emit_close(sid, token, 0);
            } else {
                let pending = conn.pending_send_bytes();
                self.table.with_data(sid, |d| d.pending_send_bytes = pending);
            }
        }
    }

    /// A `Close` command on a TCP socket with unsent backlog doesn't tear
    /// the fd down immediately: the socket enters `HalfClose` and keeps
    /// draining its backlog from the normal writable path; once the backlog
    /// empties, that path transitions it to freed and emits `Close`.
    /// Listeners, UDP sockets, and TCP sockets with nothing left to send
    /// close synchronously.
    fn do_close(&mut self, sid: Sid) {
        let token = token_for(sid, self.table.k());
        if let Some(Some(SocketKind::Tcp(conn))) = self.sockets.get(token.0) {
            if conn.pending_send_bytes() > 0 {
                self.table.set_state(sid, SocketState::HalfClose);
                self.table.with_data(sid, |d| d.read_enabled = false);
                return;
            }
        }
        self.force_close(sid, token);
    }

    fn force_close(&mut self, sid: Sid, token: Token) {
        if let Some(kind) = self.sockets.get_mut(token.0).and_then(|s| s.take()) {
            match kind {
                SocketKind::Tcp(mut conn) => conn.close(&mut self.demux),
                SocketKind::Listener(listener) => {
                    let _ = self.demux.del(fd_of(&listener));
                }
                SocketKind::Udp(udp) => {
                    let _ = self.demux.del(udp.fd());
                }
            }
        }
        self.table.free(sid);
        self.messages.push(Message::empty(MessageKind::Close, sid, 0));
    }

    /// Toggling reads back on doesn't wait for a fresh readiness event: the
    /// demultiplexer is edge-triggered, so a disabled socket that filled its
    /// kernel receive buffer while `READENABLE(false)` would otherwise never
    /// see another `readable` event if nothing new arrives after it.
    /// Draining here picks up whatever is already buffered immediately.
    fn do_read_enable(&mut self, sid: Sid, enable: bool) {
        self.table.with_data(sid, |d| d.read_enabled = enable);
        if enable {
            let token = token_for(sid, self.table.k());
            self.drain_tcp_readable(token);
        }
    }

    fn do_udp_bind(&mut self, sid: Sid, addr: std::net::SocketAddr) {
        let token = token_for(sid, self.table.k());
        match mio::net::UdpSocket::bind(addr) {
            Ok(socket) => {
                let udp = UdpSocket::new(socket);
                if let Err(err) = self.demux.add(udp.fd(), token, false) {
                    warn!(?err, ?addr, "socket thread: udp bind register failed");
                    self.table.free(sid);
                    return;
                }
                self.table.set_state(sid, SocketState::Connected);
                self.table.with_data(sid, |d| d.protocol = Some(Protocol::Udp));
                self.sockets[token.0] = Some(SocketKind::Udp(udp));
            }
            Err(err) => {
                warn!(?err, ?addr, "socket thread: udp bind failed");
                self.table.free(sid);
            }
        }
    }

    fn do_udp_connect(&mut self, sid: Sid, addr: std::net::SocketAddr) {
        let token = token_for(sid, self.table.k());
        if let Some(Some(SocketKind::Udp(udp))) = self.sockets.get(token.0) {
            if let Err(err) = udp.connect(addr.into()) {
                warn!(?err, ?addr, "socket thread: udp connect failed");
            }
        }
    }

    fn do_udp_send(&mut self, sid: Sid, addr: std::net::SocketAddr, payload: Box<[u8]>) {
        let token = token_for(sid, self.table.k());
        if let Some(Some(SocketKind::Udp(udp))) = self.sockets.get(token.0) {
            if let Err(err) = udp.send_to(&payload, addr.into()) {
                debug!(?err, ?addr, "socket thread: udp send failed");
            }
        }
    }

    fn handle_event(&mut self, ev: Readiness) {
        let token = ev.token;
        let Some(kind) = self.sockets.get_mut(token.0).and_then(|s| s.as_mut()) else {
            return;
        };

        if ev.error {
            self.emit_close(self.table.current_sid(token.0 as u32), token, 0);
            return;
        }

        match kind {
            SocketKind::Listener(listener) => {
                if ev.readable {
                    self.accept_loop(token);
                }
            }
            SocketKind::Tcp(_) => self.handle_tcp_event(token, ev),
            SocketKind::Udp(udp) => {
                if ev.readable {
                    self.udp_recv_loop(udp, token);
                }
            }
        }
    }

    fn accept_loop(&mut self, listener_token: Token) {
        loop {
            let Some(Some(SocketKind::Listener(listener))) = self.sockets.get(listener_token.0)
            else {
                return;
            };
            match listener.accept() {
                Ok((stream, peer_addr)) => {
                    let Some(sid) = self.table.reserve() else {
                        warn!("socket thread: accept dropped, table full");
                        continue;
                    };
                    let token = token_for(sid, self.table.k());
                    match TcpConnection::new(stream) {
                        Ok(conn) => {
                            if let Err(err) = self.demux.add(conn.fd(), token, false) {
                                warn!(?err, "socket thread: accept register failed");
                                self.table.free(sid);
                                continue;
                            }
                            self.table.set_state(sid, SocketState::Connected);
                            self.table.with_data(sid, |d| {
                                d.protocol = Some(Protocol::Tcp);
                                d.peer_addr = Some(peer_addr.into());
                                d.read_enabled = true;
                            });
                            self.sockets[token.0] = Some(SocketKind::Tcp(conn));
                            self.messages.push(Message::empty(MessageKind::Accept, sid, 0));
                        }
                        Err(err) => {
                            warn!(?err, "socket thread: accept setup failed");
                            self.table.free(sid);
                        }
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(err) => {
                    warn!(?err, "socket thread: accept failed");
                    return;
                }
            }
        }
    }

    fn handle_tcp_event(&mut self, token: Token, ev: Readiness) {
        let sid = self.table.current_sid(token.0 as u32);
        if ev.writable && self.table.state(sid) == Some(SocketState::Connecting) {
            let Some(Some(SocketKind::Tcp(conn))) = self.sockets.get_mut(token.0) else {
                return;
            };
            match conn.take_error() {
                Ok(None) => {
                    self.table.set_state(sid, SocketState::Connected);
                    self.table.with_data(sid, |d| d.read_enabled = true);
                    self.messages.push(Message::empty(MessageKind::ConnectOk, sid, 0));
                }
                Ok(Some(err)) => {
                    debug!(?err, "socket thread: connect refused");
                    self.emit_close(sid, token, err.raw_os_error().unwrap_or(-1) as u64);
                    return;
                }
                Err(err) => {
                    debug!(?err, "socket thread: take_error failed");
                    self.emit_close(sid, token, 0);
                    return;
                }
            }
        }

        if ev.readable {
            self.drain_tcp_readable(token);
        }

        if ev.writable {
            let Some(Some(SocketKind::Tcp(conn))) = self.sockets.get_mut(token.0) else {
                return;
            };
            let drained = conn.drain_backlog(&mut self.demux, token);
            let pending = conn.pending_send_bytes();
            let sid = self.table.current_sid(token.0 as u32);
            if drained == ConnState::Disconnected {
                self.emit_close(sid, token, 0);
            } else {
                self.table.with_data(sid, |d| d.pending_send_bytes = pending);
                if pending == 0 {
                    self.force_close_if_half_closed(sid, token);
                }
            }
        }
    }

    /// Drains a readable TCP socket into `TcpData` messages, one per
    /// completed read, stopping at `WouldBlock`. A no-op while `READENABLE`
    /// has the socket's read side disabled -- the caller (a readable event,
    /// or `do_read_enable` re-enabling reads) doesn't need to special-case
    /// that, since nothing is produced and the backlog just keeps growing
    /// in the kernel's receive buffer.
    fn drain_tcp_readable(&mut self, token: Token) {
        let sid = self.table.current_sid(token.0 as u32);
        if !self.table.read_enabled(sid) {
            return;
        }
        loop {
            let Some(Some(SocketKind::Tcp(conn))) = self.sockets.get_mut(token.0) else {
                return;
            };
            match conn.read_ready() {
                ReadOutcome::Data(bytes) => {
                    let sid = self.table.current_sid(token.0 as u32);
                    self.messages.push(Message::new(
                        MessageKind::TcpData,
                        sid,
                        0,
                        bytes.to_vec().into_boxed_slice(),
                    ));
                }
                ReadOutcome::WouldBlock => break,
                ReadOutcome::Disconnected => {
                    let sid = self.table.current_sid(token.0 as u32);
                    self.emit_close(sid, token, 0);
                    return;
                }
            }
        }
    }

    /// Each datagram becomes exactly one `UdpData` message whose payload is
    /// `peer_addr_blob || data`; `PeerAddr::decode` on the worker side
    /// recovers the sender to reply with `Command::UdpSend`.
    fn udp_recv_loop(&mut self, _udp: &mut UdpSocket, token: Token) {
        loop {
            let Some(Some(SocketKind::Udp(udp))) = self.sockets.get_mut(token.0) else {
                return;
            };
            match udp.recv_ready() {
                RecvOutcome::Datagram { payload, peer } => {
                    let sid = self.table.current_sid(token.0 as u32);
                    let mut buf = Vec::with_capacity(peer.encoded_len() + payload.len());
                    peer.encode(&mut buf);
                    buf.extend_from_slice(payload);
                    self.messages.push(Message::new(MessageKind::UdpData, sid, 0, buf.into_boxed_slice()));
                }
                RecvOutcome::WouldBlock => break,
                RecvOutcome::Error => break,
            }
        }
    }

    fn emit_close(&mut self, sid: Sid, token: Token, err_code: u64) {
        if let Some(kind) = self.sockets.get_mut(token.0).and_then(|s| s.take()) {
            match kind {
                SocketKind::Tcp(mut conn) => conn.close(&mut self.demux),
                SocketKind::Listener(listener) => {
                    let _ = self.demux.del(fd_of(&listener));
                }
                SocketKind::Udp(udp) => {
                    let _ = self.demux.del(udp.fd());
                }
            }
        }
        self.table.free(sid);
        self.messages.push(Message::empty(MessageKind::Close, sid, err_code));
    }

    /// Shared by `handle_tcp_event`'s writable path: once a `HalfClose`
    /// socket's backlog has fully drained there is nothing left to flush,
    /// so the deferred close from `do_close` completes here instead.
    fn force_close_if_half_closed(&mut self, sid: Sid, token: Token) -> bool {
        if self.table.state(sid) == Some(SocketState::HalfClose) {
            self.force_close(sid, token);
            true
        } else {
            false
        }
    }
}

#[derive(PartialEq, Eq)]
enum ControlFlow {
    Continue,
    Stop,
}

fn fd_of(listener: &mio::net::TcpListener) -> std::os::fd::RawFd {
    use std::os::fd::AsRawFd;
    listener.as_raw_fd()
}
