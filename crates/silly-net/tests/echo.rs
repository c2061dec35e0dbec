use std::io::{Read, Write};
use std::net::TcpStream as StdTcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use silly_net::multicast::multipack;
use silly_net::poll::MioDemultiplexer;
use silly_net::socket::SocketThread;
use silly_net::table::SocketTable;
use silly_queue::{Command, Message, MessageKind, MulticastFinalizer, Queue, Sid};

fn recv_message(messages: &Queue<Message>, timeout: Duration) -> Message {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        let mut batch = messages.drain_batch();
        if let Some(msg) = batch.pop_front() {
            return msg;
        }
        assert!(std::time::Instant::now() < deadline, "timed out waiting for a message");
        thread::sleep(Duration::from_millis(5));
    }
}

/// Spins for `window`, asserting no message of `kind` ever shows up --
/// used to check a `READENABLE(false)` socket stays silent.
fn assert_no_message_of_kind(messages: &Queue<Message>, kind: MessageKind, window: Duration) {
    let deadline = std::time::Instant::now() + window;
    while std::time::Instant::now() < deadline {
        let batch = messages.drain_batch();
        assert!(
            batch.iter().all(|m| m.kind != kind),
            "unexpected {kind:?} message while reads were disabled"
        );
        thread::sleep(Duration::from_millis(5));
    }
}

/// Listen on an ephemeral port, accept one connection, read 16 bytes, echo
/// them back, then observe the peer's close propagate as a `Close`
/// message -- the end-to-end echo scenario this core is built around.
#[test]
fn echo_roundtrip() {
    let table = Arc::new(SocketTable::new(8));
    let commands: Arc<Queue<Command>> = Arc::new(Queue::new().unwrap());
    let messages: Arc<Queue<Message>> = Arc::new(Queue::new().unwrap());

    let demux = MioDemultiplexer::new(64).unwrap();
    let thread_table = table.clone();
    let thread_commands = commands.clone();
    let thread_messages = messages.clone();
    let handle = thread::spawn(move || {
        SocketThread::new(demux, thread_table, thread_commands, thread_messages).run();
    });

    let listen_sid = table.reserve().expect("table has room");
    let addr = "127.0.0.1:0".parse().unwrap();
    commands.push(Command::Listen { sid: listen_sid, addr, backlog: 128 });

    let listen_ok = recv_message(&messages, Duration::from_millis(500));
    assert_eq!(listen_ok.kind, MessageKind::ListenOk);
    let port = u16::from_le_bytes(listen_ok.payload[..2].try_into().unwrap());

    let mut client = StdTcpStream::connect(("127.0.0.1", port)).expect("client connects");

    let accept = recv_message(&messages, Duration::from_millis(500));
    assert_eq!(accept.kind, MessageKind::Accept);
    let conn_sid = accept.sid;

    let payload: Vec<u8> = (0..16u8).collect();
    client.write_all(&payload).unwrap();

    let data = recv_message(&messages, Duration::from_millis(500));
    assert_eq!(data.kind, MessageKind::TcpData);
    assert_eq!(data.sid, conn_sid);
    assert_eq!(&*data.payload, payload.as_slice());

    commands.push(Command::Send { sid: conn_sid, payload: data.payload.clone() });

    let mut echoed = [0u8; 16];
    client.read_exact(&mut echoed).unwrap();
    assert_eq!(echoed.as_slice(), payload.as_slice());

    drop(client);

    let close = recv_message(&messages, Duration::from_millis(500));
    assert_eq!(close.kind, MessageKind::Close);
    assert_eq!(close.sid, conn_sid);

    commands.push(Command::Terminate);
    handle.join().unwrap();
}

/// `READENABLE(false)` must actually stop `TcpData` from being produced,
/// and `READENABLE(true)` must immediately surface whatever arrived while
/// disabled rather than waiting on a fresh readiness edge.
#[test]
fn read_enable_false_suppresses_tcp_data_until_reenabled() {
    let table = Arc::new(SocketTable::new(8));
    let commands: Arc<Queue<Command>> = Arc::new(Queue::new().unwrap());
    let messages: Arc<Queue<Message>> = Arc::new(Queue::new().unwrap());

    let demux = MioDemultiplexer::new(64).unwrap();
    let thread_table = table.clone();
    let thread_commands = commands.clone();
    let thread_messages = messages.clone();
    let handle = thread::spawn(move || {
        SocketThread::new(demux, thread_table, thread_commands, thread_messages).run();
    });

    let listen_sid = table.reserve().expect("table has room");
    let addr = "127.0.0.1:0".parse().unwrap();
    commands.push(Command::Listen { sid: listen_sid, addr, backlog: 128 });
    let listen_ok = recv_message(&messages, Duration::from_millis(500));
    let port = u16::from_le_bytes(listen_ok.payload[..2].try_into().unwrap());

    let mut client = StdTcpStream::connect(("127.0.0.1", port)).expect("client connects");
    let accept = recv_message(&messages, Duration::from_millis(500));
    let conn_sid = accept.sid;

    commands.push(Command::ReadEnable { sid: conn_sid, enable: false });
    // Give the socket thread a chance to actually process the command
    // before the write below lands.
    thread::sleep(Duration::from_millis(50));

    client.write_all(b"while disabled").unwrap();
    assert_no_message_of_kind(&messages, MessageKind::TcpData, Duration::from_millis(200));

    commands.push(Command::ReadEnable { sid: conn_sid, enable: true });
    let data = recv_message(&messages, Duration::from_millis(500));
    assert_eq!(data.kind, MessageKind::TcpData);
    assert_eq!(&*data.payload, b"while disabled");

    commands.push(Command::Terminate);
    handle.join().unwrap();
}

struct CountingFinalizer(AtomicUsize);

impl MulticastFinalizer for CountingFinalizer {
    fn on_sent(&self, _sid: Sid, _ok: bool) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// A buffer shared across three recipients, one of which is closed before
/// its chunk can possibly drain. The finalizer must still fire exactly once
/// per recipient, and the shared allocation must be freed once it does.
#[test]
fn multicast_finalizer_fires_once_per_recipient() {
    let table = Arc::new(SocketTable::new(8));
    let commands: Arc<Queue<Command>> = Arc::new(Queue::new().unwrap());
    let messages: Arc<Queue<Message>> = Arc::new(Queue::new().unwrap());

    let demux = MioDemultiplexer::new(64).unwrap();
    let thread_table = table.clone();
    let thread_commands = commands.clone();
    let thread_messages = messages.clone();
    let handle = thread::spawn(move || {
        SocketThread::new(demux, thread_table, thread_commands, thread_messages).run();
    });

    let listen_sid = table.reserve().expect("table has room");
    let addr = "127.0.0.1:0".parse().unwrap();
    commands.push(Command::Listen { sid: listen_sid, addr, backlog: 128 });
    let listen_ok = recv_message(&messages, Duration::from_millis(500));
    let port = u16::from_le_bytes(listen_ok.payload[..2].try_into().unwrap());

    let mut clients = Vec::new();
    let mut conn_sids = Vec::new();
    for _ in 0..3 {
        let client = StdTcpStream::connect(("127.0.0.1", port)).expect("client connects");
        let accept = recv_message(&messages, Duration::from_millis(500));
        assert_eq!(accept.kind, MessageKind::Accept);
        conn_sids.push(accept.sid);
        clients.push(client);
    }

    // Drop one client's socket-thread side before the send lands, as if
    // the peer disconnected first.
    drop(clients.remove(0));
    let closed_sid = conn_sids.remove(0);
    let close = recv_message(&messages, Duration::from_millis(500));
    assert_eq!(close.kind, MessageKind::Close);
    assert_eq!(close.sid, closed_sid);

    let finalizer = Arc::new(CountingFinalizer(AtomicUsize::new(0)));
    let recipients: Box<[Sid]> = vec![closed_sid, conn_sids[0], conn_sids[1]].into_boxed_slice();
    commands.push(multipack(b"multicast payload".to_vec(), recipients, finalizer.clone()));

    for client in clients.iter_mut() {
        let mut buf = [0u8; 17];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"multicast payload");
    }

    let deadline = std::time::Instant::now() + Duration::from_millis(500);
    while finalizer.0.load(Ordering::SeqCst) < 3 {
        assert!(std::time::Instant::now() < deadline, "finalizer did not fire for every recipient");
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(finalizer.0.load(Ordering::SeqCst), 3);

    commands.push(Command::Terminate);
    handle.join().unwrap();
}
