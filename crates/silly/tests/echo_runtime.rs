use std::io::{Read, Write};
use std::net::TcpStream as StdTcpStream;
use std::sync::Mutex;
use std::sync::mpsc::{Sender, channel};

use silly::queue::{MessageKind, Sid};
use silly::{Callback, Command, Config, Runtime};

/// Forwards every message the worker sees onto a channel so the test thread
/// can assert on the end-to-end sequence: accept, then the 16 echoed bytes,
/// then close -- but driven through the public `Runtime`/`Callback` surface
/// instead of poking the socket thread directly (that path is covered in
/// `silly-net`'s own integration test).
struct Forwarder(Mutex<Sender<(MessageKind, Sid, Box<[u8]>)>>);

impl Callback for Forwarder {
    fn on_message(&mut self, kind: MessageKind, sid: Sid, _user_data: u64, payload: &[u8]) {
        let _ = self.0.lock().unwrap().send((kind, sid, payload.into()));
    }
}

#[test]
fn runtime_drives_an_echo_connection_end_to_end() {
    let (tx, rx) = channel();
    let runtime = Runtime::start(Config::default(), Forwarder(Mutex::new(tx))).expect("runtime starts");

    let listen_sid = runtime.table().reserve().expect("socket table has room");
    let addr = "127.0.0.1:0".parse().unwrap();
    runtime.commands().push(Command::Listen { sid: listen_sid, addr, backlog: 128 });

    let (kind, _sid, payload) = rx.recv_timeout(std::time::Duration::from_millis(500)).unwrap();
    assert_eq!(kind, MessageKind::ListenOk);
    let port = u16::from_le_bytes(payload[..2].try_into().unwrap());

    let mut client = StdTcpStream::connect(("127.0.0.1", port)).expect("client connects");

    let (kind, conn_sid, _payload) = rx.recv_timeout(std::time::Duration::from_millis(500)).unwrap();
    assert_eq!(kind, MessageKind::Accept);

    let sent: Vec<u8> = (0..16u8).collect();
    client.write_all(&sent).unwrap();

    let (kind, data_sid, payload) = rx.recv_timeout(std::time::Duration::from_millis(500)).unwrap();
    assert_eq!(kind, MessageKind::TcpData);
    assert_eq!(data_sid, conn_sid);
    assert_eq!(&*payload, sent.as_slice());

    runtime.commands().push(Command::Send { sid: conn_sid, payload });

    let mut echoed = [0u8; 16];
    client.read_exact(&mut echoed).unwrap();
    assert_eq!(echoed.as_slice(), sent.as_slice());

    drop(client);

    let (kind, close_sid, _payload) = rx.recv_timeout(std::time::Duration::from_millis(500)).unwrap();
    assert_eq!(kind, MessageKind::Close);
    assert_eq!(close_sid, conn_sid);
}
