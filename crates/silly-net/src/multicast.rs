use std::sync::Arc;

use silly_queue::{Command, MulticastFinalizer, Sid};

/// Builds the shared buffer for a multicast send to `recipients.len()`
/// sockets and wraps it as a [`Command::SendMulticast`]. Each recipient's
/// connection clones the same `Arc<[u8]>` rather than copying its own chunk;
/// the backing allocation is freed once every clone (and, transitively, the
/// command itself) is dropped, and `finalizer` is invoked by the socket
/// thread once per recipient as its chunk is retired, whether or not the
/// write actually completed.
pub fn multipack(buf: Vec<u8>, recipients: Box<[Sid]>, finalizer: Arc<dyn MulticastFinalizer>) -> Command {
    Command::SendMulticast { recipients, buf: Arc::from(buf.into_boxed_slice()), finalizer }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingFinalizer {
        count: AtomicUsize,
    }

    impl MulticastFinalizer for CountingFinalizer {
        fn on_sent(&self, _sid: Sid, _ok: bool) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn multipack_shares_one_allocation_across_recipients() {
        let finalizer = Arc::new(CountingFinalizer { count: AtomicUsize::new(0) });
        let recipients: Box<[Sid]> =
            Box::new([Sid::from_raw(1), Sid::from_raw(2), Sid::from_raw(3)]);
        let cmd = multipack(b"hello".to_vec(), recipients, finalizer);
        match cmd {
            Command::SendMulticast { recipients, buf, finalizer } => {
                assert_eq!(recipients.len(), 3);
                assert_eq!(&*buf, b"hello");
                for &sid in recipients.iter() {
                    finalizer.on_sent(sid, true);
                }
            }
            _ => panic!("wrong command variant"),
        }
    }
}
