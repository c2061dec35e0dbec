use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use silly_queue::{Message, MessageKind, Queue, Sid};

/// The embedder's message handler -- stands in for an embedded
/// scripting-host boundary, treated here as an opaque callback taking
/// `{message_kind, sid, user_data, payload}`.
pub trait Callback: Send {
    fn on_message(&mut self, kind: MessageKind, sid: Sid, user_data: u64, payload: &[u8]);
}

/// Drains the shared message queue and dispatches each entry to a
/// [`Callback`]. One `Worker` owns the callback for the lifetime of the
/// process; `Runtime` owns the thread it runs on.
pub struct Worker<C: Callback> {
    messages: Arc<Queue<Message>>,
    callback: C,
    running: Arc<AtomicBool>,
}

impl<C: Callback> Worker<C> {
    pub fn new(messages: Arc<Queue<Message>>, callback: C) -> Self {
        Worker { messages, callback, running: Arc::new(AtomicBool::new(true)) }
    }

    /// A clone-able handle whose `store(false, ...)` lets the worker finish
    /// its current drain and return, instead of blocking on the next one.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Runs `bootstrap` once, synchronously, before the first drain, then
    /// loops drain-and-dispatch until `stop_handle()` is cleared.
    pub fn run(mut self, bootstrap: Option<Box<dyn FnOnce() + Send>>) {
        if let Some(bootstrap) = bootstrap {
            bootstrap();
        }

        while self.running.load(Ordering::Acquire) {
            let batch = self.messages.drain_blocking();
            for message in batch {
                self.callback.on_message(message.kind, message.sid, message.user_data, &message.payload);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Mutex;

    use super::*;

    struct Recorder(Arc<Mutex<Vec<(MessageKind, Sid, u64)>>>);

    impl Callback for Recorder {
        fn on_message(&mut self, kind: MessageKind, sid: Sid, user_data: u64, _payload: &[u8]) {
            self.0.lock().unwrap().push((kind, sid, user_data));
        }
    }

    #[test]
    fn dispatches_queued_messages_in_order_then_stops() {
        let messages = Arc::new(Queue::new().unwrap());
        messages.push(Message::empty(MessageKind::Signal, Sid::INVALID, 1));
        messages.push(Message::empty(MessageKind::TimerFire, Sid::INVALID, 2));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let worker = Worker::new(messages.clone(), Recorder(seen.clone()));
        let running = worker.stop_handle();

        let handle = std::thread::spawn(move || worker.run(None));
        while seen.lock().unwrap().len() < 2 {
            std::thread::yield_now();
        }
        running.store(false, Ordering::Release);
        messages.push(Message::empty(MessageKind::Close, Sid::INVALID, 3));
        handle.join().unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], (MessageKind::Signal, Sid::INVALID, 1));
        assert_eq!(seen[1], (MessageKind::TimerFire, Sid::INVALID, 2));
    }
}
