use std::sync::Arc;

use signal_hook::iterator::{Handle, Signals};
use silly_queue::{Message, MessageKind, Queue, Sid};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum SignalError {
    #[error("signal registration failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Cross-thread handle used to watch additional signal numbers after the
/// forwarder thread has started. `silly-signal` deliberately carries no
/// name<->number table -- callers pass whatever `libc`-level signal number
/// their embedding layer resolved.
#[derive(Clone)]
pub struct SignalWatch(Handle);

impl SignalWatch {
    pub fn watch(&self, signum: i32) -> Result<(), SignalError> {
        self.0.add_signal(signum)?;
        Ok(())
    }

    /// Unblocks the forwarder's `run` loop, letting its thread join.
    pub fn close(&self) {
        self.0.close();
    }
}

/// Forwards OS signals into the worker's message queue. `signal_hook`'s
/// `Signals` iterator already implements the async-signal-safe
/// self-pipe-to-dispatcher-thread pattern signal handling needs; this type
/// is the dispatcher thread half of that pattern, turning a delivered
/// signal number into a [`MessageKind::Signal`].
pub struct SignalForwarder {
    signals: Signals,
}

impl SignalForwarder {
    pub fn new(initial: impl IntoIterator<Item = i32>) -> Result<Self, SignalError> {
        Ok(SignalForwarder { signals: Signals::new(initial)? })
    }

    pub fn watch_handle(&self) -> SignalWatch {
        SignalWatch(self.signals.handle())
    }

    /// Blocks forever, pushing a `Signal` message (user_data = signal
    /// number) for every delivery. Call from a dedicated thread; stop it by
    /// calling [`SignalWatch`]'s underlying handle's `close()` (exposed via
    /// `signals.handle().close()`) from elsewhere, which unblocks this loop.
    pub fn run(mut self, messages: Arc<Queue<Message>>) {
        for signum in &mut self.signals {
            debug!(signum, "silly-signal: forwarding signal");
            messages.push(Message::new(MessageKind::Signal, Sid::INVALID, signum as u64, Box::new([])));
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn watch_handle_accepts_additional_signals() {
        let forwarder = SignalForwarder::new([libc::SIGUSR1]).unwrap();
        let watch = forwarder.watch_handle();
        assert!(watch.watch(libc::SIGUSR2).is_ok());
    }
}
