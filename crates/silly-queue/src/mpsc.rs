use std::collections::VecDeque;
use std::sync::Mutex;

use crate::wakeup::WakeupPipe;

/// Multiple-producer, single-consumer queue. Producers push under a short
/// critical section; the consumer swaps the whole deque out in one
/// critical section (batch drain) and processes it outside the lock, so a
/// slow callback never holds producers off the queue.
///
/// FIFO is guaranteed per-producer, matching the ordering guarantee in the
/// concurrency model this queue backs; no total order across producers is
/// implied or needed.
pub struct Queue<T> {
    inner: Mutex<VecDeque<T>>,
    wakeup: WakeupPipe,
}

impl<T> Queue<T> {
    pub fn new() -> Result<Self, crate::error::QueueError> {
        Ok(Queue { inner: Mutex::new(VecDeque::new()), wakeup: WakeupPipe::new()? })
    }

    pub fn with_capacity_hint(hint: usize) -> Result<Self, crate::error::QueueError> {
        Ok(Queue { inner: Mutex::new(VecDeque::with_capacity(hint)), wakeup: WakeupPipe::new()? })
    }

    /// File descriptor the consumer can register with its event
    /// demultiplexer to be woken when this queue gains entries.
    pub fn wakeup_fd(&self) -> std::os::fd::RawFd {
        self.wakeup.read_fd()
    }

    pub fn push(&self, value: T) {
        self.inner.lock().unwrap().push_back(value);
        self.wakeup.notify();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Swaps out every currently-queued value in one critical section and
    /// re-arms the wakeup flag before releasing the lock, so a push that
    /// races this drain is guaranteed to trigger the next wakeup rather than
    /// being silently folded into this batch without a notification.
    pub fn drain_batch(&self) -> VecDeque<T> {
        let mut guard = self.inner.lock().unwrap();
        let batch = std::mem::take(&mut *guard);
        self.wakeup.arm();
        drop(guard);
        batch
    }

    /// Blocks the calling thread on the wakeup pipe's read end until at
    /// least one byte (or EOF) is available, then drains the queue.
    pub fn drain_blocking(&self) -> VecDeque<T> {
        self.wait_for_wakeup();
        self.wakeup.drain();
        self.drain_batch()
    }

    /// Drains the wakeup pipe's bytes without waiting. Use when the caller
    /// already learned the fd is readable from its own event loop (the
    /// socket thread registers [`Self::wakeup_fd`] with its demultiplexer
    /// rather than blocking in `read()` directly).
    pub fn drain_wakeup_bytes(&self) {
        self.wakeup.drain();
    }

    fn wait_for_wakeup(&self) {
        let mut pfd =
            libc::pollfd { fd: self.wakeup_fd(), events: libc::POLLIN, revents: 0 };
        loop {
            // SAFETY: pfd is a single valid pollfd on the stack.
            let rc = unsafe { libc::poll(&mut pfd as *mut libc::pollfd, 1, -1) };
            if rc >= 0 {
                break;
            }
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::Interrupted {
                break;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn drain_returns_pushed_order() {
        let q: Queue<u32> = Queue::new().unwrap();
        q.push(1);
        q.push(2);
        q.push(3);
        let batch = q.drain_batch();
        assert_eq!(batch.into_iter().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(q.is_empty());
    }

    #[test]
    fn drain_after_empty_push_is_empty() {
        let q: Queue<u32> = Queue::new().unwrap();
        assert!(q.drain_batch().is_empty());
    }
}
