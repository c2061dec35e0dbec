use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::QueueError;

/// A self-pipe used to wake a thread blocked in `read()` (the worker waiting
/// on the message queue) or in a demultiplexer `wait()` (the socket thread
/// waiting on the command queue).
///
/// `notify()` writes exactly one byte per drain cycle: `needs_wakeup` is set
/// by the consumer right after it drains, and cleared by the first producer
/// that observes it set, so a burst of pushes between two drains costs one
/// write instead of one per push.
pub struct WakeupPipe {
    read_fd: RawFd,
    write_fd: RawFd,
    needs_wakeup: AtomicBool,
}

impl WakeupPipe {
    pub fn new() -> Result<Self, QueueError> {
        let mut fds = [0i32; 2];
        // SAFETY: `fds` is a valid 2-element buffer for pipe2 to fill.
        let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
        if rc != 0 {
            return Err(QueueError::Io(std::io::Error::last_os_error()));
        }
        Ok(WakeupPipe { read_fd: fds[0], write_fd: fds[1], needs_wakeup: AtomicBool::new(true) })
    }

    pub fn read_fd(&self) -> RawFd {
        self.read_fd
    }

    /// Call once after draining the queue, before releasing the lock that
    /// guards it, so a push racing the drain always observes the flag.
    pub fn arm(&self) {
        self.needs_wakeup.store(true, Ordering::Release);
    }

    /// Call after pushing into the queue. Writes a single byte iff this is
    /// the first push since the last drain.
    pub fn notify(&self) {
        if self.needs_wakeup.swap(false, Ordering::AcqRel) {
            let byte = 1u8;
            // SAFETY: write_fd is a valid, open, non-blocking pipe end owned
            // by this struct; EAGAIN/EWOULDBLOCK (pipe full) is harmless,
            // the reader only needs one byte to wake.
            let rc = unsafe { libc::write(self.write_fd, &byte as *const u8 as *const libc::c_void, 1) };
            if rc < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() != std::io::ErrorKind::WouldBlock {
                    tracing::warn!(?err, "wakeup pipe write failed");
                }
            }
        }
    }

    /// Drains all pending wakeup bytes. Call after waking from `read()`.
    pub fn drain(&self) {
        let mut buf = [0u8; 256];
        loop {
            // SAFETY: buf is a valid buffer of the given length.
            let n = unsafe { libc::read(self.read_fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
            if n <= 0 {
                break;
            }
        }
    }
}

impl Drop for WakeupPipe {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read_fd);
            libc::close(self.write_fd);
        }
    }
}

// SAFETY: the two fds are only ever read or written through libc calls that
// are safe to call concurrently from different threads (read end vs write
// end), and `needs_wakeup` is the only shared mutable state.
unsafe impl Send for WakeupPipe {}
unsafe impl Sync for WakeupPipe {}
