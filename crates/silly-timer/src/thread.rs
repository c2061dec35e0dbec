use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use silly_queue::{Message, Queue};

use crate::wheel::Wheel;

/// Owns the dedicated timer thread: sleeps for one tick resolution, then
/// asks the wheel how many ticks actually elapsed, so drift compensation
/// comes from comparing monotonic clock readings rather than accumulating
/// the nominal sleep duration.
pub struct TimerThread {
    wheel: Arc<Wheel>,
    messages: Arc<Queue<Message>>,
    running: Arc<AtomicBool>,
}

impl TimerThread {
    pub fn new(wheel: Arc<Wheel>, messages: Arc<Queue<Message>>) -> Self {
        TimerThread { wheel, messages, running: Arc::new(AtomicBool::new(true)) }
    }

    /// A clone-able handle whose `store(false, ...)` stops the next loop
    /// iteration; used by the runtime's `exit()` path to unwind this thread
    /// alongside the worker and socket threads.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn run(self) {
        let resolution: std::time::Duration = self.wheel.resolution().into();
        while self.running.load(Ordering::Acquire) {
            std::thread::sleep(resolution);
            self.wheel.advance(&self.messages);
        }
    }
}
