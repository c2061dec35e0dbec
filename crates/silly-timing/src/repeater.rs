use crate::{Duration, Instant};

/// Fires at most once per `interval`. The TCP connector uses this to pace
/// reconnect attempts without its own instant bookkeeping.
#[derive(Copy, Clone, Debug)]
pub struct Repeater {
    interval: Duration,
    last_acted: Instant,
}

impl Repeater {
    pub fn new(interval: Duration) -> Self {
        Repeater { interval, last_acted: Instant::now() }
    }

    /// Returns `true` and resets the internal clock if `interval` has
    /// elapsed since the last fire.
    pub fn maybe(&mut self) -> bool {
        if self.last_acted.elapsed() >= self.interval {
            self.last_acted = Instant::now();
            true
        } else {
            false
        }
    }

    pub fn fired(&self) -> bool {
        self.last_acted.elapsed() >= self.interval
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    pub fn reset(&mut self) {
        self.last_acted = Instant::now();
    }

    /// Forces the next `maybe()` call to return `true` regardless of
    /// elapsed time.
    pub fn force_fire(&mut self) {
        self.last_acted = Instant::now() - self.interval;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fires_after_forced() {
        let mut r = Repeater::new(Duration::from_secs(3600));
        assert!(!r.fired());
        r.force_fire();
        assert!(r.fired());
        assert!(r.maybe());
        assert!(!r.fired());
    }
}
