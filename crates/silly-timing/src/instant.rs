use crate::Duration;
use crate::global_clock::global_clock;

/// A point in monotonic time, read from the process-wide [`quanta::Clock`].
/// Never construct one from `std::time::Instant` directly — going through
/// the shared clock is what lets tests swap in a mocked `quanta::Clock` for
/// the timer wheel without touching call sites.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant(u64);

impl Instant {
    #[inline]
    pub fn now() -> Self {
        Instant(global_clock().raw())
    }

    #[inline]
    pub fn elapsed(self) -> Duration {
        Instant::now() - self
    }

    #[inline]
    pub fn checked_sub(self, rhs: Duration) -> Option<Instant> {
        self.0.checked_sub(rhs.0).map(Instant)
    }

    #[inline]
    pub fn checked_add(self, rhs: Duration) -> Option<Instant> {
        self.0.checked_add(rhs.0).map(Instant)
    }
}

impl std::ops::Sub for Instant {
    type Output = Duration;
    fn sub(self, rhs: Instant) -> Duration {
        Duration(global_clock().delta(rhs.0, self.0).as_nanos() as u64)
    }
}

impl std::ops::Add<Duration> for Instant {
    type Output = Instant;
    fn add(self, rhs: Duration) -> Instant {
        Instant(self.0 + rhs.0)
    }
}

impl std::ops::Sub<Duration> for Instant {
    type Output = Instant;
    fn sub(self, rhs: Duration) -> Instant {
        Instant(self.0 - rhs.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn elapsed_is_non_negative() {
        let t0 = Instant::now();
        let t1 = Instant::now();
        assert!(t1 >= t0);
        assert!(t0.elapsed() >= Duration::ZERO);
    }
}
