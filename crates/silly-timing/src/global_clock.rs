use std::sync::OnceLock;

use quanta::Clock;

/// One calibrated `quanta::Clock` per process. Calibration (figuring out the
/// TSC-to-nanosecond ratio) costs a handful of microseconds; every thread
/// that needs the time shares this instance rather than paying that cost
/// itself, which is also why the socket, timer and worker threads all reach
/// for this rather than constructing their own `Clock`.
static CLOCK: OnceLock<Clock> = OnceLock::new();

pub(crate) fn global_clock() -> &'static Clock {
    CLOCK.get_or_init(Clock::new)
}
