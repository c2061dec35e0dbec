use std::collections::HashMap;
use std::sync::Mutex;

use silly_queue::{Message, MessageKind, Queue, Sid};
use silly_timing::{Duration, Instant};
use silly_utils::{Arena, ArenaIndex};

/// Handle returned by [`Wheel::insert`]. Backed directly by the arena slot
/// the node lives in rather than a hand-packed `{generation, slot}` u64:
/// `ArenaIndex` already carries a generation counter, so reusing it gets
/// ABA protection for a timer session id without a second bit-packing
/// scheme alongside it.
pub type TimerId = ArenaIndex;

const LEVEL0_SLOTS: usize = 256;
const LEVEL_SLOTS: usize = 64;
const LEVEL0_BITS: u32 = 8;
const LEVEL_BITS: u32 = 6;

#[derive(Copy, Clone)]
struct Node {
    expire_tick: u64,
    next: Option<ArenaIndex>,
}

fn cascade_shift(level: usize) -> u32 {
    LEVEL0_BITS + LEVEL_BITS * (level as u32 - 1)
}

/// Picks the wheel and slot for an absolute `expire_tick` given the current
/// tick: the lowest level whose range (256 ticks for level 0, `256*64^i`
/// ticks for level `i`) still covers the distance to expiry -- equivalently,
/// the level where the bits distinguishing now from expiration first become
/// non-zero.
fn target(now: u64, expire_tick: u64) -> (usize, usize) {
    let diff = expire_tick.saturating_sub(now);
    if diff < LEVEL0_SLOTS as u64 {
        (0, (expire_tick & (LEVEL0_SLOTS as u64 - 1)) as usize)
    } else if diff < (LEVEL0_SLOTS as u64) << LEVEL_BITS {
        (1, ((expire_tick >> cascade_shift(1)) & (LEVEL_SLOTS as u64 - 1)) as usize)
    } else if diff < (LEVEL0_SLOTS as u64) << (2 * LEVEL_BITS) {
        (2, ((expire_tick >> cascade_shift(2)) & (LEVEL_SLOTS as u64 - 1)) as usize)
    } else if diff < (LEVEL0_SLOTS as u64) << (3 * LEVEL_BITS) {
        (3, ((expire_tick >> cascade_shift(3)) & (LEVEL_SLOTS as u64 - 1)) as usize)
    } else {
        (4, ((expire_tick >> cascade_shift(4)) & (LEVEL_SLOTS as u64 - 1)) as usize)
    }
}

struct Inner {
    current_tick: u64,
    last_instant: Instant,
    level0: [Option<ArenaIndex>; LEVEL0_SLOTS],
    levels: [[Option<ArenaIndex>; LEVEL_SLOTS]; 4],
    arena: Arena<Node>,
    /// `session-id -> user_data`. Presence is the "not yet fired, not yet
    /// cancelled" flag: both `cancel` and the firing path remove the entry,
    /// so exactly one of them observes it present and resolves the race
    /// between a timer firing and being cancelled.
    registry: HashMap<ArenaIndex, u64>,
}

impl Inner {
    fn head_mut(&mut self, level: usize, slot: usize) -> &mut Option<ArenaIndex> {
        if level == 0 { &mut self.level0[slot] } else { &mut self.levels[level - 1][slot] }
    }

    fn place(&mut self, idx: ArenaIndex, expire_tick: u64) {
        let (level, slot) = target(self.current_tick, expire_tick);
        let head = *self.head_mut(level, slot);
        if let Some(node) = self.arena.get_mut(idx) {
            node.next = head;
        }
        *self.head_mut(level, slot) = Some(idx);
    }

    fn cascade(&mut self, level: usize) {
        let shift = cascade_shift(level);
        let slot = ((self.current_tick >> shift) & (LEVEL_SLOTS as u64 - 1)) as usize;
        let mut cur = std::mem::take(&mut self.levels[level - 1][slot]);
        while let Some(idx) = cur {
            let Some(node) = self.arena.get(idx).copied() else { break };
            cur = node.next;
            self.place(idx, node.expire_tick);
        }
    }

    /// Advances one tick: cascades any wheel whose current slot just
    /// wrapped, fires every node due this tick, and returns their
    /// `(session, user_data)` pairs for cancelled-free delivery.
    fn tick_once(&mut self, fired: &mut Vec<(TimerId, u64)>) {
        let tick = self.current_tick;
        if tick % LEVEL0_SLOTS as u64 == 0 {
            self.cascade(1);
            if tick % ((LEVEL0_SLOTS as u64) << LEVEL_BITS) == 0 {
                self.cascade(2);
                if tick % ((LEVEL0_SLOTS as u64) << (2 * LEVEL_BITS)) == 0 {
                    self.cascade(3);
                    if tick % ((LEVEL0_SLOTS as u64) << (3 * LEVEL_BITS)) == 0 {
                        self.cascade(4);
                    }
                }
            }
        }

        let slot = (tick & (LEVEL0_SLOTS as u64 - 1)) as usize;
        let mut cur = std::mem::take(&mut self.level0[slot]);
        while let Some(idx) = cur {
            let node = self.arena.remove(idx).expect("wheel node missing from arena");
            cur = node.next;
            if let Some(user_data) = self.registry.remove(&idx) {
                fired.push((idx, user_data));
            }
        }
        self.current_tick += 1;
    }
}

/// Five-level cascading timer wheel: 256 level-0 slots covering the next
/// 256 ticks, four 64-slot levels above it each covering `256*64^i` ticks.
/// Runs tick processing under a single mutex rather than restricting wheel
/// mutation to one dedicated thread -- [`crate::TimerThread`] still owns the
/// only `advance` caller in normal operation, but `insert` and `cancel` are
/// meant to be called directly from the worker thread, with no command
/// channel in between (unlike the socket thread's), so the wheel itself has
/// to be the synchronization point; see DESIGN.md.
pub struct Wheel {
    inner: Mutex<Inner>,
    resolution: Duration,
}

impl Wheel {
    pub fn new(resolution: Duration) -> Self {
        Wheel {
            inner: Mutex::new(Inner {
                current_tick: 0,
                last_instant: Instant::now(),
                level0: [None; LEVEL0_SLOTS],
                levels: [[None; LEVEL_SLOTS]; 4],
                arena: Arena::new(),
                registry: HashMap::new(),
            }),
            resolution,
        }
    }

    pub fn resolution(&self) -> Duration {
        self.resolution
    }

    pub fn current_tick(&self) -> u64 {
        self.inner.lock().unwrap().current_tick
    }

    /// Schedules `user_data` to fire after `delay`, rounded up to whole
    /// ticks: a zero or sub-resolution delay still waits one tick, so a
    /// timer never fires in the same tick it was scheduled in.
    pub fn insert(&self, delay: Duration, user_data: u64) -> TimerId {
        let res_ms = self.resolution.as_millis().max(1);
        let delay_ticks = delay.as_millis().div_ceil(res_ms).max(1);
        let mut inner = self.inner.lock().unwrap();
        let expire_tick = inner.current_tick + delay_ticks;
        let idx = inner.arena.insert(Node { expire_tick, next: None });
        inner.registry.insert(idx, user_data);
        inner.place(idx, expire_tick);
        idx
    }

    /// Synchronous at the API level: returns the timer's `user_data` iff it
    /// had not already fired. The node itself is left in the wheel -- its
    /// location isn't tracked outside the registry -- and is discarded,
    /// unfired, whenever its tick arrives.
    pub fn cancel(&self, id: TimerId) -> Option<u64> {
        self.inner.lock().unwrap().registry.remove(&id)
    }

    /// Advances the wheel by however many ticks have actually elapsed on
    /// the monotonic clock since the last call, pushing a `TimerFire`
    /// message per non-cancelled node that came due. Drains drift instead
    /// of accumulating it: `last_instant` only ever moves forward by whole
    /// ticks, so a late wakeup doesn't lose the remainder.
    pub fn advance(&self, messages: &Queue<Message>) {
        let mut fired = Vec::new();
        {
            let mut inner = self.inner.lock().unwrap();
            let now = Instant::now();
            let elapsed = if now >= inner.last_instant { now - inner.last_instant } else { Duration::ZERO };
            let res_ms = self.resolution.as_millis().max(1);
            let ticks = elapsed.as_millis() / res_ms;
            if ticks == 0 {
                return;
            }
            inner.last_instant = inner.last_instant + Duration::from_millis(ticks * res_ms);
            for _ in 0..ticks {
                inner.tick_once(&mut fired);
            }
        }
        for (_id, user_data) in fired {
            messages.push(Message::new(MessageKind::TimerFire, Sid::INVALID, user_data, Box::new([])));
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn insert_then_cancel_returns_user_data() {
        let wheel = Wheel::new(Duration::from_millis(10));
        let id = wheel.insert(Duration::from_millis(50), 0xdead_beef);
        assert_eq!(wheel.cancel(id), Some(0xdead_beef));
        assert_eq!(wheel.cancel(id), None, "second cancel must not double-return");
    }

    #[test]
    fn fires_in_expiry_order() {
        let queue: Queue<Message> = Queue::new().unwrap();
        let wheel = Wheel::new(Duration::from_millis(1));
        let _a = wheel.insert(Duration::from_millis(5), 1);
        let _b = wheel.insert(Duration::from_millis(20), 2);

        std::thread::sleep(std::time::Duration::from_millis(30));
        for _ in 0..40 {
            wheel.advance(&queue);
        }

        let batch = queue.drain_batch();
        let user_data: Vec<u64> = batch.iter().map(|m| m.user_data).collect();
        assert_eq!(user_data, vec![1, 2]);
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let queue: Queue<Message> = Queue::new().unwrap();
        let wheel = Wheel::new(Duration::from_millis(1));
        let id = wheel.insert(Duration::from_millis(5), 99);
        assert_eq!(wheel.cancel(id), Some(99));

        std::thread::sleep(std::time::Duration::from_millis(15));
        for _ in 0..20 {
            wheel.advance(&queue);
        }
        assert!(queue.drain_batch().is_empty());
    }

    #[test]
    fn cascade_fires_far_future_timer() {
        let queue: Queue<Message> = Queue::new().unwrap();
        let wheel = Wheel::new(Duration::from_millis(1));
        // forces placement above level 0 (diff >= 256 ticks)
        let _id = wheel.insert(Duration::from_millis(300), 7);
        for _ in 0..320 {
            let mut inner = wheel.inner.lock().unwrap();
            inner.last_instant = inner.last_instant - Duration::from_millis(1);
            drop(inner);
            wheel.advance(&queue);
        }
        let batch = queue.drain_batch();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].user_data, 7);
    }
}
