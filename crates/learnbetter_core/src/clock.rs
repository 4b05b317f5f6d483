use std::cell::Cell;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Time source for the polling loops and the content cache.
///
/// `now` drives timers (poll interval, safety timeout, progress ticks) and
/// `unix_millis` stamps persisted records such as `cachedAt`.
pub trait Clock {
    fn now(&self) -> Instant;
    fn unix_millis(&self) -> u64;
    fn sleep_until(&self, deadline: Instant);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_millis(&self) -> u64 {
        unix_millis()
    }

    fn sleep_until(&self, deadline: Instant) {
        let now = Instant::now();
        if deadline > now {
            sleep(deadline - now);
        }
    }
}

/// Clock that only moves when told to. Sleeping advances it instantly.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    unix_origin_ms: u64,
    offset: Cell<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::starting_at_unix_millis(1_700_000_000_000)
    }

    pub fn starting_at_unix_millis(unix_origin_ms: u64) -> Self {
        Self {
            origin: Instant::now(),
            unix_origin_ms,
            offset: Cell::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, step: Duration) {
        self.offset.set(self.offset.get() + step);
    }

    pub fn elapsed(&self) -> Duration {
        self.offset.get()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.offset.get()
    }

    fn unix_millis(&self) -> u64 {
        let offset_ms = u64::try_from(self.offset.get().as_millis()).unwrap_or(u64::MAX);
        self.unix_origin_ms.saturating_add(offset_ms)
    }

    fn sleep_until(&self, deadline: Instant) {
        let now = self.now();
        if deadline > now {
            self.advance(deadline - now);
        }
    }
}

pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
