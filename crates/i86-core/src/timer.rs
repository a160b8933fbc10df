//! Coarse periodic timer.
//!
//! Time comes from a [`HostClock`] so tests can drive ticks deterministically
//! with [`FakeHostClock`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic host time since an arbitrary origin.
pub trait HostClock: Send {
    fn now(&self) -> Duration;
}

#[derive(Debug, Clone)]
pub struct StdHostClock {
    origin: Instant,
}

impl StdHostClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for StdHostClock {
    fn default() -> Self {
        Self::new()
    }
}

impl HostClock for StdHostClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Manually advanced clock. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct FakeHostClock {
    nanos: Arc<AtomicU64>,
}

impl FakeHostClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, now: Duration) {
        self.nanos.store(now.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl HostClock for FakeHostClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

/// Decides when the next timer tick is due.
#[derive(Debug, Clone)]
pub struct TimerGate {
    interval: Duration,
    last: Duration,
}

impl TimerGate {
    pub fn new(interval: Duration, now: Duration) -> Self {
        Self { interval, last: now }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns true, and restarts the interval, when a tick should fire.
    ///
    /// Nothing fires while interrupts are disabled; the first poll after they
    /// are re-enabled fires once if the interval has elapsed.
    pub fn poll(&mut self, now: Duration, interrupts_enabled: bool) -> bool {
        if !interrupts_enabled || now.saturating_sub(self.last) < self.interval {
            return false;
        }
        self.last = now;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(55);

    #[test]
    fn fires_only_after_interval_with_interrupts_enabled() {
        let clock = FakeHostClock::new();
        let mut gate = TimerGate::new(TICK, clock.now());

        clock.advance(Duration::from_millis(54));
        assert!(!gate.poll(clock.now(), true));

        clock.advance(Duration::from_millis(1));
        assert!(!gate.poll(clock.now(), false));
        assert!(gate.poll(clock.now(), true));
        assert!(!gate.poll(clock.now(), true));

        clock.advance(TICK);
        assert!(gate.poll(clock.now(), true));
    }

    #[test]
    fn long_disabled_stretch_fires_once() {
        let clock = FakeHostClock::new();
        let mut gate = TimerGate::new(TICK, clock.now());
        clock.advance(TICK * 10);
        assert!(!gate.poll(clock.now(), false));
        assert!(gate.poll(clock.now(), true));
        assert!(!gate.poll(clock.now(), true));
    }

    #[test]
    fn fake_clock_clones_share_time() {
        let clock = FakeHostClock::new();
        let other = clock.clone();
        clock.advance(Duration::from_secs(1));
        assert_eq!(other.now(), Duration::from_secs(1));
        other.set(Duration::from_millis(5));
        assert_eq!(clock.now(), Duration::from_millis(5));
    }
}
