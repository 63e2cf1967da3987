//! Time sources and per-entity delta timers.
//!
//! Every entity measures its own frame delta with a [`DeltaTimer`] reading a
//! shared [`TimeSource`]. Production code uses [`SystemClock`]; tests and
//! deterministic demos drive a [`ManualClock`] by hand.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A monotonic source of seconds.
pub trait TimeSource: Send + Sync {
    /// Seconds since an arbitrary fixed origin.
    fn now(&self) -> f64;
}

/// Wall-clock time measured from construction.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Create a clock whose origin is now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    bits: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock reading zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward by `seconds`.
    pub fn advance(&self, seconds: f64) {
        let mut current = self.bits.load(Ordering::SeqCst);
        loop {
            let next = (f64::from_bits(current) + seconds).to_bits();
            match self
                .bits
                .compare_exchange_weak(current, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Set the clock to an absolute reading.
    pub fn set(&self, seconds: f64) {
        self.bits.store(seconds.to_bits(), Ordering::SeqCst);
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

/// Measures the time between successive reads of a [`TimeSource`].
///
/// The first read after construction or [`reset`](DeltaTimer::reset) returns
/// zero, so an entity never integrates the time it spent invisible.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeltaTimer {
    last: Option<f64>,
}

impl DeltaTimer {
    /// A timer with no reference point.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restart measuring from `now`.
    pub fn reset(&mut self, now: f64) {
        self.last = Some(now);
    }

    /// Seconds elapsed since the previous call (or reset), then restart.
    pub fn tick(&mut self, now: f64) -> f64 {
        let dt = match self.last {
            Some(last) => now - last,
            None => 0.0,
        };
        self.last = Some(now);
        dt
    }

    /// The reading this timer measures from, if any.
    pub fn reference(&self) -> Option<f64> {
        self.last
    }
}
