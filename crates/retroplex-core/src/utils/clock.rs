// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Monotonic clocks used for frame pacing and frame-time reporting.

use std::fmt;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

/// A monotonic time source the run loop can also sleep on.
///
/// Time is reported as the elapsed duration since an arbitrary, fixed origin.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the time elapsed since the clock's origin.
    fn now(&self) -> Duration;

    /// Blocks the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// The wall clock, anchored at its creation instant.
#[derive(Debug, Clone)]
pub struct SystemClock {
    start_time: Instant,
}

impl SystemClock {
    /// Creates a new clock starting now.
    /// ## Returns
    /// A new instance of the SystemClock struct.
    #[inline]
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Duration {
        self.start_time.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            thread::sleep(duration);
        }
    }
}

/// A simulated clock: time only moves when the owner advances it or when
/// someone sleeps on it.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    /// Creates a clock at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward without sleeping.
    /// ## Arguments
    /// * `by` - How far to advance.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SLEEP_DURATION_MS: u64 = 20;
    const SLEEP_MARGIN_MS: u64 = 500;

    /// The system clock must report at least the time it slept for.
    #[test]
    fn system_clock_measures_sleep() {
        let clock = SystemClock::new();
        let before = clock.now();
        clock.sleep(Duration::from_millis(SLEEP_DURATION_MS));
        let elapsed = clock.now() - before;

        assert!(
            elapsed >= Duration::from_millis(SLEEP_DURATION_MS),
            "Elapsed time ({:?}) should be at least the sleep duration",
            elapsed
        );
        assert!(
            elapsed < Duration::from_millis(SLEEP_DURATION_MS + SLEEP_MARGIN_MS),
            "Elapsed time ({:?}) should stay within the margin",
            elapsed
        );
    }

    #[test]
    fn manual_clock_only_moves_when_told() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), Duration::ZERO);

        clock.advance(Duration::from_millis(5));
        clock.sleep(Duration::from_millis(10));
        assert_eq!(clock.now(), Duration::from_millis(15));
    }
}
