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

//! Frame pacing and frame-time reporting.
//!
//! Both types are pure: they are fed timestamps from a
//! [`Clock`](retroplex_core::Clock) and never sleep themselves.

use retroplex_core::config::DEFAULT_FPS;
use retroplex_core::ffi::RetroUsec;
use std::time::Duration;

/// The duration of one frame at `fps`, if it is positive and representable.
fn interval_for(fps: f64) -> Option<Duration> {
    if !fps.is_finite() || fps <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(fps.recip())
        .ok()
        .filter(|interval| !interval.is_zero())
}

/// Keeps a run loop at a target frame rate.
///
/// Pacing is measured against a reference point, not frame to frame, so sleep
/// jitter does not accumulate. When the loop falls more than one frame behind,
/// the reference is reset instead of running the missed frames back to back.
#[derive(Debug, Clone)]
pub struct FramePacer {
    frame_interval: Duration,
    start: Duration,
    frames: u64,
}

impl FramePacer {
    /// Creates a pacer for `fps`, starting at `now`.
    ///
    /// A rate without a usable frame interval is replaced by `fallback_fps`,
    /// and an unusable fallback by [`DEFAULT_FPS`].
    pub fn new(fps: f64, fallback_fps: f64, now: Duration) -> Self {
        let frame_interval = interval_for(fps)
            .or_else(|| {
                log::warn!("Invalid frame rate {fps}, pacing at {fallback_fps} fps");
                interval_for(fallback_fps)
            })
            .unwrap_or_else(|| {
                log::warn!("Invalid fallback frame rate {fallback_fps}, pacing at {DEFAULT_FPS} fps");
                Duration::from_secs_f64(DEFAULT_FPS.recip())
            });
        Self {
            frame_interval,
            start: now,
            frames: 0,
        }
    }

    /// The target duration of one frame.
    pub fn frame_interval(&self) -> Duration {
        self.frame_interval
    }

    /// Frames counted since the last reset.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Records a finished frame at `now` and returns how long to sleep.
    pub fn frame_completed(&mut self, now: Duration) -> Duration {
        self.frames += 1;
        let ideal = Duration::from_nanos(
            (self.frame_interval.as_nanos() as u64).saturating_mul(self.frames),
        );
        let actual = now.saturating_sub(self.start);

        if actual > ideal + self.frame_interval {
            log::debug!(
                "Pacing fell {:?} behind after {} frames, resetting",
                actual - ideal,
                self.frames
            );
            self.start = now;
            self.frames = 0;
            return Duration::ZERO;
        }

        ideal.saturating_sub(actual)
    }
}

/// Produces the deltas handed to a module's frame-time callback.
#[derive(Debug, Clone)]
pub struct FrameTimer {
    reference: RetroUsec,
    last: Option<Duration>,
}

impl FrameTimer {
    /// `reference` is reported on the first tick.
    pub fn new(reference: RetroUsec) -> Self {
        Self {
            reference,
            last: None,
        }
    }

    /// Microseconds since the previous tick.
    pub fn tick(&mut self, now: Duration) -> RetroUsec {
        let delta = match self.last {
            None => self.reference,
            Some(previous) => now.saturating_sub(previous).as_micros() as RetroUsec,
        };
        self.last = Some(now);
        delta
    }
}
