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

//! Contains the `BufferedSink` struct.

use retroplex_core::ffi::SystemAvInfo;
use retroplex_core::{FrameData, PixelFormat, Sink, VideoFrame};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A copy of the most recent frame a module presented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFrame {
    /// Visible width in pixels.
    pub width: u32,
    /// Visible height in pixels.
    pub height: u32,
    /// Row stride in bytes.
    pub pitch: usize,
    /// Pixel layout.
    pub format: PixelFormat,
    /// `pitch * height` bytes, empty for hardware-rendered frames.
    pub pixels: Vec<u8>,
}

/// A [`Sink`] that keeps the latest frame and a bounded window of audio in memory.
///
/// Useful headless, or as the hand-off point to a presenter running on
/// another thread. Audio never blocks the module: once `capacity` frames are
/// queued the oldest samples are discarded.
#[derive(Debug)]
pub struct BufferedSink {
    valid: AtomicBool,
    audio_capacity: usize,
    av_info: Mutex<Option<SystemAvInfo>>,
    frame: Mutex<Option<StoredFrame>>,
    audio: Mutex<VecDeque<i16>>,
    frames_presented: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BufferedSink {
    /// Creates a sink holding at most `audio_capacity` stereo frames.
    pub fn new(audio_capacity: usize) -> Self {
        Self {
            valid: AtomicBool::new(true),
            audio_capacity,
            av_info: Mutex::new(None),
            frame: Mutex::new(None),
            audio: Mutex::new(VecDeque::with_capacity(audio_capacity * 2)),
            frames_presented: AtomicU64::new(0),
        }
    }

    /// Marks the presentation resources as gone. The runtime stops on its
    /// next loop iteration.
    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }

    /// The AV info the sink was prepared with.
    pub fn av_info(&self) -> Option<SystemAvInfo> {
        *lock(&self.av_info)
    }

    /// The most recent non-duplicate frame.
    pub fn latest_frame(&self) -> Option<StoredFrame> {
        lock(&self.frame).clone()
    }

    /// Number of video-refresh calls received, duplicates included.
    pub fn frames_presented(&self) -> u64 {
        self.frames_presented.load(Ordering::Relaxed)
    }

    /// Stereo frames currently queued.
    pub fn queued_audio_frames(&self) -> usize {
        lock(&self.audio).len() / 2
    }

    /// Removes up to `max_frames` stereo frames from the front of the queue.
    pub fn take_audio(&self, max_frames: usize) -> Vec<i16> {
        let mut audio = lock(&self.audio);
        let count = audio.len().min(max_frames.saturating_mul(2));
        audio.drain(..count).collect()
    }
}

impl Sink for BufferedSink {
    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    fn prepare(&self, av_info: &SystemAvInfo) -> bool {
        if !self.is_valid() {
            return false;
        }
        log::debug!(
            "Sink prepared for {}x{} at {:.2} fps, {} Hz",
            av_info.geometry.base_width,
            av_info.geometry.base_height,
            av_info.timing.fps,
            av_info.timing.sample_rate
        );
        *lock(&self.av_info) = Some(*av_info);
        true
    }

    fn video_frame(&self, frame: VideoFrame<'_>) {
        self.frames_presented.fetch_add(1, Ordering::Relaxed);
        let pixels = match frame.data {
            FrameData::Duplicate => return,
            FrameData::Hardware => Vec::new(),
            FrameData::Software(bytes) => bytes.to_vec(),
        };
        *lock(&self.frame) = Some(StoredFrame {
            width: frame.width,
            height: frame.height,
            pitch: frame.pitch,
            format: frame.format,
            pixels,
        });
    }

    fn queue_audio(&self, samples: &[i16]) -> usize {
        let frames = samples.len() / 2;
        let capacity = self.audio_capacity * 2;
        if capacity == 0 {
            return frames;
        }

        let mut audio = lock(&self.audio);
        let incoming = &samples[..frames * 2];
        let incoming = &incoming[incoming.len().saturating_sub(capacity)..];
        let overflow = (audio.len() + incoming.len()).saturating_sub(capacity);
        audio.drain(..overflow);
        audio.extend(incoming.iter().copied());
        frames
    }

    fn release(&self) {
        lock(&self.audio).clear();
        *lock(&self.frame) = None;
    }
}
