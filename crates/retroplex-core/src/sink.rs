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

//! Defines the abstract `Sink` trait.

use crate::ffi::{self, RetroHwGetProcAddressFn, SystemAvInfo};

/// Pixel layouts a module may emit for software frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFormat {
    /// 0RGB1555, the libretro default.
    #[default]
    Rgb1555,
    /// XRGB8888.
    Xrgb8888,
    /// RGB565.
    Rgb565,
}

impl PixelFormat {
    /// Maps a `retro_pixel_format` value.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            ffi::pixel_format::ORGB1555 => Some(PixelFormat::Rgb1555),
            ffi::pixel_format::XRGB8888 => Some(PixelFormat::Xrgb8888),
            ffi::pixel_format::RGB565 => Some(PixelFormat::Rgb565),
            _ => None,
        }
    }

    /// Size of one pixel in bytes.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb1555 | PixelFormat::Rgb565 => 2,
            PixelFormat::Xrgb8888 => 4,
        }
    }
}

/// Where the pixels of a frame live.
#[derive(Debug, Clone, Copy)]
pub enum FrameData<'a> {
    /// A software frame: `pitch * height` bytes in the frame's pixel format.
    Software(&'a [u8]),
    /// The frame was rendered into the hardware framebuffer.
    Hardware,
    /// The module repeated the previous frame.
    Duplicate,
}

/// One frame emitted by a module's video-refresh callback.
#[derive(Debug, Clone, Copy)]
pub struct VideoFrame<'a> {
    /// Frame contents.
    pub data: FrameData<'a>,
    /// Visible width in pixels.
    pub width: u32,
    /// Visible height in pixels.
    pub height: u32,
    /// Row stride in bytes.
    pub pitch: usize,
    /// Pixel layout of software frames.
    pub format: PixelFormat,
}

/// A module's request for a hardware rendering context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwRenderRequest {
    /// `retro_hw_context_type`.
    pub context_type: u32,
    /// Requested major version.
    pub version_major: u32,
    /// Requested minor version.
    pub version_minor: u32,
    /// A depth buffer is required.
    pub depth: bool,
    /// A stencil buffer is required.
    pub stencil: bool,
    /// Framebuffer origin is the bottom-left corner.
    pub bottom_left_origin: bool,
}

/// The external consumer of a runtime's video frames and audio samples.
///
/// A sink is owned by whoever presents the output (a texture, a window, a
/// test harness). The runtime only ever calls into it from its own thread, but
/// the sink may be invalidated from any thread at any time; the runtime checks
/// [`is_valid`](Sink::is_valid) before it starts running and on every loop iteration.
pub trait Sink: Send + Sync {
    /// Whether the presentation resources still exist.
    fn is_valid(&self) -> bool;

    /// Rendezvous before the first frame: creates presentation resources for the
    /// given AV info. Returning false stops the runtime before it starts running.
    fn prepare(&self, av_info: &SystemAvInfo) -> bool;

    /// Receives one frame.
    fn video_frame(&self, frame: VideoFrame<'_>);

    /// Receives interleaved stereo samples and returns how many *frames*
    /// (sample pairs) were accepted.
    fn queue_audio(&self, samples: &[i16]) -> usize;

    /// Negotiates a hardware context. Returns the symbol loader to hand to the
    /// module, or `None` if the context cannot be provided.
    fn hw_render(&self, _request: &HwRenderRequest) -> Option<RetroHwGetProcAddressFn> {
        None
    }

    /// Handle of the framebuffer hardware-rendered modules should draw into.
    fn current_framebuffer(&self) -> usize {
        0
    }

    /// Releases presentation resources. Called once during teardown.
    fn release(&self) {}
}
