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

//! Raw libretro ABI: `#[repr(C)]` structures, callback signatures and the
//! numeric constants exchanged with hosted modules.
//!
//! Nothing in here is safe to use on its own. Safe wrappers live in
//! [`crate::module`] and [`crate::sink`].

use std::ffi::{c_char, c_uint, c_void};

/// The libretro API revision this host implements.
pub const RETRO_API_VERSION: c_uint = 1;

/// Sentinel passed as `data` to video-refresh when a hardware-rendered frame
/// is ready in the current framebuffer.
pub const RETRO_HW_FRAME_BUFFER_VALID: *const c_void = usize::MAX as *const c_void;

/// Microsecond timestamps and deltas.
pub type RetroUsec = i64;

// --- Host callbacks registered with the module ---

/// `retro_environment_t`.
pub type RetroEnvironmentFn = unsafe extern "C" fn(cmd: c_uint, data: *mut c_void) -> bool;
/// `retro_video_refresh_t`.
pub type RetroVideoRefreshFn =
    unsafe extern "C" fn(data: *const c_void, width: c_uint, height: c_uint, pitch: usize);
/// `retro_audio_sample_t`.
pub type RetroAudioSampleFn = unsafe extern "C" fn(left: i16, right: i16);
/// `retro_audio_sample_batch_t`.
pub type RetroAudioSampleBatchFn = unsafe extern "C" fn(data: *const i16, frames: usize) -> usize;
/// `retro_input_poll_t`.
pub type RetroInputPollFn = unsafe extern "C" fn();
/// `retro_input_state_t`.
pub type RetroInputStateFn =
    unsafe extern "C" fn(port: c_uint, device: c_uint, index: c_uint, id: c_uint) -> i16;
/// `retro_hw_get_current_framebuffer_t`.
pub type RetroHwGetCurrentFramebufferFn = unsafe extern "C" fn() -> usize;
/// `retro_proc_address_t`.
pub type RetroProcAddressFn = unsafe extern "C" fn();
/// `retro_hw_get_proc_address_t`.
pub type RetroHwGetProcAddressFn =
    unsafe extern "C" fn(symbol: *const c_char) -> Option<RetroProcAddressFn>;

// --- Module callbacks registered through the environment ---

/// `retro_frame_time_callback_t`.
pub type RetroFrameTimeFn = unsafe extern "C" fn(usec: RetroUsec);
/// `retro_audio_callback_t`.
pub type RetroAudioPumpFn = unsafe extern "C" fn();
/// `retro_audio_set_state_callback_t`.
pub type RetroAudioSetStateFn = unsafe extern "C" fn(enabled: bool);
/// `retro_hw_context_reset_t`.
pub type RetroHwContextResetFn = unsafe extern "C" fn();

/// Device classes understood by `input_state`.
pub mod device {
    #![allow(missing_docs)]
    use std::ffi::c_uint;

    pub const NONE: c_uint = 0;
    pub const JOYPAD: c_uint = 1;
    pub const MOUSE: c_uint = 2;
    pub const KEYBOARD: c_uint = 3;
    pub const LIGHTGUN: c_uint = 4;
    pub const ANALOG: c_uint = 5;
    pub const POINTER: c_uint = 6;

    /// Number of digital joypad buttons (B .. R3).
    pub const JOYPAD_BUTTON_COUNT: c_uint = 16;
    /// Query id returning every joypad button as a bitmask.
    pub const ID_JOYPAD_MASK: c_uint = 256;

    pub const INDEX_ANALOG_LEFT: c_uint = 0;
    pub const INDEX_ANALOG_RIGHT: c_uint = 1;
    pub const ID_ANALOG_X: c_uint = 0;
    pub const ID_ANALOG_Y: c_uint = 1;
}

/// Memory region identifiers for `retro_get_memory_*`.
pub mod memory {
    #![allow(missing_docs)]
    use std::ffi::c_uint;

    pub const SAVE_RAM: c_uint = 0;
    pub const RTC: c_uint = 1;
    pub const SYSTEM_RAM: c_uint = 2;
    pub const VIDEO_RAM: c_uint = 3;
}

/// Pixel format identifiers for `SET_PIXEL_FORMAT`.
pub mod pixel_format {
    #![allow(missing_docs)]
    use std::ffi::c_uint;

    pub const ORGB1555: c_uint = 0;
    pub const XRGB8888: c_uint = 1;
    pub const RGB565: c_uint = 2;
}

/// Hardware context identifiers for `SET_HW_RENDER`.
pub mod hw_context {
    #![allow(missing_docs)]
    use std::ffi::c_uint;

    pub const NONE: c_uint = 0;
    pub const OPENGL: c_uint = 1;
    pub const OPENGLES2: c_uint = 2;
    pub const OPENGL_CORE: c_uint = 3;
    pub const OPENGLES3: c_uint = 4;
    pub const OPENGLES_VERSION: c_uint = 5;
    pub const VULKAN: c_uint = 6;
}

/// Language identifiers for `GET_LANGUAGE`.
pub mod language {
    #![allow(missing_docs)]
    use std::ffi::c_uint;

    pub const ENGLISH: c_uint = 0;
}

/// Environment command identifiers.
pub mod env {
    #![allow(missing_docs)]
    use std::ffi::c_uint;

    pub const EXPERIMENTAL: c_uint = 0x10000;

    pub const GET_CAN_DUPE: c_uint = 3;
    pub const SHUTDOWN: c_uint = 7;
    pub const GET_SYSTEM_DIRECTORY: c_uint = 9;
    pub const SET_PIXEL_FORMAT: c_uint = 10;
    pub const SET_INPUT_DESCRIPTORS: c_uint = 11;
    pub const SET_HW_RENDER: c_uint = 14;
    pub const GET_VARIABLE: c_uint = 15;
    pub const SET_VARIABLES: c_uint = 16;
    pub const GET_VARIABLE_UPDATE: c_uint = 17;
    pub const SET_FRAME_TIME_CALLBACK: c_uint = 21;
    pub const SET_AUDIO_CALLBACK: c_uint = 22;
    pub const GET_LOG_INTERFACE: c_uint = 27;
    pub const GET_SAVE_DIRECTORY: c_uint = 31;
    pub const GET_LANGUAGE: c_uint = 39;
    pub const SET_HW_RENDER_CONTEXT_NEGOTIATION_INTERFACE: c_uint = 43 | EXPERIMENTAL;
    pub const SET_HW_SHARED_CONTEXT: c_uint = 44 | EXPERIMENTAL;
    pub const GET_AUDIO_VIDEO_ENABLE: c_uint = 47 | EXPERIMENTAL;
    pub const SET_CORE_OPTIONS: c_uint = 53;
    pub const GET_PREFERRED_HW_RENDER: c_uint = 56;
}

/// `struct retro_game_info`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RetroGameInfo {
    /// Path to the content, always set.
    pub path: *const c_char,
    /// Content bytes, null when the module asked for the full path only.
    pub data: *const c_void,
    /// Length of `data` in bytes.
    pub size: usize,
    /// Free-form metadata string.
    pub meta: *const c_char,
}

/// `struct retro_system_info`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RetroSystemInfo {
    /// Descriptive module name.
    pub library_name: *const c_char,
    /// Descriptive module version.
    pub library_version: *const c_char,
    /// `|`-delimited list of content extensions.
    pub valid_extensions: *const c_char,
    /// The module loads content from `path` itself.
    pub need_fullpath: bool,
    /// Archives must not be extracted by the host.
    pub block_extract: bool,
}

impl Default for RetroSystemInfo {
    fn default() -> Self {
        Self {
            library_name: std::ptr::null(),
            library_version: std::ptr::null(),
            valid_extensions: std::ptr::null(),
            need_fullpath: false,
            block_extract: false,
        }
    }
}

/// `struct retro_game_geometry`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GameGeometry {
    /// Nominal video width.
    pub base_width: c_uint,
    /// Nominal video height.
    pub base_height: c_uint,
    /// Maximum possible width.
    pub max_width: c_uint,
    /// Maximum possible height.
    pub max_height: c_uint,
    /// Display aspect ratio, `<= 0` means `base_width / base_height`.
    pub aspect_ratio: f32,
}

/// `struct retro_system_timing`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SystemTiming {
    /// Target frames per second.
    pub fps: f64,
    /// Audio sample rate in Hz.
    pub sample_rate: f64,
}

/// `struct retro_system_av_info`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SystemAvInfo {
    /// Video geometry.
    pub geometry: GameGeometry,
    /// Frame and sample timing.
    pub timing: SystemTiming,
}

/// `struct retro_variable`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RetroVariable {
    /// Variable key, null terminates a `SET_VARIABLES` array.
    pub key: *const c_char,
    /// Value, or `"Description; a|b|c"` when declaring.
    pub value: *const c_char,
}

/// `struct retro_frame_time_callback`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RetroFrameTimeCallback {
    /// Called once per frame with the elapsed time.
    pub callback: Option<RetroFrameTimeFn>,
    /// Frame interval to report on the very first call.
    pub reference: RetroUsec,
}

/// `struct retro_audio_callback`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RetroAudioCallback {
    /// Asks the module to push audio.
    pub callback: Option<RetroAudioPumpFn>,
    /// Tells the module whether audio output is live.
    pub set_state: Option<RetroAudioSetStateFn>,
}

/// `struct retro_input_descriptor`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RetroInputDescriptor {
    /// Controller port.
    pub port: c_uint,
    /// Device class.
    pub device: c_uint,
    /// Device index.
    pub index: c_uint,
    /// Button or axis id.
    pub id: c_uint,
    /// Human readable label, null terminates the array.
    pub description: *const c_char,
}

/// `struct retro_hw_render_callback`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RetroHwRenderCallback {
    /// Requested context kind, see [`hw_context`].
    pub context_type: c_uint,
    /// Called by the host once the context exists.
    pub context_reset: Option<RetroHwContextResetFn>,
    /// Filled in by the host.
    pub get_current_framebuffer: Option<RetroHwGetCurrentFramebufferFn>,
    /// Filled in by the host.
    pub get_proc_address: Option<RetroHwGetProcAddressFn>,
    /// A depth buffer is required.
    pub depth: bool,
    /// A stencil buffer is required.
    pub stencil: bool,
    /// Framebuffer origin is the bottom-left corner.
    pub bottom_left_origin: bool,
    /// Requested major context version.
    pub version_major: c_uint,
    /// Requested minor context version.
    pub version_minor: c_uint,
    /// The context should survive resets.
    pub cache_context: bool,
    /// Called before the context is torn down.
    pub context_destroy: Option<RetroHwContextResetFn>,
    /// A debug context is requested.
    pub debug_context: bool,
}
