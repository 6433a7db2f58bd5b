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

//! Defines the abstract `RetroModule` and `ModuleLoader` traits.
//!
//! A `RetroModule` is one loaded copy of a hosted libretro core. The trait is the
//! boundary between the runtime (which owns threads, timing and persistence) and
//! whatever actually resolves the module's exported functions.

use crate::error::ModuleError;
use crate::ffi::{
    self, RetroAudioSampleBatchFn, RetroAudioSampleFn, RetroEnvironmentFn, RetroGameInfo,
    RetroHwGetCurrentFramebufferFn, RetroInputPollFn, RetroInputStateFn, RetroSystemInfo,
    RetroVideoRefreshFn, SystemAvInfo,
};
use std::ffi::{c_uint, CStr, CString};
use std::path::Path;

/// The complete set of host callbacks handed to a module.
///
/// Every field is a context-free `extern "C"` function, so a table identifies
/// exactly one binding slot.
#[derive(Clone, Copy)]
pub struct CallbackTable {
    /// Environment queries and registrations.
    pub environment: RetroEnvironmentFn,
    /// Frame presentation.
    pub video_refresh: RetroVideoRefreshFn,
    /// Single stereo sample.
    pub audio_sample: RetroAudioSampleFn,
    /// Interleaved stereo batch.
    pub audio_sample_batch: RetroAudioSampleBatchFn,
    /// Input poll notification.
    pub input_poll: RetroInputPollFn,
    /// Input query.
    pub input_state: RetroInputStateFn,
    /// Current hardware framebuffer handle.
    pub get_current_framebuffer: RetroHwGetCurrentFramebufferFn,
}

/// Owned copy of `retro_system_info`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemInfo {
    /// Descriptive module name.
    pub library_name: String,
    /// Descriptive module version.
    pub library_version: String,
    /// `|`-delimited list of content extensions.
    pub valid_extensions: String,
    /// The module reads content from its path itself.
    pub need_fullpath: bool,
    /// Archives must not be extracted by the host.
    pub block_extract: bool,
}

impl SystemInfo {
    /// Copies the strings out of a raw `retro_system_info`.
    ///
    /// # Safety
    /// Every non-null string pointer must reference a valid NUL-terminated string.
    pub unsafe fn from_raw(raw: &RetroSystemInfo) -> Self {
        let text = |ptr: *const std::ffi::c_char| {
            if ptr.is_null() {
                String::new()
            } else {
                unsafe { CStr::from_ptr(ptr) }
                    .to_string_lossy()
                    .into_owned()
            }
        };
        Self {
            library_name: text(raw.library_name),
            library_version: text(raw.library_version),
            valid_extensions: text(raw.valid_extensions),
            need_fullpath: raw.need_fullpath,
            block_extract: raw.block_extract,
        }
    }
}

/// Memory regions a module may expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryRegion {
    /// Battery-backed save memory.
    SaveRam,
    /// Real-time clock data.
    Rtc,
    /// Main system memory.
    SystemRam,
    /// Video memory.
    VideoRam,
}

impl MemoryRegion {
    /// The libretro region identifier.
    pub fn id(self) -> c_uint {
        match self {
            MemoryRegion::SaveRam => ffi::memory::SAVE_RAM,
            MemoryRegion::Rtc => ffi::memory::RTC,
            MemoryRegion::SystemRam => ffi::memory::SYSTEM_RAM,
            MemoryRegion::VideoRam => ffi::memory::VIDEO_RAM,
        }
    }
}

/// Content handed to `load_game`.
#[derive(Debug, Clone)]
pub struct GameContent {
    path: CString,
    meta: CString,
    data: Option<Vec<u8>>,
}

impl GameContent {
    /// Prepares content for a module.
    ///
    /// When `need_fullpath` is false the file is read into memory up front.
    pub fn prepare(path: &Path, need_fullpath: bool) -> Result<Self, ModuleError> {
        let unreadable = |reason: String| ModuleError::ContentUnreadable {
            path: path.to_path_buf(),
            reason,
        };

        let c_path = CString::new(path.to_string_lossy().into_owned())
            .map_err(|_| unreadable("path contains an interior NUL byte".to_string()))?;

        let data = if need_fullpath {
            None
        } else {
            Some(std::fs::read(path).map_err(|e| unreadable(e.to_string()))?)
        };

        Ok(Self {
            path: c_path,
            meta: CString::default(),
            data,
        })
    }

    /// The content path.
    pub fn path(&self) -> &CStr {
        &self.path
    }

    /// The content bytes, if they were loaded.
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// Borrows the content as a raw `retro_game_info`.
    ///
    /// The returned structure points into `self` and must not outlive it.
    pub fn as_raw(&self) -> RetroGameInfo {
        let (data, size) = match &self.data {
            Some(bytes) => (bytes.as_ptr().cast(), bytes.len()),
            None => (std::ptr::null(), 0),
        };
        RetroGameInfo {
            path: self.path.as_ptr(),
            data,
            size,
            meta: self.meta.as_ptr(),
        }
    }
}

/// One loaded instance of a hosted module.
///
/// Every method must be called from the thread that loaded the module. The
/// hosted API is not reentrant, so implementations are deliberately not `Send`.
pub trait RetroModule {
    /// The libretro API revision reported by the module.
    fn api_version(&self) -> u32;

    /// Registers the host callbacks. Must be called before [`init`](Self::init).
    fn set_callbacks(&mut self, callbacks: &CallbackTable);

    /// `retro_init`.
    fn init(&mut self);

    /// `retro_deinit`.
    fn deinit(&mut self);

    /// `retro_get_system_info`.
    fn system_info(&self) -> SystemInfo;

    /// `retro_get_system_av_info`.
    fn system_av_info(&self) -> SystemAvInfo;

    /// `retro_set_controller_port_device`.
    fn set_controller_port_device(&mut self, port: u32, device: u32);

    /// `retro_reset`.
    fn reset(&mut self);

    /// `retro_run`: advances the module by one frame.
    fn run(&mut self);

    /// `retro_load_game`. Returns false if the module rejected the content.
    fn load_game(&mut self, content: &GameContent) -> bool;

    /// `retro_unload_game`.
    fn unload_game(&mut self);

    /// Borrows a memory region, `None` when the module exposes none.
    fn memory(&mut self, region: MemoryRegion) -> Option<&mut [u8]>;

    /// `retro_serialize_size`.
    fn serialize_size(&self) -> usize;

    /// `retro_serialize`.
    fn serialize(&mut self, buffer: &mut [u8]) -> bool;

    /// `retro_unserialize`.
    fn unserialize(&mut self, buffer: &[u8]) -> bool;
}

/// Produces [`RetroModule`]s from module files.
///
/// Loaders are shared between runtimes; `load` is called on the runtime thread
/// that will own the returned module.
pub trait ModuleLoader: Send + Sync {
    /// Loads the module file at `path` and resolves its required symbols.
    fn load(&self, path: &Path) -> Result<Box<dyn RetroModule>, ModuleError>;
}
