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

//! Contains the `DynamicModuleLoader` and `DynamicModule` structs.

use libloading::Library;
use retroplex_core::ffi::{
    RetroAudioSampleBatchFn, RetroAudioSampleFn, RetroEnvironmentFn, RetroGameInfo,
    RetroInputPollFn, RetroInputStateFn, RetroSystemInfo, RetroVideoRefreshFn, SystemAvInfo,
};
use retroplex_core::{
    CallbackTable, GameContent, MemoryRegion, ModuleError, ModuleLoader, RetroModule, SystemInfo,
};
use std::ffi::{c_uint, c_void};
use std::path::Path;

/// Declares the module's exported functions and how to resolve them.
macro_rules! module_api {
    ($($name:ident: $ty:ty,)*) => {
        struct ModuleApi {
            $($name: $ty,)*
        }

        impl ModuleApi {
            fn resolve(library: &Library, path: &Path) -> Result<Self, ModuleError> {
                Ok(Self {
                    $($name: {
                        // SAFETY: the declared type matches the libretro ABI for this export.
                        let symbol = unsafe {
                            library.get::<$ty>(concat!(stringify!($name), "\0").as_bytes())
                        }
                        .map_err(|_| ModuleError::MissingSymbol {
                            path: path.to_path_buf(),
                            symbol: stringify!($name),
                        })?;
                        *symbol
                    },)*
                })
            }
        }
    };
}

module_api! {
    retro_set_environment: unsafe extern "C" fn(RetroEnvironmentFn),
    retro_set_video_refresh: unsafe extern "C" fn(RetroVideoRefreshFn),
    retro_set_audio_sample: unsafe extern "C" fn(RetroAudioSampleFn),
    retro_set_audio_sample_batch: unsafe extern "C" fn(RetroAudioSampleBatchFn),
    retro_set_input_poll: unsafe extern "C" fn(RetroInputPollFn),
    retro_set_input_state: unsafe extern "C" fn(RetroInputStateFn),
    retro_init: unsafe extern "C" fn(),
    retro_deinit: unsafe extern "C" fn(),
    retro_api_version: unsafe extern "C" fn() -> c_uint,
    retro_get_system_info: unsafe extern "C" fn(*mut RetroSystemInfo),
    retro_get_system_av_info: unsafe extern "C" fn(*mut SystemAvInfo),
    retro_set_controller_port_device: unsafe extern "C" fn(c_uint, c_uint),
    retro_reset: unsafe extern "C" fn(),
    retro_run: unsafe extern "C" fn(),
    retro_serialize_size: unsafe extern "C" fn() -> usize,
    retro_serialize: unsafe extern "C" fn(*mut c_void, usize) -> bool,
    retro_unserialize: unsafe extern "C" fn(*const c_void, usize) -> bool,
    retro_load_game: unsafe extern "C" fn(*const RetroGameInfo) -> bool,
    retro_unload_game: unsafe extern "C" fn(),
    retro_get_memory_data: unsafe extern "C" fn(c_uint) -> *mut c_void,
    retro_get_memory_size: unsafe extern "C" fn(c_uint) -> usize,
}

/// A libretro core loaded from a shared library.
///
/// Each instance owns its own [`Library`]. Two instances of the same core must
/// be loaded from different files, otherwise the dynamic linker hands back the
/// same global state.
pub struct DynamicModule {
    api: ModuleApi,
    // Declared last so the symbols above never outlive the mapping.
    _library: Library,
}

impl DynamicModule {
    /// Opens `path` and resolves every required export.
    pub fn open(path: &Path) -> Result<Self, ModuleError> {
        // SAFETY: loading a library runs its initialisers; a libretro core is
        // trusted code by definition.
        let library = unsafe { Library::new(path) }.map_err(|e| ModuleError::Load {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let api = ModuleApi::resolve(&library, path)?;
        log::debug!("Resolved libretro exports of '{}'", path.display());
        Ok(Self {
            api,
            _library: library,
        })
    }
}

// SAFETY (all calls below): the function pointers were resolved from a
// library that `self` keeps mapped, and the runtime only calls them from the
// thread that loaded the module.
impl RetroModule for DynamicModule {
    fn api_version(&self) -> u32 {
        unsafe { (self.api.retro_api_version)() }
    }

    fn set_callbacks(&mut self, callbacks: &CallbackTable) {
        unsafe {
            (self.api.retro_set_environment)(callbacks.environment);
            (self.api.retro_set_video_refresh)(callbacks.video_refresh);
            (self.api.retro_set_audio_sample)(callbacks.audio_sample);
            (self.api.retro_set_audio_sample_batch)(callbacks.audio_sample_batch);
            (self.api.retro_set_input_poll)(callbacks.input_poll);
            (self.api.retro_set_input_state)(callbacks.input_state);
        }
    }

    fn init(&mut self) {
        unsafe { (self.api.retro_init)() }
    }

    fn deinit(&mut self) {
        unsafe { (self.api.retro_deinit)() }
    }

    fn system_info(&self) -> SystemInfo {
        let mut raw = RetroSystemInfo::default();
        unsafe {
            (self.api.retro_get_system_info)(&mut raw);
            SystemInfo::from_raw(&raw)
        }
    }

    fn system_av_info(&self) -> SystemAvInfo {
        let mut info = SystemAvInfo::default();
        unsafe { (self.api.retro_get_system_av_info)(&mut info) };
        info
    }

    fn set_controller_port_device(&mut self, port: u32, device: u32) {
        unsafe { (self.api.retro_set_controller_port_device)(port, device) }
    }

    fn reset(&mut self) {
        unsafe { (self.api.retro_reset)() }
    }

    fn run(&mut self) {
        unsafe { (self.api.retro_run)() }
    }

    fn load_game(&mut self, content: &GameContent) -> bool {
        let info = content.as_raw();
        unsafe { (self.api.retro_load_game)(&info) }
    }

    fn unload_game(&mut self) {
        unsafe { (self.api.retro_unload_game)() }
    }

    fn memory(&mut self, region: MemoryRegion) -> Option<&mut [u8]> {
        let id = region.id();
        let (data, size) = unsafe {
            (
                (self.api.retro_get_memory_data)(id),
                (self.api.retro_get_memory_size)(id),
            )
        };
        if data.is_null() || size == 0 {
            return None;
        }
        // SAFETY: the module guarantees `size` bytes at `data` until the game
        // is unloaded, which needs `&mut self`.
        Some(unsafe { std::slice::from_raw_parts_mut(data.cast::<u8>(), size) })
    }

    fn serialize_size(&self) -> usize {
        unsafe { (self.api.retro_serialize_size)() }
    }

    fn serialize(&mut self, buffer: &mut [u8]) -> bool {
        unsafe { (self.api.retro_serialize)(buffer.as_mut_ptr().cast(), buffer.len()) }
    }

    fn unserialize(&mut self, buffer: &[u8]) -> bool {
        unsafe { (self.api.retro_unserialize)(buffer.as_ptr().cast(), buffer.len()) }
    }
}

/// A [`ModuleLoader`] that opens libretro cores with the platform's dynamic linker.
#[derive(Debug, Default, Clone, Copy)]
pub struct DynamicModuleLoader;

impl DynamicModuleLoader {
    /// Creates the loader.
    pub fn new() -> Self {
        Self
    }
}

impl ModuleLoader for DynamicModuleLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn RetroModule>, ModuleError> {
        Ok(Box::new(DynamicModule::open(path)?))
    }
}
