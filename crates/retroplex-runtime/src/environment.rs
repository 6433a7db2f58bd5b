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

//! Per-instance answers to the module's environment commands.

use retroplex_core::ffi::{
    self, env, RetroAudioCallback, RetroFrameTimeCallback, RetroHwContextResetFn,
    RetroHwGetCurrentFramebufferFn, RetroHwRenderCallback, RetroInputDescriptor, RetroVariable,
};
use retroplex_core::{HwRenderRequest, ModuleError, PixelFormat, RuntimeConfig, Sink};
use std::collections::BTreeMap;
use std::ffi::{c_char, c_uint, c_void, CStr, CString};
use std::path::Path;

/// A negotiated hardware context.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HwRender {
    pub(crate) request: HwRenderRequest,
    pub(crate) context_reset: Option<RetroHwContextResetFn>,
    pub(crate) context_destroy: Option<RetroHwContextResetFn>,
}

/// The default value of a `SET_VARIABLES` declaration
/// (`"Description; default|other|..."`).
pub(crate) fn default_option(declaration: &str) -> &str {
    let options = declaration
        .split_once("; ")
        .map_or(declaration, |(_, options)| options);
    options.split('|').next().unwrap_or(options)
}

fn path_cstring(path: &Path) -> CString {
    CString::new(path.to_string_lossy().into_owned()).unwrap_or_default()
}

/// # Safety
/// `ptr` must be null or point to a NUL-terminated string.
unsafe fn text(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }
}

pub(crate) struct CoreEnvironment {
    overrides: BTreeMap<String, String>,
    variables: BTreeMap<String, CString>,
    save_directory: CString,
    system_directory: CString,
    language: c_uint,
    pixel_format: PixelFormat,
    frame_time: Option<RetroFrameTimeCallback>,
    audio: Option<RetroAudioCallback>,
    hw_render: Option<HwRender>,
    fatal: Option<ModuleError>,
    shutdown_requested: bool,
}

impl CoreEnvironment {
    pub(crate) fn new(config: &RuntimeConfig) -> Self {
        Self {
            overrides: config.settings.clone(),
            variables: BTreeMap::new(),
            save_directory: path_cstring(&config.save_directory),
            system_directory: path_cstring(&config.system_directory),
            language: config.language,
            pixel_format: PixelFormat::default(),
            frame_time: None,
            audio: None,
            hw_render: None,
            fatal: None,
            shutdown_requested: false,
        }
    }

    pub(crate) fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub(crate) fn frame_time_callback(&self) -> Option<RetroFrameTimeCallback> {
        self.frame_time
    }

    pub(crate) fn audio_callback(&self) -> Option<RetroAudioCallback> {
        self.audio
    }

    pub(crate) fn hw_render(&self) -> Option<HwRender> {
        self.hw_render
    }

    pub(crate) fn take_fatal(&mut self) -> Option<ModuleError> {
        self.fatal.take()
    }

    pub(crate) fn shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }

    /// The current value of a core variable.
    pub(crate) fn variable(&self, key: &str) -> Option<&str> {
        self.variables.get(key).and_then(|v| v.to_str().ok())
    }

    /// Answers one environment command.
    ///
    /// # Safety
    /// `data` must be null or point to the payload libretro defines for `cmd`.
    pub(crate) unsafe fn handle(
        &mut self,
        cmd: c_uint,
        data: *mut c_void,
        sink: &dyn Sink,
        framebuffer: RetroHwGetCurrentFramebufferFn,
    ) -> bool {
        match cmd {
            env::SHUTDOWN => {
                log::info!("Module requested shutdown");
                self.shutdown_requested = true;
                true
            }
            env::GET_LOG_INTERFACE => {
                // The interface is a variadic C function, which cannot be defined here.
                log::debug!("Declining GET_LOG_INTERFACE");
                false
            }
            env::GET_AUDIO_VIDEO_ENABLE | env::SET_CORE_OPTIONS => false,
            env::SET_HW_SHARED_CONTEXT | env::SET_HW_RENDER_CONTEXT_NEGOTIATION_INTERFACE => true,
            _ if data.is_null() => {
                log::warn!("Environment command {cmd} sent without a payload");
                false
            }
            _ => unsafe { self.handle_with_payload(cmd, data, sink, framebuffer) },
        }
    }

    unsafe fn handle_with_payload(
        &mut self,
        cmd: c_uint,
        data: *mut c_void,
        sink: &dyn Sink,
        framebuffer: RetroHwGetCurrentFramebufferFn,
    ) -> bool {
        match cmd {
            env::GET_CAN_DUPE => {
                unsafe { *(data as *mut bool) = true };
                true
            }
            env::GET_SYSTEM_DIRECTORY => {
                unsafe { *(data as *mut *const c_char) = self.system_directory.as_ptr() };
                true
            }
            env::GET_SAVE_DIRECTORY => {
                unsafe { *(data as *mut *const c_char) = self.save_directory.as_ptr() };
                true
            }
            env::GET_LANGUAGE => {
                unsafe { *(data as *mut c_uint) = self.language };
                true
            }
            env::GET_PREFERRED_HW_RENDER => {
                unsafe { *(data as *mut c_uint) = ffi::hw_context::OPENGL_CORE };
                true
            }
            env::SET_PIXEL_FORMAT => {
                let raw = unsafe { *(data as *const c_uint) };
                match PixelFormat::from_raw(raw) {
                    Some(format) => {
                        log::debug!("Pixel format set to {format:?}");
                        self.pixel_format = format;
                        true
                    }
                    None => {
                        log::warn!("{}", ModuleError::UnsupportedPixelFormat(raw));
                        false
                    }
                }
            }
            env::SET_INPUT_DESCRIPTORS => {
                unsafe { self.log_input_descriptors(data as *const RetroInputDescriptor) };
                true
            }
            env::GET_VARIABLE => unsafe { self.get_variable(&mut *(data as *mut RetroVariable)) },
            env::GET_VARIABLE_UPDATE => {
                unsafe { *(data as *mut bool) = false };
                true
            }
            env::SET_VARIABLES => {
                unsafe { self.set_variables(data as *const RetroVariable) };
                true
            }
            env::SET_FRAME_TIME_CALLBACK => {
                let callback = unsafe { *(data as *const RetroFrameTimeCallback) };
                self.frame_time = callback.callback.is_some().then_some(callback);
                true
            }
            env::SET_AUDIO_CALLBACK => {
                let callback = unsafe { *(data as *const RetroAudioCallback) };
                self.audio = callback.callback.is_some().then_some(callback);
                true
            }
            env::SET_HW_RENDER => unsafe {
                self.set_hw_render(&mut *(data as *mut RetroHwRenderCallback), sink, framebuffer)
            },
            _ => {
                log::warn!("Unhandled environment command {cmd}");
                false
            }
        }
    }

    unsafe fn get_variable(&self, variable: &mut RetroVariable) -> bool {
        let Some(key) = (unsafe { text(variable.key) }) else {
            return false;
        };
        match self.variables.get(&key) {
            Some(value) => {
                variable.value = value.as_ptr();
                true
            }
            None => {
                variable.value = std::ptr::null();
                false
            }
        }
    }

    unsafe fn set_variables(&mut self, mut entry: *const RetroVariable) {
        loop {
            let variable = unsafe { *entry };
            let Some(key) = (unsafe { text(variable.key) }) else {
                break;
            };
            let declaration = unsafe { text(variable.value) }.unwrap_or_default();
            let value = match self.overrides.get(&key) {
                Some(user) => user.clone(),
                None => default_option(&declaration).to_string(),
            };
            log::debug!("Core variable {key} = {value}");
            self.variables
                .insert(key, CString::new(value).unwrap_or_default());
            entry = unsafe { entry.add(1) };
        }
    }

    unsafe fn log_input_descriptors(&self, mut entry: *const RetroInputDescriptor) {
        loop {
            let descriptor = unsafe { *entry };
            let Some(description) = (unsafe { text(descriptor.description) }) else {
                break;
            };
            log::debug!(
                "Input port {} device {} index {} id {}: {description}",
                descriptor.port,
                descriptor.device,
                descriptor.index,
                descriptor.id
            );
            entry = unsafe { entry.add(1) };
        }
    }

    fn set_hw_render(
        &mut self,
        callback: &mut RetroHwRenderCallback,
        sink: &dyn Sink,
        framebuffer: RetroHwGetCurrentFramebufferFn,
    ) -> bool {
        let request = HwRenderRequest {
            context_type: callback.context_type,
            version_major: callback.version_major,
            version_minor: callback.version_minor,
            depth: callback.depth,
            stencil: callback.stencil,
            bottom_left_origin: callback.bottom_left_origin,
        };

        let Some(get_proc_address) = sink.hw_render(&request) else {
            let error = ModuleError::UnsupportedHwContext {
                context_type: request.context_type,
                major: request.version_major,
                minor: request.version_minor,
            };
            log::error!("{error}");
            self.fatal = Some(error);
            return false;
        };

        callback.get_current_framebuffer = Some(framebuffer);
        callback.get_proc_address = Some(get_proc_address);
        self.hw_render = Some(HwRender {
            request,
            context_reset: callback.context_reset,
            context_destroy: callback.context_destroy,
        });
        log::info!(
            "Hardware context {} v{}.{} negotiated",
            request.context_type,
            request.version_major,
            request.version_minor
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retroplex_core::ffi::{RetroProcAddressFn, SystemAvInfo};
    use retroplex_core::VideoFrame;

    struct TestSink {
        hw: bool,
    }

    unsafe extern "C" fn no_proc(_: *const c_char) -> Option<RetroProcAddressFn> {
        None
    }

    unsafe extern "C" fn framebuffer() -> usize {
        3
    }

    impl Sink for TestSink {
        fn is_valid(&self) -> bool {
            true
        }
        fn prepare(&self, _: &SystemAvInfo) -> bool {
            true
        }
        fn video_frame(&self, _: VideoFrame<'_>) {}
        fn queue_audio(&self, samples: &[i16]) -> usize {
            samples.len() / 2
        }
        fn hw_render(&self, _: &HwRenderRequest) -> Option<ffi::RetroHwGetProcAddressFn> {
            self.hw.then_some(no_proc as ffi::RetroHwGetProcAddressFn)
        }
    }

    fn environment(settings: &[(&str, &str)]) -> CoreEnvironment {
        let config = RuntimeConfig {
            settings: settings
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..RuntimeConfig::default()
        };
        CoreEnvironment::new(&config)
    }

    fn send(env: &mut CoreEnvironment, cmd: c_uint, data: *mut c_void) -> bool {
        unsafe { env.handle(cmd, data, &TestSink { hw: false }, framebuffer) }
    }

    #[test]
    fn default_option_takes_first_choice() {
        assert_eq!(default_option("Overclock; disabled|enabled"), "disabled");
        assert_eq!(default_option("Region; auto"), "auto");
        assert_eq!(default_option("a|b"), "a");
    }

    #[test]
    fn variables_use_defaults_unless_overridden() {
        // ARRANGE
        let mut env = environment(&[("core_region", "pal")]);
        let k1 = CString::new("core_overclock").unwrap();
        let v1 = CString::new("Overclock; disabled|enabled").unwrap();
        let k2 = CString::new("core_region").unwrap();
        let v2 = CString::new("Region; auto|ntsc|pal").unwrap();
        let mut declarations = [
            RetroVariable { key: k1.as_ptr(), value: v1.as_ptr() },
            RetroVariable { key: k2.as_ptr(), value: v2.as_ptr() },
            RetroVariable { key: std::ptr::null(), value: std::ptr::null() },
        ];

        // ACT
        assert!(send(&mut env, env::SET_VARIABLES, declarations.as_mut_ptr().cast()));

        // ASSERT
        assert_eq!(env.variable("core_overclock"), Some("disabled"));
        assert_eq!(env.variable("core_region"), Some("pal"), "User settings must win");

        let mut query = RetroVariable { key: k2.as_ptr(), value: std::ptr::null() };
        assert!(send(&mut env, env::GET_VARIABLE, (&mut query as *mut RetroVariable).cast()));
        let value = unsafe { CStr::from_ptr(query.value) };
        assert_eq!(value.to_str().unwrap(), "pal");

        let unknown_key = CString::new("nope").unwrap();
        let mut unknown = RetroVariable { key: unknown_key.as_ptr(), value: v1.as_ptr() };
        assert!(!send(&mut env, env::GET_VARIABLE, (&mut unknown as *mut RetroVariable).cast()));
        assert!(unknown.value.is_null());
    }

    #[test]
    fn pixel_format_accepts_known_values_only() {
        let mut env = environment(&[]);
        let mut format: c_uint = ffi::pixel_format::XRGB8888;
        assert!(send(&mut env, env::SET_PIXEL_FORMAT, (&mut format as *mut c_uint).cast()));
        assert_eq!(env.pixel_format(), PixelFormat::Xrgb8888);

        let mut bogus: c_uint = 9;
        assert!(!send(&mut env, env::SET_PIXEL_FORMAT, (&mut bogus as *mut c_uint).cast()));
        assert_eq!(env.pixel_format(), PixelFormat::Xrgb8888);
    }

    #[test]
    fn queries_fill_their_payloads() {
        let mut env = environment(&[]);

        let mut can_dupe = false;
        assert!(send(&mut env, env::GET_CAN_DUPE, (&mut can_dupe as *mut bool).cast()));
        assert!(can_dupe);

        let mut updated = true;
        assert!(send(&mut env, env::GET_VARIABLE_UPDATE, (&mut updated as *mut bool).cast()));
        assert!(!updated);

        let mut language: c_uint = 99;
        assert!(send(&mut env, env::GET_LANGUAGE, (&mut language as *mut c_uint).cast()));
        assert_eq!(language, ffi::language::ENGLISH);

        let mut dir: *const c_char = std::ptr::null();
        assert!(send(&mut env, env::GET_SAVE_DIRECTORY, (&mut dir as *mut *const c_char).cast()));
        let expected = RuntimeConfig::default().save_directory;
        assert_eq!(
            unsafe { CStr::from_ptr(dir) }.to_str().unwrap(),
            expected.to_str().unwrap()
        );

        let mut preferred: c_uint = 0;
        assert!(send(
            &mut env,
            env::GET_PREFERRED_HW_RENDER,
            (&mut preferred as *mut c_uint).cast()
        ));
        assert_eq!(preferred, ffi::hw_context::OPENGL_CORE);
    }

    #[test]
    fn unknown_and_declined_commands_return_false() {
        let mut env = environment(&[]);
        let mut dummy = 0u64;
        assert!(!send(&mut env, 9999, (&mut dummy as *mut u64).cast()));
        assert!(!send(&mut env, env::GET_LOG_INTERFACE, (&mut dummy as *mut u64).cast()));
        assert!(!send(&mut env, env::GET_LANGUAGE, std::ptr::null_mut()));
    }

    #[test]
    fn shutdown_is_recorded() {
        let mut env = environment(&[]);
        assert!(send(&mut env, env::SHUTDOWN, std::ptr::null_mut()));
        assert!(env.shutdown_requested());
    }

    fn hw_callback() -> RetroHwRenderCallback {
        RetroHwRenderCallback {
            context_type: ffi::hw_context::OPENGL_CORE,
            context_reset: None,
            get_current_framebuffer: None,
            get_proc_address: None,
            depth: true,
            stencil: false,
            bottom_left_origin: true,
            version_major: 3,
            version_minor: 3,
            cache_context: false,
            context_destroy: None,
            debug_context: false,
        }
    }

    #[test]
    fn hw_render_is_fatal_without_sink_support() {
        let mut env = environment(&[]);
        let mut callback = hw_callback();

        let accepted = unsafe {
            env.handle(
                env::SET_HW_RENDER,
                (&mut callback as *mut RetroHwRenderCallback).cast(),
                &TestSink { hw: false },
                framebuffer,
            )
        };

        assert!(!accepted);
        assert!(matches!(
            env.take_fatal(),
            Some(ModuleError::UnsupportedHwContext { major: 3, minor: 3, .. })
        ));
        assert!(env.hw_render().is_none());
    }

    #[test]
    fn hw_render_negotiated_through_sink() {
        let mut env = environment(&[]);
        let mut callback = hw_callback();

        let accepted = unsafe {
            env.handle(
                env::SET_HW_RENDER,
                (&mut callback as *mut RetroHwRenderCallback).cast(),
                &TestSink { hw: true },
                framebuffer,
            )
        };

        assert!(accepted);
        assert!(env.take_fatal().is_none());
        let fb = callback.get_current_framebuffer.expect("framebuffer getter installed");
        assert_eq!(unsafe { fb() }, 3);
        assert!(callback.get_proc_address.is_some());
        assert!(env.hw_render().unwrap().request.bottom_left_origin);
    }
}
