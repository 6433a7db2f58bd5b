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

//! Shared fixtures: a scriptable module, its loader, and a recording sink.
//!
//! The mock module talks to the host exclusively through the `CallbackTable`
//! it is handed, so every call goes through the real slot trampolines.

#![allow(dead_code)]

use retroplex_core::ffi::{
    self, env, GameGeometry, RetroFrameTimeCallback, RetroHwRenderCallback, RetroUsec,
    RetroVariable, SystemAvInfo, SystemTiming,
};
use retroplex_core::{
    CallbackTable, FrameData, GameContent, MemoryRegion, ModuleError, ModuleLoader, PixelFormat,
    RetroModule, Sink, SystemInfo, VideoFrame,
};
use retroplex_runtime::{
    InstanceAllocator, OrderedIoChain, RuntimeEvent, RuntimeServices, StopReason,
};
use std::ffi::{c_void, CStr, CString};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const TIMEOUT: Duration = Duration::from_secs(10);
pub const SRAM_SIZE: usize = 8;

/// Frame-time deltas reported through [`record_frame_time`].
pub static FRAME_TIMES: Mutex<Vec<RetroUsec>> = Mutex::new(Vec::new());

unsafe extern "C" fn record_frame_time(usec: RetroUsec) {
    FRAME_TIMES.lock().unwrap().push(usec);
}

/// What a mock module does.
#[derive(Debug, Clone)]
pub struct MockBehaviour {
    pub fps: f64,
    pub reject_content: bool,
    pub request_hw: bool,
    pub shutdown_after: Option<u64>,
    pub frame_time_reference: Option<RetroUsec>,
}

impl Default for MockBehaviour {
    fn default() -> Self {
        Self {
            fps: 600.0,
            reject_content: false,
            request_hw: false,
            shutdown_after: None,
            frame_time_reference: None,
        }
    }
}

/// What every module created by one loader observed.
#[derive(Debug, Default)]
pub struct Recorder {
    pub frames: AtomicU64,
    pub inits: AtomicUsize,
    pub deinits: AtomicUsize,
    pub unloads: AtomicUsize,
    pub resets: AtomicUsize,
    pub last_input: Mutex<Option<i16>>,
    pub variable: Mutex<Option<String>>,
    pub unserialized: Mutex<Option<Vec<u8>>>,
    pub loaded_paths: Mutex<Vec<PathBuf>>,
}

impl Recorder {
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }
}

pub struct MockModule {
    behaviour: MockBehaviour,
    recorder: Arc<Recorder>,
    table: Option<CallbackTable>,
    name: CString,
    sram: Vec<u8>,
    state: Vec<u8>,
    frames: u64,
}

impl MockModule {
    fn env(&self, cmd: u32, data: *mut c_void) -> bool {
        match &self.table {
            Some(table) => unsafe { (table.environment)(cmd, data) },
            None => false,
        }
    }
}

impl RetroModule for MockModule {
    fn api_version(&self) -> u32 {
        ffi::RETRO_API_VERSION
    }

    fn set_callbacks(&mut self, callbacks: &CallbackTable) {
        self.table = Some(*callbacks);

        let key = CString::new("mock_speed").unwrap();
        let declaration = CString::new("Speed; normal|fast|turbo").unwrap();
        let mut variables = [
            RetroVariable {
                key: key.as_ptr(),
                value: declaration.as_ptr(),
            },
            RetroVariable {
                key: std::ptr::null(),
                value: std::ptr::null(),
            },
        ];
        self.env(env::SET_VARIABLES, variables.as_mut_ptr().cast());

        let mut format = ffi::pixel_format::XRGB8888;
        self.env(env::SET_PIXEL_FORMAT, (&mut format as *mut u32).cast());

        if let Some(reference) = self.behaviour.frame_time_reference {
            let mut callback = RetroFrameTimeCallback {
                callback: Some(record_frame_time),
                reference,
            };
            self.env(
                env::SET_FRAME_TIME_CALLBACK,
                (&mut callback as *mut RetroFrameTimeCallback).cast(),
            );
        }

        if self.behaviour.request_hw {
            let mut hw = RetroHwRenderCallback {
                context_type: ffi::hw_context::OPENGL_CORE,
                context_reset: None,
                get_current_framebuffer: None,
                get_proc_address: None,
                depth: true,
                stencil: true,
                bottom_left_origin: true,
                version_major: 3,
                version_minor: 3,
                cache_context: false,
                context_destroy: None,
                debug_context: false,
            };
            self.env(env::SET_HW_RENDER, (&mut hw as *mut RetroHwRenderCallback).cast());
        }
    }

    fn init(&mut self) {
        self.recorder.inits.fetch_add(1, Ordering::SeqCst);
    }

    fn deinit(&mut self) {
        self.recorder.deinits.fetch_add(1, Ordering::SeqCst);
    }

    fn system_info(&self) -> SystemInfo {
        SystemInfo {
            library_name: self.name.to_string_lossy().into_owned(),
            library_version: "1.0".to_string(),
            valid_extensions: "bin".to_string(),
            need_fullpath: false,
            block_extract: false,
        }
    }

    fn system_av_info(&self) -> SystemAvInfo {
        SystemAvInfo {
            geometry: GameGeometry {
                base_width: 4,
                base_height: 2,
                max_width: 4,
                max_height: 2,
                aspect_ratio: 2.0,
            },
            timing: SystemTiming {
                fps: self.behaviour.fps,
                sample_rate: 48_000.0,
            },
        }
    }

    fn set_controller_port_device(&mut self, _port: u32, _device: u32) {}

    fn reset(&mut self) {
        self.recorder.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn run(&mut self) {
        self.frames += 1;
        self.recorder.frames.fetch_add(1, Ordering::SeqCst);

        let Some(table) = self.table else {
            return;
        };
        unsafe {
            (table.input_poll)();
            let pressed = (table.input_state)(0, ffi::device::JOYPAD, 0, 0);
            *self.recorder.last_input.lock().unwrap() = Some(pressed);

            let pixels = [0u8; 16 * 2];
            (table.video_refresh)(pixels.as_ptr().cast(), 4, 2, 16);

            let samples = [0i16; 8];
            (table.audio_sample_batch)(samples.as_ptr(), 4);
        }

        if self.behaviour.shutdown_after == Some(self.frames) {
            self.env(env::SHUTDOWN, std::ptr::null_mut());
        }
    }

    fn load_game(&mut self, content: &GameContent) -> bool {
        if self.behaviour.reject_content {
            return false;
        }
        self.state = content.data().unwrap_or_default().to_vec();

        let key = CString::new("mock_speed").unwrap();
        let mut query = RetroVariable {
            key: key.as_ptr(),
            value: std::ptr::null(),
        };
        if self.env(env::GET_VARIABLE, (&mut query as *mut RetroVariable).cast()) {
            let value = unsafe { CStr::from_ptr(query.value) };
            *self.recorder.variable.lock().unwrap() = Some(value.to_string_lossy().into_owned());
        }
        true
    }

    fn unload_game(&mut self) {
        self.recorder.unloads.fetch_add(1, Ordering::SeqCst);
    }

    fn memory(&mut self, region: MemoryRegion) -> Option<&mut [u8]> {
        match region {
            MemoryRegion::SaveRam => Some(&mut self.sram[..]),
            _ => None,
        }
    }

    fn serialize_size(&self) -> usize {
        self.state.len()
    }

    fn serialize(&mut self, buffer: &mut [u8]) -> bool {
        if buffer.len() < self.state.len() {
            return false;
        }
        buffer[..self.state.len()].copy_from_slice(&self.state);
        true
    }

    fn unserialize(&mut self, buffer: &[u8]) -> bool {
        self.state = buffer.to_vec();
        *self.recorder.unserialized.lock().unwrap() = Some(buffer.to_vec());
        true
    }
}

/// Creates [`MockModule`]s, recording every path it was asked to load.
pub struct MockLoader {
    pub behaviour: MockBehaviour,
    pub recorder: Arc<Recorder>,
}

impl MockLoader {
    pub fn new(behaviour: MockBehaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            recorder: Arc::new(Recorder::default()),
        })
    }
}

impl ModuleLoader for MockLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn RetroModule>, ModuleError> {
        if !path.is_file() {
            return Err(ModuleError::Load {
                path: path.to_path_buf(),
                reason: "no such file".to_string(),
            });
        }
        self.recorder.loaded_paths.lock().unwrap().push(path.to_path_buf());
        Ok(Box::new(MockModule {
            behaviour: self.behaviour.clone(),
            recorder: Arc::clone(&self.recorder),
            table: None,
            name: CString::new("MockCore").unwrap(),
            sram: vec![0; SRAM_SIZE],
            state: Vec::new(),
            frames: 0,
        }))
    }
}

/// A sink that records what it receives.
#[derive(Debug)]
pub struct TestSink {
    valid: AtomicBool,
    accept_prepare: bool,
    pub prepared: AtomicBool,
    pub frames: AtomicUsize,
    pub audio_frames: AtomicUsize,
    pub releases: AtomicUsize,
    pub last_frame: Mutex<Option<(u32, u32, usize, PixelFormat, usize)>>,
}

impl TestSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::with_prepare(true))
    }

    /// A sink whose presentation resources can never be created.
    pub fn rejecting() -> Arc<Self> {
        Arc::new(Self::with_prepare(false))
    }

    fn with_prepare(accept_prepare: bool) -> Self {
        Self {
            valid: AtomicBool::new(true),
            accept_prepare,
            prepared: AtomicBool::new(false),
            frames: AtomicUsize::new(0),
            audio_frames: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            last_frame: Mutex::new(None),
        }
    }

    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::SeqCst);
    }
}

impl Sink for TestSink {
    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    fn prepare(&self, _av_info: &SystemAvInfo) -> bool {
        self.prepared.store(self.accept_prepare, Ordering::SeqCst);
        self.accept_prepare
    }

    fn video_frame(&self, frame: VideoFrame<'_>) {
        self.frames.fetch_add(1, Ordering::SeqCst);
        let len = match frame.data {
            FrameData::Software(bytes) => bytes.len(),
            FrameData::Hardware | FrameData::Duplicate => 0,
        };
        *self.last_frame.lock().unwrap() =
            Some((frame.width, frame.height, frame.pitch, frame.format, len));
    }

    fn queue_audio(&self, samples: &[i16]) -> usize {
        let frames = samples.len() / 2;
        self.audio_frames.fetch_add(frames, Ordering::SeqCst);
        frames
    }

    fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Services isolated from other tests, plus their event stream.
pub fn services(
    loader: Arc<MockLoader>,
) -> (RuntimeServices, flume::Receiver<RuntimeEvent>) {
    let (tx, rx) = flume::unbounded();
    let services = RuntimeServices::new(loader)
        .with_io(Arc::new(OrderedIoChain::new(2)))
        .with_allocator(Arc::new(InstanceAllocator::default()))
        .with_events(tx);
    (services, rx)
}

/// A temp dir holding a module file and a content file.
pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub module: PathBuf,
    pub content: PathBuf,
}

impl Fixture {
    pub fn new(content: &[u8]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let module = dir.path().join("mock_libretro.so");
        std::fs::write(&module, b"not really a shared library").unwrap();
        let content_path = dir.path().join("game.bin");
        std::fs::write(&content_path, content).unwrap();
        Self {
            dir,
            module,
            content: content_path,
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Writes another content file.
    pub fn content_file(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.path(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }
}

/// Polls `condition` until it holds or [`TIMEOUT`] passes.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}

/// Receives events until the `Stopped` event of runtime `id`.
pub fn stop_reason(events: &flume::Receiver<RuntimeEvent>, id: u64) -> StopReason {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(remaining) {
            Ok(RuntimeEvent::Stopped { id: stopped, reason }) if stopped == id => return reason,
            Ok(_) => continue,
            Err(e) => panic!("no Stopped event for runtime {id}: {e:?}"),
        }
    }
}
