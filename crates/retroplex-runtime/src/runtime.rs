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

//! The core runtime: one thread owning one loaded module.
//!
//! [`CoreRuntime::launch`] validates the request, reserves a slot, instance
//! indices and the battery memory read, then spawns the runtime thread. The
//! thread loads the module, binds its callbacks through the slot, and runs the
//! frame loop until it is asked to stop, loses its sink, or hits a fatal
//! error. Teardown persists battery memory through the I/O chain before any
//! shared resource is released.

use crate::allocator::{prepare_duplicate, remove_duplicate, InstanceAllocator, InstanceLease};
use crate::callbacks::InstanceCallbacks;
use crate::environment::CoreEnvironment;
use crate::event::{RuntimeEvent, StopReason};
use crate::handle::{Control, RuntimeHandle, RuntimeState};
use crate::io_chain::{read_file, write_file, ChainLink, OrderedIoChain};
use crate::pacing::{FramePacer, FrameTimer};
use crate::slot::SlotHandle;
use crate::task_queue::{task_queue, TaskQueue};
use retroplex_core::ffi::{SystemAvInfo, RETRO_API_VERSION};
use retroplex_core::{
    GameContent, InputState, LaunchError, MemoryRegion, ModuleError, ModuleLoader, RetroModule,
    RuntimeConfig, Sink,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

static NEXT_RUNTIME_ID: AtomicU64 = AtomicU64::new(1);

/// Collaborators shared by every runtime of a host.
#[derive(Clone)]
pub struct RuntimeServices {
    /// Resolves module files into [`RetroModule`]s.
    pub loader: Arc<dyn ModuleLoader>,
    /// Orders persistence operations.
    pub io: Arc<OrderedIoChain>,
    /// Hands out instance indices.
    pub allocator: Arc<InstanceAllocator>,
    /// Receives lifecycle events, if set.
    pub events: Option<flume::Sender<RuntimeEvent>>,
}

impl RuntimeServices {
    /// Services backed by the process-wide I/O chain and allocator.
    pub fn new(loader: Arc<dyn ModuleLoader>) -> Self {
        Self {
            loader,
            io: OrderedIoChain::global(),
            allocator: InstanceAllocator::global(),
            events: None,
        }
    }

    /// Publishes lifecycle events to `events`.
    pub fn with_events(mut self, events: flume::Sender<RuntimeEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Uses a dedicated I/O chain.
    pub fn with_io(mut self, io: Arc<OrderedIoChain>) -> Self {
        self.io = io;
        self
    }

    /// Uses a dedicated instance allocator.
    pub fn with_allocator(mut self, allocator: Arc<InstanceAllocator>) -> Self {
        self.allocator = allocator;
        self
    }

    fn publish(&self, event: RuntimeEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

/// Everything needed to start one instance.
pub struct LaunchRequest {
    /// The module file.
    pub module: PathBuf,
    /// The content file or directory.
    pub content: PathBuf,
    /// Battery memory file; defaults to [`RuntimeConfig::sram_path_for`] the content.
    pub sram: Option<PathBuf>,
    /// Start without advancing frames.
    pub paused: bool,
    /// Receives frames and audio.
    pub sink: Arc<dyn Sink>,
    /// Controller state read by the module.
    pub input: Arc<InputState>,
    /// Per-instance settings.
    pub config: RuntimeConfig,
}

impl LaunchRequest {
    /// A request with default configuration and fresh input state.
    pub fn new(module: impl Into<PathBuf>, content: impl Into<PathBuf>, sink: Arc<dyn Sink>) -> Self {
        Self {
            module: module.into(),
            content: content.into(),
            sram: None,
            paused: false,
            sink,
            input: Arc::new(InputState::new()),
            config: RuntimeConfig::default(),
        }
    }

    fn sram_path(&self) -> PathBuf {
        self.sram
            .clone()
            .unwrap_or_else(|| self.config.sram_path_for(&self.content))
    }
}

fn module_identity(module: &Path) -> String {
    std::fs::canonicalize(module)
        .unwrap_or_else(|_| module.to_path_buf())
        .to_string_lossy()
        .into_owned()
}

/// Resources reserved by `launch` and moved onto the runtime thread.
struct PendingRuntime {
    request: LaunchRequest,
    services: RuntimeServices,
    control: Arc<Control>,
    slot: SlotHandle,
    lease: InstanceLease,
    tasks: TaskQueue,
    sram_load: ChainLink,
}

/// The owner of one loaded module. Lives on, and never leaves, its own thread.
pub struct CoreRuntime {
    request: LaunchRequest,
    services: RuntimeServices,
    control: Arc<Control>,
    slot: Option<SlotHandle>,
    lease: Option<InstanceLease>,
    tasks: Option<TaskQueue>,
    duplicate: Option<PathBuf>,
    module: Option<Box<dyn RetroModule>>,
    callbacks: Option<Arc<InstanceCallbacks>>,
    content: Option<GameContent>,
    av_info: SystemAvInfo,
    initialized: bool,
    game_loaded: bool,
    sram_loaded: bool,
    ready: bool,
}

impl CoreRuntime {
    /// Starts an instance on its own thread.
    ///
    /// Fails without allocating anything if the module or content is missing.
    /// The battery memory read is ordered at the time of this call.
    pub fn launch(
        request: LaunchRequest,
        services: &RuntimeServices,
    ) -> Result<RuntimeHandle, LaunchError> {
        if !request.module.is_file() {
            return Err(LaunchError::MissingModule(request.module));
        }
        if !request.content.exists() {
            return Err(LaunchError::MissingContent(request.content));
        }

        let slot = SlotHandle::acquire()?;
        let lease = services
            .allocator
            .lease(&module_identity(&request.module))?;

        let id = NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed);
        let (task_sender, tasks) = task_queue();
        let control = Arc::new(Control::new(
            id,
            request.paused,
            task_sender,
            Arc::clone(&services.io),
            request.sram_path(),
        ));
        let sram_load = services.io.link(control.sram_path());
        let (exit_tx, exit_rx) = crossbeam_channel::bounded::<()>(0);

        log::info!(
            "Launching runtime {id}: module '{}', content '{}', slot {}, instance {:?}",
            request.module.display(),
            request.content.display(),
            slot.index(),
            lease.indices()
        );

        let pending = PendingRuntime {
            request,
            services: services.clone(),
            control: Arc::clone(&control),
            slot,
            lease,
            tasks,
            sram_load,
        };
        thread::Builder::new()
            .name(format!("retroplex-{id}"))
            .spawn(move || {
                let _exit = exit_tx;
                CoreRuntime::run(pending);
            })?;

        Ok(RuntimeHandle::new(control, exit_rx))
    }

    fn run(pending: PendingRuntime) {
        let PendingRuntime {
            request,
            services,
            control,
            slot,
            lease,
            tasks,
            sram_load,
        } = pending;

        let mut runtime = CoreRuntime {
            request,
            services,
            control,
            slot: Some(slot),
            lease: Some(lease),
            tasks: Some(tasks),
            duplicate: None,
            module: None,
            callbacks: None,
            content: None,
            av_info: SystemAvInfo::default(),
            initialized: false,
            game_loaded: false,
            sram_loaded: false,
            ready: false,
        };

        let reason = match runtime.start(sram_load) {
            Ok(()) => runtime.run_loop(),
            Err(reason) => reason,
        };
        runtime.teardown(reason);
    }

    fn start(&mut self, sram_load: ChainLink) -> Result<(), StopReason> {
        self.load_module().map_err(|e| {
            log::error!("Runtime {}: {e}", self.control.id());
            StopReason::Fatal(e.to_string())
        })?;

        let (Some(module), Some(callbacks)) = (self.module.as_deref_mut(), self.callbacks.as_ref())
        else {
            return Err(StopReason::Fatal("module was not loaded".to_string()));
        };
        let sink = &self.request.sink;

        self.av_info = module.system_av_info();
        module.set_controller_port_device(0, self.request.config.controller_device);

        if !sink.is_valid() || !sink.prepare(&self.av_info) {
            log::warn!(
                "Runtime {}: sink unavailable at start-up, stopping",
                self.control.id()
            );
            self.control.request_stop();
            return Err(StopReason::SinkInvalidated);
        }

        let (hw_render, audio, pixel_format) = {
            let environment = callbacks.lock_environment();
            (
                environment.hw_render(),
                environment.audio_callback(),
                environment.pixel_format(),
            )
        };
        if let Some(reset) = hw_render.and_then(|hw| hw.context_reset) {
            unsafe { reset() };
        }
        if let Some(set_state) = audio.and_then(|a| a.set_state) {
            unsafe { set_state(true) };
        }

        self.sram_loaded = load_sram(module, sram_load);
        self.ready = true;

        let system_info = module.system_info();
        log::info!(
            "Runtime {} ready: {} {} at {}x{}, {:.2} fps",
            self.control.id(),
            system_info.library_name,
            system_info.library_version,
            self.av_info.geometry.base_width,
            self.av_info.geometry.base_height,
            self.av_info.timing.fps
        );
        self.services.publish(RuntimeEvent::Ready {
            id: self.control.id(),
            system_info,
            av_info: self.av_info,
            pixel_format,
            hw_rendered: hw_render.is_some(),
            bottom_left_origin: hw_render.is_some_and(|hw| hw.request.bottom_left_origin),
        });
        Ok(())
    }

    /// Loads the module, registers the slot's callbacks and loads the content.
    fn load_module(&mut self) -> Result<(), ModuleError> {
        self.control.set_state(RuntimeState::Initializing);

        let (Some(slot), Some(lease)) = (self.slot.as_ref(), self.lease.as_ref()) else {
            return Err(ModuleError::Load {
                path: self.request.module.clone(),
                reason: "runtime resources were released".to_string(),
            });
        };

        let indices = lease.indices();
        let module_path = prepare_duplicate(&self.request.module, indices.identity)?;
        if indices.identity > 0 {
            self.duplicate = Some(module_path.clone());
        }

        let module = self.services.loader.load(&module_path)?;
        if module.api_version() != RETRO_API_VERSION {
            log::warn!(
                "Module '{}' reports API version {}, expected {}",
                module_path.display(),
                module.api_version(),
                RETRO_API_VERSION
            );
        }

        let table = slot.callbacks();
        let callbacks = Arc::new(InstanceCallbacks::new(
            Arc::clone(&self.request.sink),
            Arc::clone(&self.request.input),
            Arc::clone(&self.control),
            CoreEnvironment::new(&self.request.config),
            table,
        ));
        slot.bind(callbacks.clone());
        self.callbacks = Some(Arc::clone(&callbacks));

        let module = self.module.insert(module);
        module.set_callbacks(&table);
        module.init();
        self.initialized = true;

        self.control.set_state(RuntimeState::Loading);
        let system_info = module.system_info();
        let content = GameContent::prepare(&self.request.content, system_info.need_fullpath)?;
        if !module.load_game(&content) {
            return Err(ModuleError::ContentRejected(self.request.content.clone()));
        }
        self.game_loaded = true;
        self.content = Some(content);

        let fatal = callbacks.lock_environment().take_fatal();
        match fatal {
            Some(fatal) => Err(fatal),
            None => Ok(()),
        }
    }

    fn run_loop(&mut self) -> StopReason {
        let (Some(module), Some(callbacks), Some(tasks)) = (
            self.module.as_deref_mut(),
            self.callbacks.as_ref(),
            self.tasks.as_ref(),
        ) else {
            return StopReason::Fatal("runtime started without a module".to_string());
        };
        let control = &self.control;
        let sink = &self.request.sink;
        let clock = Arc::clone(&self.request.config.clock);

        let mut pacer = FramePacer::new(
            self.av_info.timing.fps,
            self.request.config.fallback_fps,
            clock.now(),
        );
        let mut frame_timer: Option<FrameTimer> = None;

        while control.is_running() {
            let paused = control.is_paused();
            control.set_state(if paused {
                RuntimeState::Paused
            } else {
                RuntimeState::Running
            });

            // 1. Tasks queued before this point.
            tasks.drain(module);

            // 2. Sink.
            if !sink.is_valid() {
                log::info!("Runtime {}: sink invalidated", control.id());
                control.request_stop();
                return StopReason::SinkInvalidated;
            }

            // 3-4. Optional module callbacks.
            let (frame_time, audio) = {
                let environment = callbacks.lock_environment();
                (environment.frame_time_callback(), environment.audio_callback())
            };
            if let Some(frame_time) = frame_time {
                let timer = frame_timer.get_or_insert_with(|| FrameTimer::new(frame_time.reference));
                let usec = timer.tick(clock.now());
                if let Some(callback) = frame_time.callback {
                    unsafe { callback(usec) };
                }
            }
            if let Some(pump) = audio.and_then(|a| a.callback) {
                unsafe { pump() };
            }

            // 5. Frame.
            if !paused {
                module.run();
            }

            if let Some(fatal) = callbacks.lock_environment().take_fatal() {
                log::error!("Runtime {}: {fatal}", control.id());
                control.request_stop();
                return StopReason::Fatal(fatal.to_string());
            }

            // 6. Pacing.
            clock.sleep(pacer.frame_completed(clock.now()));
        }

        if callbacks.lock_environment().shutdown_requested() {
            StopReason::ModuleShutdown
        } else {
            StopReason::Requested
        }
    }

    fn teardown(mut self, reason: StopReason) {
        let id = self.control.id();
        self.control.request_stop();
        self.control.set_state(RuntimeState::Stopping);

        // Tasks queued before teardown began still run; the rest are dropped,
        // which also releases any persistence waiting on them.
        if let Some(tasks) = self.tasks.take() {
            if let (true, Some(module)) = (self.ready, self.module.as_deref_mut()) {
                tasks.drain(module);
            }
            let dropped = tasks.close();
            if dropped > 0 {
                log::warn!("Runtime {id}: dropped {dropped} pending tasks");
            }
        }

        self.persist_sram();

        if let Some(mut module) = self.module.take() {
            let hw_render = self
                .callbacks
                .as_ref()
                .and_then(|callbacks| callbacks.lock_environment().hw_render());
            if let Some(destroy) = hw_render.and_then(|hw| hw.context_destroy) {
                unsafe { destroy() };
            }
            if self.game_loaded {
                module.unload_game();
            }
            if self.initialized {
                module.deinit();
            }
        }
        self.content = None;

        self.request.sink.release();

        if let Some(slot) = self.slot.take() {
            slot.release();
        }
        self.callbacks = None;

        if let Some(duplicate) = self.duplicate.take() {
            remove_duplicate(&duplicate);
        }
        self.lease = None;

        self.control.set_state(RuntimeState::Unloaded);
        log::info!("Runtime {id} stopped: {reason}");
        self.services
            .publish(RuntimeEvent::Stopped { id, reason });
    }

    fn persist_sram(&mut self) {
        let link = self.control.take_persist_link();
        if !self.sram_loaded {
            return;
        }
        let Some(module) = self.module.as_deref_mut() else {
            return;
        };
        let Some(bytes) = module
            .memory(MemoryRegion::SaveRam)
            .filter(|region| !region.is_empty())
            .map(|region| region.to_vec())
        else {
            return;
        };

        match link.run(|path| write_file(path, &bytes)) {
            Ok(()) => log::info!(
                "Runtime {}: saved {} bytes of battery memory to '{}'",
                self.control.id(),
                bytes.len(),
                self.control.sram_path().display()
            ),
            Err(e) => log::error!("Runtime {}: {e}", self.control.id()),
        }
    }
}

/// Reads battery memory through `link` into the module's save RAM.
///
/// Returns false if the file exists but could not be read, in which case
/// nothing must be persisted over it.
fn load_sram(module: &mut dyn RetroModule, link: ChainLink) -> bool {
    let path = link.path().to_path_buf();
    match link.run(read_file) {
        Ok(Some(bytes)) => {
            match module.memory(MemoryRegion::SaveRam) {
                Some(region) => {
                    if region.len() != bytes.len() {
                        log::warn!(
                            "Battery memory '{}' is {} bytes, module has {}",
                            path.display(),
                            bytes.len(),
                            region.len()
                        );
                    }
                    let len = region.len().min(bytes.len());
                    region[..len].copy_from_slice(&bytes[..len]);
                    log::info!("Loaded {len} bytes of battery memory from '{}'", path.display());
                }
                None => log::warn!(
                    "Module has no save RAM; ignoring '{}'",
                    path.display()
                ),
            }
            true
        }
        Ok(None) => {
            log::debug!("No battery memory at '{}'", path.display());
            true
        }
        Err(e) => {
            log::error!("{e}; battery memory will not be saved this session");
            false
        }
    }
}
