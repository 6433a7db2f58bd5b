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

//! The thread-safe observer of a running instance.

use crate::io_chain::{ChainLink, IoTicket, OrderedIoChain};
use crate::task_queue::{Task, TaskSender};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use retroplex_core::{PersistError, RetroModule};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Lifecycle of a core runtime. States only move forward, except
/// `Running` and `Paused` which alternate.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RuntimeState {
    /// Launch accepted, thread not yet started.
    Created = 0,
    /// Resolving the module and registering callbacks.
    Initializing = 1,
    /// Loading content and waiting for the sink.
    Loading = 2,
    /// Advancing frames.
    Running = 3,
    /// Draining tasks and pacing, without advancing frames.
    Paused = 4,
    /// Tearing down.
    Stopping = 5,
    /// Everything released. Terminal.
    Unloaded = 6,
}

impl RuntimeState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RuntimeState::Created,
            1 => RuntimeState::Initializing,
            2 => RuntimeState::Loading,
            3 => RuntimeState::Running,
            4 => RuntimeState::Paused,
            5 => RuntimeState::Stopping,
            _ => RuntimeState::Unloaded,
        }
    }
}

enum PersistLink {
    Open(Option<ChainLink>),
    Closed,
}

/// State shared between a runtime thread and its handles.
pub(crate) struct Control {
    id: u64,
    state: AtomicU8,
    running: AtomicBool,
    paused: AtomicBool,
    tasks: TaskSender,
    io: Arc<OrderedIoChain>,
    sram_path: PathBuf,
    persist: Mutex<PersistLink>,
}

impl Control {
    pub(crate) fn new(
        id: u64,
        paused: bool,
        tasks: TaskSender,
        io: Arc<OrderedIoChain>,
        sram_path: PathBuf,
    ) -> Self {
        Self {
            id,
            state: AtomicU8::new(RuntimeState::Created as u8),
            running: AtomicBool::new(true),
            paused: AtomicBool::new(paused),
            tasks,
            io,
            sram_path,
            persist: Mutex::new(PersistLink::Open(None)),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn io(&self) -> &Arc<OrderedIoChain> {
        &self.io
    }

    pub(crate) fn sram_path(&self) -> &Path {
        &self.sram_path
    }

    pub(crate) fn state(&self) -> RuntimeState {
        RuntimeState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_state(&self, next: RuntimeState) {
        let previous = RuntimeState::from_u8(self.state.swap(next as u8, Ordering::SeqCst));
        if previous != next {
            log::debug!("Runtime {}: {:?} -> {:?}", self.id, previous, next);
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Clears the run flag. Returns true if this call cleared it.
    pub(crate) fn request_stop(&self) -> bool {
        self.running.swap(false, Ordering::SeqCst)
    }

    /// Clears the run flag and, if this call cleared it, reserves the battery
    /// memory write in the caller's program order.
    fn request_shutdown(&self) {
        let mut persist = self.persist.lock().unwrap_or_else(PoisonError::into_inner);
        if self.request_stop() {
            if let PersistLink::Open(slot) = &mut *persist {
                if slot.is_none() {
                    *slot = Some(self.io.link(&self.sram_path));
                }
            }
        }
    }

    /// Hands the reserved battery memory link to teardown, reserving one now if
    /// no shutdown request did. Later shutdown requests reserve nothing.
    pub(crate) fn take_persist_link(&self) -> ChainLink {
        let mut persist = self.persist.lock().unwrap_or_else(PoisonError::into_inner);
        match std::mem::replace(&mut *persist, PersistLink::Closed) {
            PersistLink::Open(Some(link)) => link,
            _ => self.io.link(&self.sram_path),
        }
    }

    pub(crate) fn enqueue(&self, task: Task) -> bool {
        if self.state() >= RuntimeState::Stopping {
            return false;
        }
        self.tasks.enqueue(task)
    }
}

/// A cheap, cloneable reference to a running instance.
///
/// The instance itself is owned by its thread; dropping every handle does not
/// stop it.
#[derive(Clone)]
pub struct RuntimeHandle {
    control: Arc<Control>,
    exit: Receiver<()>,
}

impl RuntimeHandle {
    pub(crate) fn new(control: Arc<Control>, exit: Receiver<()>) -> Self {
        Self { control, exit }
    }

    /// Process-unique id of the instance.
    pub fn id(&self) -> u64 {
        self.control.id()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RuntimeState {
        self.control.state()
    }

    /// Where battery-backed memory is loaded from and persisted to.
    pub fn sram_path(&self) -> &Path {
        self.control.sram_path()
    }

    /// Requests a stop. Returns immediately; teardown happens on the runtime
    /// thread after its current iteration.
    ///
    /// The battery memory write is ordered after every persistence operation
    /// scheduled before this call.
    pub fn shutdown(&self) {
        self.control.request_shutdown();
    }

    /// Queues a task for the runtime thread.
    ///
    /// Returns false, dropping the task, if the runtime is already tearing down.
    /// A true result does not guarantee execution: a task that has not run when
    /// teardown begins is dropped.
    pub fn enqueue_task(&self, task: Task) -> bool {
        self.control.enqueue(task)
    }

    /// Stops or resumes frame advance. Tasks and pacing keep running while paused.
    pub fn set_paused(&self, paused: bool) {
        self.control.paused.store(paused, Ordering::SeqCst);
    }

    /// Whether frame advance is paused.
    pub fn is_paused(&self) -> bool {
        self.control.is_paused()
    }

    /// Queues a module reset.
    pub fn reset(&self) -> bool {
        self.enqueue_task(Box::new(|module| {
            module.reset();
            Ok(())
        }))
    }

    /// Serializes the module state and writes it to `path`.
    ///
    /// The write is ordered with every other persistence operation on `path`.
    pub fn save_state(&self, path: &Path) -> IoTicket<()> {
        self.control.io().schedule(|s| {
            let (pending, ticket) = s.write_when_ready(path);
            let target = path.to_path_buf();
            let queued = self.enqueue_task(Box::new(move |module| {
                let size = module.serialize_size();
                let mut buffer = vec![0u8; size];
                if size == 0 || !module.serialize(&mut buffer) {
                    pending.reject("the module could not serialize its state");
                    anyhow::bail!("failed to serialize state for '{}'", target.display());
                }
                log::debug!("Serialized {size} bytes of state for '{}'", target.display());
                pending.fulfil(buffer);
                Ok(())
            }));
            if !queued {
                log::warn!(
                    "Runtime {} is stopping; state save to '{}' dropped",
                    self.id(),
                    path.display()
                );
            }
            ticket
        })
    }

    /// Reads `path` and restores the module state from it.
    ///
    /// The read is ordered with every other persistence operation on `path`. A
    /// size mismatch is logged and the load proceeds.
    pub fn load_state(&self, path: &Path) -> IoTicket<()> {
        let control = Arc::clone(&self.control);
        self.control.io().schedule(|s| {
            let read = s.read(path);
            let (done, ticket) = IoTicket::pair();
            let source = path.to_path_buf();
            let queued = self.enqueue_task(Box::new(move |module| {
                // Once stopping, the battery memory write may sit ahead of this
                // read in the chain and is only released after this task.
                if !control.is_running() {
                    let _ = done.send(Err(PersistError::Dropped));
                    anyhow::bail!(
                        "runtime is stopping; state load from '{}' abandoned",
                        source.display()
                    );
                }
                let result = restore_state(module, &source, read.wait());
                let failure = result.as_ref().err().map(ToString::to_string);
                let _ = done.send(result);
                match failure {
                    Some(reason) => anyhow::bail!(reason),
                    None => Ok(()),
                }
            }));
            if !queued {
                log::warn!(
                    "Runtime {} is stopping; state load from '{}' dropped",
                    self.id(),
                    path.display()
                );
            }
            ticket
        })
    }

    /// Blocks until the runtime thread has exited, or `timeout` elapses.
    /// Returns true if the thread has exited.
    pub fn wait_for_exit(&self, timeout: Option<Duration>) -> bool {
        match timeout {
            None => {
                let _ = self.exit.recv();
                true
            }
            Some(timeout) => !matches!(
                self.exit.recv_timeout(timeout),
                Err(RecvTimeoutError::Timeout)
            ),
        }
    }
}

fn restore_state(
    module: &mut dyn RetroModule,
    path: &Path,
    read: Result<Option<Vec<u8>>, PersistError>,
) -> Result<(), PersistError> {
    let bytes = read?.ok_or_else(|| PersistError::NotFound(path.to_path_buf()))?;
    let expected = module.serialize_size();
    if bytes.len() != expected {
        log::warn!(
            "State '{}' is {} bytes but the module expects {expected}; loading anyway",
            path.display(),
            bytes.len()
        );
    }
    if module.unserialize(&bytes) {
        log::debug!("Restored state from '{}'", path.display());
        Ok(())
    } else {
        Err(PersistError::Rejected(format!(
            "the module refused the state in '{}'",
            path.display()
        )))
    }
}
