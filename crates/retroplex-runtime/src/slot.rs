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

//! The slot registry: a fixed pool of distinct callback identities.
//!
//! The hosted API takes plain function pointers with no context argument and
//! keeps one set of them per loaded module. To tell instances apart, every slot
//! owns its own monomorphised set of `extern "C"` trampolines. A trampoline looks
//! up the handler currently bound to its slot and forwards the call to it.
//!
//! The number of slots is fixed at compile time: function identities cannot be
//! minted at runtime.

use retroplex_core::{CallbackTable, SlotError};
use std::ffi::{c_uint, c_void};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Number of slots, and therefore the ceiling on concurrently live runtimes.
pub const SLOT_COUNT: usize = 100;

/// The receiving end of a slot's trampolines.
///
/// Every method is called synchronously on the thread currently executing the
/// module bound to the slot.
pub trait SlotHandler: Send + Sync {
    /// Environment command.
    ///
    /// # Safety
    /// `data` is the module's payload for `cmd` and may be null.
    unsafe fn environment(&self, cmd: c_uint, data: *mut c_void) -> bool;

    /// Video frame.
    ///
    /// # Safety
    /// `data` is null, the hardware-frame sentinel, or points to
    /// `pitch * height` readable bytes.
    unsafe fn video_refresh(&self, data: *const c_void, width: u32, height: u32, pitch: usize);

    /// Single stereo frame.
    fn audio_sample(&self, left: i16, right: i16);

    /// Interleaved stereo batch; returns the number of frames consumed.
    ///
    /// # Safety
    /// `data` is null or points to `frames * 2` readable samples.
    unsafe fn audio_sample_batch(&self, data: *const i16, frames: usize) -> usize;

    /// Input poll notification.
    fn input_poll(&self);

    /// Input query.
    fn input_state(&self, port: u32, device: u32, index: u32, id: u32) -> i16;

    /// Current hardware framebuffer handle.
    fn current_framebuffer(&self) -> usize;
}

struct SlotCell {
    handler: RwLock<Option<Arc<dyn SlotHandler>>>,
}

impl SlotCell {
    const fn new() -> Self {
        Self {
            handler: RwLock::new(None),
        }
    }
}

static SLOTS: [SlotCell; SLOT_COUNT] = [const { SlotCell::new() }; SLOT_COUNT];

// true = acquired
static IN_USE: Mutex<[bool; SLOT_COUNT]> = Mutex::new([false; SLOT_COUNT]);

fn bound_handler(slot: usize) -> Option<Arc<dyn SlotHandler>> {
    let cell = SLOTS.get(slot)?;
    let guard = cell.handler.read().unwrap_or_else(PoisonError::into_inner);
    guard.clone()
}

fn unbound(slot: usize, callback: &str) {
    log::error!("Slot {slot}: '{callback}' invoked with no bound runtime");
}

unsafe extern "C" fn environment<const SLOT: usize>(cmd: c_uint, data: *mut c_void) -> bool {
    match bound_handler(SLOT) {
        Some(handler) => unsafe { handler.environment(cmd, data) },
        None => {
            unbound(SLOT, "environment");
            false
        }
    }
}

unsafe extern "C" fn video_refresh<const SLOT: usize>(
    data: *const c_void,
    width: c_uint,
    height: c_uint,
    pitch: usize,
) {
    match bound_handler(SLOT) {
        Some(handler) => unsafe { handler.video_refresh(data, width, height, pitch) },
        None => unbound(SLOT, "video_refresh"),
    }
}

unsafe extern "C" fn audio_sample<const SLOT: usize>(left: i16, right: i16) {
    match bound_handler(SLOT) {
        Some(handler) => handler.audio_sample(left, right),
        None => unbound(SLOT, "audio_sample"),
    }
}

unsafe extern "C" fn audio_sample_batch<const SLOT: usize>(data: *const i16, frames: usize) -> usize {
    match bound_handler(SLOT) {
        Some(handler) => unsafe { handler.audio_sample_batch(data, frames) },
        None => {
            unbound(SLOT, "audio_sample_batch");
            0
        }
    }
}

unsafe extern "C" fn input_poll<const SLOT: usize>() {
    match bound_handler(SLOT) {
        Some(handler) => handler.input_poll(),
        None => unbound(SLOT, "input_poll"),
    }
}

unsafe extern "C" fn input_state<const SLOT: usize>(
    port: c_uint,
    device: c_uint,
    index: c_uint,
    id: c_uint,
) -> i16 {
    match bound_handler(SLOT) {
        Some(handler) => handler.input_state(port, device, index, id),
        None => {
            unbound(SLOT, "input_state");
            0
        }
    }
}

unsafe extern "C" fn current_framebuffer<const SLOT: usize>() -> usize {
    match bound_handler(SLOT) {
        Some(handler) => handler.current_framebuffer(),
        None => {
            unbound(SLOT, "get_current_framebuffer");
            0
        }
    }
}

const fn table_for<const SLOT: usize>() -> CallbackTable {
    CallbackTable {
        environment: environment::<SLOT>,
        video_refresh: video_refresh::<SLOT>,
        audio_sample: audio_sample::<SLOT>,
        audio_sample_batch: audio_sample_batch::<SLOT>,
        input_poll: input_poll::<SLOT>,
        input_state: input_state::<SLOT>,
        get_current_framebuffer: current_framebuffer::<SLOT>,
    }
}

macro_rules! slot_row {
    ($tens:literal) => {
        [
            table_for::<{ $tens * 10 }>(),
            table_for::<{ $tens * 10 + 1 }>(),
            table_for::<{ $tens * 10 + 2 }>(),
            table_for::<{ $tens * 10 + 3 }>(),
            table_for::<{ $tens * 10 + 4 }>(),
            table_for::<{ $tens * 10 + 5 }>(),
            table_for::<{ $tens * 10 + 6 }>(),
            table_for::<{ $tens * 10 + 7 }>(),
            table_for::<{ $tens * 10 + 8 }>(),
            table_for::<{ $tens * 10 + 9 }>(),
        ]
    };
}

static TABLES: [[CallbackTable; 10]; SLOT_COUNT / 10] = [
    slot_row!(0),
    slot_row!(1),
    slot_row!(2),
    slot_row!(3),
    slot_row!(4),
    slot_row!(5),
    slot_row!(6),
    slot_row!(7),
    slot_row!(8),
    slot_row!(9),
];

/// Exclusive ownership of one slot.
///
/// Dropping the handle unbinds the slot and returns it to the pool, so it must
/// outlive every call the module can make through the slot's trampolines.
#[derive(Debug)]
pub struct SlotHandle {
    index: usize,
}

impl SlotHandle {
    /// Takes the lowest free slot.
    pub fn acquire() -> Result<Self, SlotError> {
        let mut in_use = IN_USE.lock().unwrap_or_else(PoisonError::into_inner);
        let index = in_use
            .iter()
            .position(|taken| !taken)
            .ok_or(SlotError::Exhausted(SLOT_COUNT))?;
        in_use[index] = true;
        log::debug!("Acquired callback slot {index}");
        Ok(Self { index })
    }

    /// The slot's index in `[0, SLOT_COUNT)`.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Installs the handler the slot's trampolines forward to.
    ///
    /// Must be called before [`callbacks`](Self::callbacks) are registered with a module.
    pub fn bind(&self, handler: Arc<dyn SlotHandler>) {
        let mut guard = SLOTS[self.index]
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = Some(handler);
    }

    /// Removes the bound handler. Later trampoline calls return neutral values.
    pub fn unbind(&self) {
        let mut guard = SLOTS[self.index]
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = None;
    }

    /// The trampolines of this slot.
    pub fn callbacks(&self) -> CallbackTable {
        TABLES[self.index / 10][self.index % 10]
    }

    /// Unbinds and returns the slot to the pool.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for SlotHandle {
    fn drop(&mut self) {
        self.unbind();
        let mut in_use = IN_USE.lock().unwrap_or_else(PoisonError::into_inner);
        in_use[self.index] = false;
        log::debug!("Released callback slot {}", self.index);
    }
}
