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

//! The slot handler of one runtime: routes module callbacks to its sink,
//! input state and environment.

use crate::environment::CoreEnvironment;
use crate::handle::Control;
use crate::slot::SlotHandler;
use retroplex_core::ffi::RETRO_HW_FRAME_BUFFER_VALID;
use retroplex_core::{CallbackTable, FrameData, InputState, Sink, VideoFrame};
use std::ffi::{c_uint, c_void};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub(crate) struct InstanceCallbacks {
    sink: Arc<dyn Sink>,
    input: Arc<InputState>,
    control: Arc<Control>,
    environment: Mutex<CoreEnvironment>,
    table: CallbackTable,
}

impl InstanceCallbacks {
    pub(crate) fn new(
        sink: Arc<dyn Sink>,
        input: Arc<InputState>,
        control: Arc<Control>,
        environment: CoreEnvironment,
        table: CallbackTable,
    ) -> Self {
        Self {
            sink,
            input,
            control,
            environment: Mutex::new(environment),
            table,
        }
    }

    pub(crate) fn lock_environment(&self) -> MutexGuard<'_, CoreEnvironment> {
        self.environment
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl SlotHandler for InstanceCallbacks {
    unsafe fn environment(&self, cmd: c_uint, data: *mut c_void) -> bool {
        let mut environment = self.lock_environment();
        let handled = unsafe {
            environment.handle(
                cmd,
                data,
                self.sink.as_ref(),
                self.table.get_current_framebuffer,
            )
        };
        if environment.shutdown_requested() {
            self.control.request_stop();
        }
        handled
    }

    unsafe fn video_refresh(&self, data: *const c_void, width: u32, height: u32, pitch: usize) {
        let format = self.lock_environment().pixel_format();
        let frame_data = if data.is_null() {
            FrameData::Duplicate
        } else if data == RETRO_HW_FRAME_BUFFER_VALID {
            FrameData::Hardware
        } else {
            let len = pitch.saturating_mul(height as usize);
            FrameData::Software(unsafe { std::slice::from_raw_parts(data.cast::<u8>(), len) })
        };
        self.sink.video_frame(VideoFrame {
            data: frame_data,
            width,
            height,
            pitch,
            format,
        });
    }

    fn audio_sample(&self, left: i16, right: i16) {
        self.sink.queue_audio(&[left, right]);
    }

    unsafe fn audio_sample_batch(&self, data: *const i16, frames: usize) -> usize {
        // Some modules retry until everything is accepted; never hold them up
        // once the instance is on its way out.
        if !self.control.is_running() {
            return frames;
        }
        if data.is_null() || frames == 0 {
            return 0;
        }
        let samples = unsafe { std::slice::from_raw_parts(data, frames.saturating_mul(2)) };
        self.sink.queue_audio(samples)
    }

    fn input_poll(&self) {}

    fn input_state(&self, port: u32, device: u32, index: u32, id: u32) -> i16 {
        self.input.query(port, device, index, id)
    }

    fn current_framebuffer(&self) -> usize {
        self.sink.current_framebuffer()
    }
}
