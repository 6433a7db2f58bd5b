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

//! Lock-free controller state shared between input glue and a runtime.

use crate::ffi::device;
use std::sync::atomic::{AtomicI16, AtomicU16, Ordering};

/// Number of controller ports exposed to each module.
pub const PORT_COUNT: usize = 4;

#[derive(Debug, Default)]
struct PortState {
    buttons: AtomicU16,
    // [stick index][axis]
    analog: [[AtomicI16; 2]; 2],
}

/// Controller state for every port of one instance.
///
/// Input glue writes from any thread; the runtime's input-state callback reads
/// it from the module thread.
#[derive(Debug, Default)]
pub struct InputState {
    ports: [PortState; PORT_COUNT],
}

impl InputState {
    /// Creates a state with every button released and every axis centred.
    pub fn new() -> Self {
        Self::default()
    }

    /// Presses or releases a joypad button. Out-of-range ports or ids are ignored.
    pub fn set_button(&self, port: usize, id: u32, pressed: bool) {
        let Some(state) = self.ports.get(port) else {
            return;
        };
        if id >= device::JOYPAD_BUTTON_COUNT {
            return;
        }
        let bit = 1u16 << id;
        if pressed {
            state.buttons.fetch_or(bit, Ordering::Relaxed);
        } else {
            state.buttons.fetch_and(!bit, Ordering::Relaxed);
        }
    }

    /// Sets an analog axis value.
    pub fn set_analog(&self, port: usize, index: u32, axis: u32, value: i16) {
        if let Some(slot) = self
            .ports
            .get(port)
            .and_then(|s| s.analog.get(index as usize))
            .and_then(|stick| stick.get(axis as usize))
        {
            slot.store(value, Ordering::Relaxed);
        }
    }

    /// Answers a module's `input_state` query.
    pub fn query(&self, port: u32, device_class: u32, index: u32, id: u32) -> i16 {
        let Some(state) = self.ports.get(port as usize) else {
            return 0;
        };

        match device_class {
            device::JOYPAD => {
                let buttons = state.buttons.load(Ordering::Relaxed);
                if id == device::ID_JOYPAD_MASK {
                    buttons as i16
                } else if id < device::JOYPAD_BUTTON_COUNT {
                    ((buttons >> id) & 1) as i16
                } else {
                    0
                }
            }
            device::ANALOG => state
                .analog
                .get(index as usize)
                .and_then(|stick| stick.get(id as usize))
                .map(|axis| axis.load(Ordering::Relaxed))
                .unwrap_or(0),
            _ => 0,
        }
    }
}
