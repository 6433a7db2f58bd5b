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

//! Lifecycle notifications published by runtimes.

use retroplex_core::ffi::SystemAvInfo;
use retroplex_core::{PixelFormat, SystemInfo};
use std::fmt;

/// Why a runtime stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// `shutdown` was called on a handle.
    Requested,
    /// The sink became invalid.
    SinkInvalidated,
    /// The module asked to shut down.
    ModuleShutdown,
    /// A fatal error during start-up or while running.
    Fatal(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Requested => write!(f, "shutdown requested"),
            StopReason::SinkInvalidated => write!(f, "sink invalidated"),
            StopReason::ModuleShutdown => write!(f, "module requested shutdown"),
            StopReason::Fatal(reason) => write!(f, "fatal error: {reason}"),
        }
    }
}

/// An event emitted by a runtime thread.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// Content is loaded, the sink is prepared and frames are about to run.
    Ready {
        /// The runtime's id.
        id: u64,
        /// The module's self-description.
        system_info: SystemInfo,
        /// Geometry and timing of the loaded content.
        av_info: SystemAvInfo,
        /// Pixel layout of software frames.
        pixel_format: PixelFormat,
        /// The module renders through a hardware context.
        hw_rendered: bool,
        /// Hardware frames have their origin at the bottom-left corner.
        bottom_left_origin: bool,
    },
    /// The runtime has torn down completely.
    Stopped {
        /// The runtime's id.
        id: u64,
        /// What ended it.
        reason: StopReason,
    },
}

impl RuntimeEvent {
    /// The id of the runtime that emitted the event.
    pub fn id(&self) -> u64 {
        match self {
            RuntimeEvent::Ready { id, .. } | RuntimeEvent::Stopped { id, .. } => *id,
        }
    }
}
