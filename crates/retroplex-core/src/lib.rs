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

//! # Retroplex Core
//!
//! Foundational crate containing the libretro ABI definitions, the interface
//! contracts between the host and its external collaborators (hosted modules,
//! presentation sinks, input glue), and the host configuration types.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod ffi;
pub mod input;
pub mod module;
pub mod sink;
pub mod utils;

pub use config::{ConfigError, HostConfig, HostSection, InstanceConfig, RuntimeConfig};
pub use error::{AllocatorError, LaunchError, ModuleError, PersistError, SlotError};
pub use input::InputState;
pub use module::{CallbackTable, GameContent, MemoryRegion, ModuleLoader, RetroModule, SystemInfo};
pub use sink::{FrameData, HwRenderRequest, PixelFormat, Sink, VideoFrame};
pub use utils::clock::{Clock, ManualClock, SystemClock};
