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

//! # Retroplex Runtime
//!
//! Runs many instances of the single-binding libretro API side by side.
//!
//! The pieces, leaf first:
//! - [`slot`]: a fixed pool of `extern "C"` callback identities, each forwarding
//!   to a rebindable handler.
//! - [`allocator`]: global and per-module instance indices, used to give every
//!   live copy of a module its own file.
//! - [`task_queue`]: the FIFO through which other threads get exclusive access
//!   to a loaded module.
//! - [`io_chain`]: path-keyed ordering of asynchronous persistence.
//! - [`runtime`]: one thread per instance driving the module, with frame pacing.
//! - [`handle`]: the thread-safe observer other threads hold.

#![warn(missing_docs)]

pub mod allocator;
mod callbacks;
mod environment;
pub mod event;
pub mod handle;
pub mod io_chain;
pub mod pacing;
pub mod runtime;
pub mod slot;
pub mod task_queue;

pub use allocator::{InstanceAllocator, InstanceIndices, InstanceLease};
pub use event::{RuntimeEvent, StopReason};
pub use handle::{RuntimeHandle, RuntimeState};
pub use io_chain::{ChainLink, IoTicket, OrderedIoChain};
pub use runtime::{CoreRuntime, LaunchRequest, RuntimeServices};
pub use slot::{SlotHandle, SlotHandler, SLOT_COUNT};
pub use task_queue::Task;
