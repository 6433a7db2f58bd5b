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

//! Error types shared across the host crates.

use std::path::PathBuf;
use thiserror::Error;

/// A failure while loading a hosted module or its content. Always fatal for
/// the instance that hit it.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// The shared library could not be opened.
    #[error("failed to load module '{path}': {reason}")]
    Load {
        /// The module file.
        path: PathBuf,
        /// Loader diagnostic.
        reason: String,
    },
    /// A required export is missing from the module.
    #[error("module '{path}' is missing required symbol '{symbol}'")]
    MissingSymbol {
        /// The module file.
        path: PathBuf,
        /// The missing export.
        symbol: &'static str,
    },
    /// The content file could not be read.
    #[error("failed to read content '{path}': {reason}")]
    ContentUnreadable {
        /// The content file.
        path: PathBuf,
        /// Underlying cause.
        reason: String,
    },
    /// `retro_load_game` returned false.
    #[error("the module rejected content '{0}'")]
    ContentRejected(PathBuf),
    /// The module asked for a rendering setup the sink cannot provide.
    #[error("unsupported hardware render context {context_type} (v{major}.{minor})")]
    UnsupportedHwContext {
        /// Requested `retro_hw_context_type`.
        context_type: u32,
        /// Requested major version.
        major: u32,
        /// Requested minor version.
        minor: u32,
    },
    /// The module requested a pixel format this host does not know.
    #[error("unsupported pixel format {0}")]
    UnsupportedPixelFormat(u32),
}

/// The fixed pool of callback slots is exhausted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlotError {
    /// Every slot is bound to a live runtime.
    #[error("all {0} callback slots are in use")]
    Exhausted(usize),
}

/// The instance allocator has no free index for a request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AllocatorError {
    /// The global instance ceiling was reached.
    #[error("instance limit of {capacity} reached")]
    GlobalExhausted {
        /// The global ceiling.
        capacity: usize,
    },
    /// Too many copies of one module are live.
    #[error("module '{identity}' already has {capacity} live instances")]
    IdentityExhausted {
        /// The module identity.
        identity: String,
        /// The per-identity ceiling.
        capacity: usize,
    },
}

/// A launch request that could not be started. No thread, slot or index is
/// left allocated when this is returned.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The module file does not exist.
    #[error("couldn't find module at path '{0}'")]
    MissingModule(PathBuf),
    /// The content path is neither a file nor a directory.
    #[error("couldn't find content at path '{0}'")]
    MissingContent(PathBuf),
    /// No callback slot is free.
    #[error(transparent)]
    Slot(#[from] SlotError),
    /// No instance index is free.
    #[error(transparent)]
    Allocator(#[from] AllocatorError),
    /// The OS refused to spawn the runtime thread.
    #[error("failed to spawn runtime thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// A failed persistence operation. Never blocks later operations on the same path.
#[derive(Debug, Error)]
pub enum PersistError {
    /// The underlying file operation failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        /// The persistence path.
        path: PathBuf,
        /// Underlying cause.
        #[source]
        source: std::io::Error,
    },
    /// The file to read does not exist.
    #[error("nothing saved at '{0}'")]
    NotFound(PathBuf),
    /// The operation was dropped before it ran, e.g. because the runtime shut down.
    #[error("operation was dropped before it could run")]
    Dropped,
    /// The module refused to produce or accept the data.
    #[error("the module rejected the operation: {0}")]
    Rejected(String),
}
