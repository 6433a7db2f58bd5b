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

//! Instance index allocation and duplicate module files.
//!
//! The OS loader returns the same image when one path is opened twice, so two
//! instances of one module would share all of its globals. Every live copy
//! beyond the first therefore runs from its own file, named after the
//! per-module index handed out here.

use retroplex_core::{AllocatorError, ModuleError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// Ceiling on live instances across all modules.
pub const MAX_INSTANCES: usize = 100;
/// Ceiling on live instances of a single module.
pub const MAX_INSTANCES_PER_IDENTITY: usize = 64;

/// A growable bitset of in-use indices.
#[derive(Debug, Default, Clone)]
pub struct IndexBitset {
    bits: Vec<u64>,
}

impl IndexBitset {
    /// Creates a new, empty bitset.
    pub fn new() -> Self {
        Self { bits: Vec::new() }
    }

    /// Sets the bit at the specified index to 1.
    pub fn set(&mut self, index: usize) {
        let word_idx = index / 64;
        let bit_idx = index % 64;

        if word_idx >= self.bits.len() {
            self.bits.resize(word_idx + 1, 0);
        }

        self.bits[word_idx] |= 1 << bit_idx;
    }

    /// Clears the bit at the specified index to 0.
    pub fn clear(&mut self, index: usize) {
        let word_idx = index / 64;
        let bit_idx = index % 64;

        if let Some(word) = self.bits.get_mut(word_idx) {
            *word &= !(1 << bit_idx);
        }
    }

    /// Returns true if the bit at the specified index is set.
    pub fn is_set(&self, index: usize) -> bool {
        let word_idx = index / 64;
        let bit_idx = index % 64;

        self.bits
            .get(word_idx)
            .is_some_and(|word| word & (1 << bit_idx) != 0)
    }

    /// Returns the lowest clear index below `capacity`.
    pub fn first_clear(&self, capacity: usize) -> Option<usize> {
        let words = capacity.div_ceil(64);
        (0..words)
            .find_map(|word_idx| {
                let word = self.bits.get(word_idx).copied().unwrap_or(0);
                (word != u64::MAX).then(|| word_idx * 64 + (!word).trailing_zeros() as usize)
            })
            .filter(|&index| index < capacity)
    }

    /// Returns true if no bit is set.
    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&word| word == 0)
    }
}

/// The indices held by one live instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceIndices {
    /// Unique among all live instances.
    pub global: usize,
    /// Unique among live instances of the same module. Index 0 runs from the
    /// original module file.
    pub identity: usize,
}

#[derive(Debug, Default)]
struct AllocatorState {
    global: IndexBitset,
    per_identity: HashMap<String, IndexBitset>,
}

/// Hands out `(global, identity)` index pairs.
#[derive(Debug)]
pub struct InstanceAllocator {
    state: Mutex<AllocatorState>,
    max_instances: usize,
    max_per_identity: usize,
}

static GLOBAL_ALLOCATOR: OnceLock<Arc<InstanceAllocator>> = OnceLock::new();

impl Default for InstanceAllocator {
    fn default() -> Self {
        Self::new(MAX_INSTANCES, MAX_INSTANCES_PER_IDENTITY)
    }
}

impl InstanceAllocator {
    /// Creates an allocator with custom ceilings.
    pub fn new(max_instances: usize, max_per_identity: usize) -> Self {
        Self {
            state: Mutex::new(AllocatorState::default()),
            max_instances,
            max_per_identity,
        }
    }

    /// The process-wide allocator.
    pub fn global() -> Arc<InstanceAllocator> {
        Arc::clone(GLOBAL_ALLOCATOR.get_or_init(|| Arc::new(InstanceAllocator::default())))
    }

    /// Picks the lowest free global index and the lowest free index for `identity`.
    pub fn allocate(&self, identity: &str) -> Result<InstanceIndices, AllocatorError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let global = state
            .global
            .first_clear(self.max_instances)
            .ok_or(AllocatorError::GlobalExhausted {
                capacity: self.max_instances,
            })?;
        state.global.set(global);

        let bits = state.per_identity.entry(identity.to_string()).or_default();
        let Some(local) = bits.first_clear(self.max_per_identity) else {
            state.global.clear(global);
            return Err(AllocatorError::IdentityExhausted {
                identity: identity.to_string(),
                capacity: self.max_per_identity,
            });
        };
        bits.set(local);

        log::debug!("Allocated instance ({global}, {local}) for '{identity}'");
        Ok(InstanceIndices {
            global,
            identity: local,
        })
    }

    /// Frees both indices. They are immediately eligible for reuse.
    pub fn release(&self, identity: &str, indices: InstanceIndices) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.global.clear(indices.global);
        if let Some(bits) = state.per_identity.get_mut(identity) {
            bits.clear(indices.identity);
            if bits.is_empty() {
                state.per_identity.remove(identity);
            }
        }
        log::debug!(
            "Released instance ({}, {}) for '{identity}'",
            indices.global,
            indices.identity
        );
    }

    /// Allocates indices that are released when the lease is dropped.
    pub fn lease(self: &Arc<Self>, identity: &str) -> Result<InstanceLease, AllocatorError> {
        let indices = self.allocate(identity)?;
        Ok(InstanceLease {
            allocator: Arc::clone(self),
            identity: identity.to_string(),
            indices,
        })
    }

    /// Whether the pair is currently held.
    pub fn is_allocated(&self, identity: &str, indices: InstanceIndices) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.global.is_set(indices.global)
            && state
                .per_identity
                .get(identity)
                .is_some_and(|bits| bits.is_set(indices.identity))
    }
}

/// Indices held by a live instance, returned to the allocator on drop.
#[derive(Debug)]
pub struct InstanceLease {
    allocator: Arc<InstanceAllocator>,
    identity: String,
    indices: InstanceIndices,
}

impl InstanceLease {
    /// The held indices.
    pub fn indices(&self) -> InstanceIndices {
        self.indices
    }

    /// The module identity the indices are scoped to.
    pub fn identity(&self) -> &str {
        &self.identity
    }
}

impl Drop for InstanceLease {
    fn drop(&mut self) {
        self.allocator.release(&self.identity, self.indices);
    }
}

/// Path of the copy of `original` used by the instance with `identity_index`.
///
/// `<dir>/<stem><index>.<ext>`; index 0 is the original itself.
pub fn duplicate_module_path(original: &Path, identity_index: usize) -> PathBuf {
    if identity_index == 0 {
        return original.to_path_buf();
    }
    let stem = original
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match original.extension() {
        Some(ext) => format!("{stem}{identity_index}.{}", ext.to_string_lossy()),
        None => format!("{stem}{identity_index}"),
    };
    original.with_file_name(name)
}

/// Makes sure the module file for `identity_index` exists and returns its path.
///
/// The copy is refreshed every time; a failed copy is only tolerated when an
/// older copy is already in place.
pub fn prepare_duplicate(original: &Path, identity_index: usize) -> Result<PathBuf, ModuleError> {
    let target = duplicate_module_path(original, identity_index);
    if identity_index == 0 {
        return Ok(target);
    }

    match std::fs::copy(original, &target) {
        Ok(_) => {
            log::debug!(
                "Copied module '{}' to '{}'",
                original.display(),
                target.display()
            );
            Ok(target)
        }
        Err(e) if target.exists() => {
            log::warn!(
                "Could not refresh module copy '{}' ({e}); using the existing file",
                target.display()
            );
            Ok(target)
        }
        Err(e) => Err(ModuleError::Load {
            path: target,
            reason: format!("failed to copy module: {e}"),
        }),
    }
}

/// Removes a copy made by [`prepare_duplicate`]. Failures are logged only.
pub fn remove_duplicate(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        log::warn!("Failed to remove module copy '{}': {e}", path.display());
    }
}
