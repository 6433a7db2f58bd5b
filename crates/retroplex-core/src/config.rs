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

//! Host and per-instance configuration.
//!
//! A host is described by a TOML file:
//!
//! ```toml
//! [host]
//! save_directory = "saves"
//! io_workers = 2
//!
//! [[instance]]
//! module = "cores/snes9x_libretro.so"
//! content = "roms/game.sfc"
//!
//! [instance.settings]
//! snes9x_overclock = "enabled"
//! ```

use crate::ffi;
use crate::utils::clock::{Clock, SystemClock};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Fallback frame rate used when a module reports a non-positive one.
pub const DEFAULT_FPS: f64 = 60.0;

/// A configuration file that could not be used.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file '{path}': {source}")]
    Read {
        /// The config file.
        path: PathBuf,
        /// Underlying cause.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML for [`HostConfig`].
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        /// The config file.
        path: PathBuf,
        /// Underlying cause.
        #[source]
        source: toml::de::Error,
    },
}

/// Represents the structure of a host configuration file.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct HostConfig {
    /// Process-wide settings.
    pub host: HostSection,
    /// Instances to launch, in order.
    #[serde(rename = "instance")]
    pub instances: Vec<InstanceConfig>,
}

/// The `[host]` table.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct HostSection {
    /// Where battery-backed memory and state snapshots are written.
    pub save_directory: PathBuf,
    /// Directory reported to modules for BIOS and other system files.
    pub system_directory: PathBuf,
    /// Number of worker threads executing persistence I/O.
    pub io_workers: usize,
    /// Capacity of each instance's audio buffer, in stereo frames.
    pub audio_buffer_frames: usize,
}

impl Default for HostSection {
    fn default() -> Self {
        Self {
            save_directory: PathBuf::from("saves"),
            system_directory: PathBuf::from("system"),
            io_workers: 2,
            audio_buffer_frames: 8192,
        }
    }
}

/// One `[[instance]]` entry.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct InstanceConfig {
    /// The module (shared library) to load.
    pub module: PathBuf,
    /// The content file or directory handed to the module.
    pub content: PathBuf,
    /// Battery-backed memory file. Defaults to `<save_directory>/<content stem>.srm`.
    #[serde(default)]
    pub sram: Option<PathBuf>,
    /// Core variable overrides.
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
    /// Start without advancing frames.
    #[serde(default)]
    pub paused: bool,
}

impl HostConfig {
    /// Parses a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Loads a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Builds the runtime configuration for one configured instance.
    pub fn runtime_config(&self, instance: &InstanceConfig) -> RuntimeConfig {
        RuntimeConfig {
            save_directory: self.host.save_directory.clone(),
            system_directory: self.host.system_directory.clone(),
            audio_buffer_frames: self.host.audio_buffer_frames,
            settings: instance.settings.clone(),
            ..RuntimeConfig::default()
        }
    }
}

/// Configuration of a single core runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Where battery-backed memory and state snapshots are written.
    pub save_directory: PathBuf,
    /// Directory reported to modules for BIOS and other system files.
    pub system_directory: PathBuf,
    /// Frame rate used when the module reports none.
    pub fallback_fps: f64,
    /// Device bound to controller port 0 after content load.
    pub controller_device: u32,
    /// Language reported to modules.
    pub language: u32,
    /// Capacity of the instance's audio buffer, in stereo frames.
    pub audio_buffer_frames: usize,
    /// Core variable overrides; these win over the module's declared defaults.
    pub settings: BTreeMap<String, String>,
    /// Time source for frame pacing and frame-time reporting.
    pub clock: Arc<dyn Clock>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let host = HostSection::default();
        Self {
            save_directory: host.save_directory,
            system_directory: host.system_directory,
            fallback_fps: DEFAULT_FPS,
            controller_device: ffi::device::JOYPAD,
            language: ffi::language::ENGLISH,
            audio_buffer_frames: host.audio_buffer_frames,
            settings: BTreeMap::new(),
            clock: Arc::new(SystemClock::new()),
        }
    }
}

impl RuntimeConfig {
    /// Default battery-backed memory path for `content`.
    pub fn sram_path_for(&self, content: &Path) -> PathBuf {
        let stem = content
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "content".to_string());
        self.save_directory.join(format!("{stem}.srm"))
    }
}
