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

// Command-line host: launches every instance of a config file and runs them
// until they stop on their own or the time limit passes.

use anyhow::{bail, Context, Result};
use clap::Parser;
use retroplex_core::HostConfig;
use retroplex_infra::{BufferedSink, DynamicModuleLoader};
use retroplex_runtime::{
    CoreRuntime, IoTicket, LaunchRequest, OrderedIoChain, RuntimeEvent, RuntimeHandle,
    RuntimeServices, RuntimeState,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(
    name = "retroplex",
    version,
    about = "Runs several libretro cores side by side",
    long_about = None
)]
struct Cli {
    /// Host configuration file
    #[arg(short, long, env = "RETROPLEX_CONFIG", default_value = "retroplex.toml")]
    config: PathBuf,

    /// Stop every instance after this many seconds
    #[arg(short, long)]
    seconds: Option<f64>,

    /// Write a state snapshot of each running instance before stopping it
    #[arg(long)]
    save_states: bool,
}

struct Instance {
    handle: RuntimeHandle,
    sink: Arc<BufferedSink>,
    content: PathBuf,
}

/// `<save_directory>/<content stem>.state`
fn state_path(save_directory: &Path, content: &Path) -> PathBuf {
    let stem = content
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "content".to_string());
    save_directory.join(format!("{stem}.state"))
}

/// How long to run, from `--seconds`. Negative values mean no time at all.
fn run_duration(seconds: Option<f64>) -> Result<Option<Duration>> {
    seconds
        .map(|seconds| {
            Duration::try_from_secs_f64(seconds.max(0.0))
                .with_context(|| format!("invalid --seconds {seconds}"))
        })
        .transpose()
}

fn launch_all(config: &HostConfig) -> Result<(Vec<Instance>, flume::Receiver<RuntimeEvent>)> {
    let (events_tx, events) = flume::unbounded();
    let services =
        RuntimeServices::new(Arc::new(DynamicModuleLoader::new())).with_events(events_tx);

    let mut instances = Vec::new();
    for entry in &config.instances {
        let sink = Arc::new(BufferedSink::new(config.host.audio_buffer_frames));
        let mut request = LaunchRequest::new(&entry.module, &entry.content, sink.clone());
        request.sram = entry.sram.clone();
        request.paused = entry.paused;
        request.config = config.runtime_config(entry);

        match CoreRuntime::launch(request, &services) {
            Ok(handle) => instances.push(Instance {
                handle,
                sink,
                content: entry.content.clone(),
            }),
            Err(e) => log::error!(
                "Failed to launch '{}' with '{}': {e}",
                entry.module.display(),
                entry.content.display()
            ),
        }
    }

    if instances.is_empty() {
        bail!("none of the {} configured instances could be launched", config.instances.len());
    }
    Ok((instances, events))
}

/// Logs lifecycle events until every instance stopped or `deadline` passed.
fn watch(events: &flume::Receiver<RuntimeEvent>, mut live: usize, deadline: Option<Instant>) {
    while live > 0 {
        let received = match deadline {
            Some(deadline) => events.recv_deadline(deadline).ok(),
            None => events.recv().ok(),
        };
        let Some(event) = received else {
            return;
        };

        match event {
            RuntimeEvent::Ready {
                id,
                system_info,
                av_info,
                pixel_format,
                hw_rendered,
                ..
            } => log::info!(
                "[{id}] {} {}: {}x{} {:?}{}",
                system_info.library_name,
                system_info.library_version,
                av_info.geometry.base_width,
                av_info.geometry.base_height,
                pixel_format,
                if hw_rendered { " (hardware)" } else { "" }
            ),
            RuntimeEvent::Stopped { id, reason } => {
                live -= 1;
                log::info!("[{id}] stopped: {reason}");
            }
        }
    }
}

fn main() -> Result<()> {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = HostConfig::load(&cli.config)
        .with_context(|| format!("loading host configuration '{}'", cli.config.display()))?;
    if config.instances.is_empty() {
        bail!("'{}' declares no [[instance]]", cli.config.display());
    }
    if !OrderedIoChain::init_global(config.host.io_workers) {
        log::warn!("Persistence I/O was already initialised; ignoring io_workers");
    }

    let run_for = run_duration(cli.seconds)?;

    let (instances, events) = launch_all(&config)?;
    let deadline = run_for.and_then(|duration| Instant::now().checked_add(duration));
    watch(&events, instances.len(), deadline);

    let snapshots: Vec<(PathBuf, IoTicket<()>)> = if cli.save_states {
        instances
            .iter()
            .filter(|instance| instance.handle.state() < RuntimeState::Stopping)
            .map(|instance| {
                let path = state_path(&config.host.save_directory, &instance.content);
                let ticket = instance.handle.save_state(&path);
                (path, ticket)
            })
            .collect()
    } else {
        Vec::new()
    };

    for instance in &instances {
        instance.handle.shutdown();
    }
    for (path, ticket) in snapshots {
        match ticket.wait() {
            Ok(()) => log::info!("Saved state to '{}'", path.display()),
            Err(e) => log::error!("State snapshot '{}' failed: {e}", path.display()),
        }
    }
    for instance in &instances {
        instance.handle.wait_for_exit(None);
        log::info!(
            "[{}] presented {} frames",
            instance.handle.id(),
            instance.sink.frames_presented()
        );
    }
    Ok(())
}
