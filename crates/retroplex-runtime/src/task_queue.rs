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

//! The many-producer, single-consumer queue feeding work into a runtime.

use crossbeam_channel::{Receiver, Sender};
use retroplex_core::RetroModule;

/// A unit of work that needs exclusive access to a loaded module.
pub type Task = Box<dyn FnOnce(&mut dyn RetroModule) -> anyhow::Result<()> + Send>;

/// Producer side. Cheap to clone; usable from any thread.
#[derive(Clone)]
pub struct TaskSender {
    tx: Sender<Task>,
}

impl TaskSender {
    /// Queues a task. Returns false, dropping the task, if the queue is closed.
    pub fn enqueue(&self, task: Task) -> bool {
        self.tx.send(task).is_ok()
    }
}

/// Consumer side, owned by the runtime thread.
pub struct TaskQueue {
    rx: Receiver<Task>,
}

/// Creates a connected sender and queue.
pub fn task_queue() -> (TaskSender, TaskQueue) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (TaskSender { tx }, TaskQueue { rx })
}

impl TaskQueue {
    /// Runs every task that was queued when the drain started, in FIFO order.
    ///
    /// Tasks queued while draining are left for the next call. A failing task is
    /// logged and does not stop the drain. Returns the number of tasks run.
    pub fn drain(&self, module: &mut dyn RetroModule) -> usize {
        let pending = self.rx.len();
        let mut ran = 0;
        for _ in 0..pending {
            let Ok(task) = self.rx.try_recv() else {
                break;
            };
            if let Err(e) = task(&mut *module) {
                log::error!("Runtime task failed: {e:#}");
            }
            ran += 1;
        }
        ran
    }

    /// Number of queued tasks.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether no task is queued.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Closes the queue, dropping every task that has not run.
    ///
    /// Later [`TaskSender::enqueue`] calls fail. Returns the number of tasks dropped.
    pub fn close(self) -> usize {
        let dropped = self.rx.try_iter().count();
        drop(self.rx);
        dropped
    }
}
