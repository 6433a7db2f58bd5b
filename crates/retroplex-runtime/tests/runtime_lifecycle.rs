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

mod common;

use common::*;
use retroplex_core::{LaunchError, PixelFormat};
use retroplex_runtime::{
    CoreRuntime, LaunchRequest, RuntimeEvent, RuntimeHandle, RuntimeState, StopReason,
};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A request whose battery memory lands inside the fixture.
fn request(fixture: &Fixture, sink: Arc<TestSink>) -> LaunchRequest {
    let mut request = LaunchRequest::new(&fixture.module, &fixture.content, sink);
    request.config.save_directory = fixture.path("saves");
    request
}

fn launch(
    fixture: &Fixture,
    loader: &Arc<MockLoader>,
    sink: Arc<TestSink>,
) -> (RuntimeHandle, flume::Receiver<RuntimeEvent>) {
    let (services, events) = services(Arc::clone(loader));
    let handle =
        CoreRuntime::launch(request(fixture, sink), &services).expect("launch should succeed");
    (handle, events)
}

#[test]
fn runs_frames_until_shutdown_then_releases_everything() {
    // ARRANGE
    let fixture = Fixture::new(b"ROM");
    let loader = MockLoader::new(MockBehaviour::default());
    let sink = TestSink::new();

    // ACT
    let (handle, events) = launch(&fixture, &loader, sink.clone());
    assert!(
        wait_until(|| loader.recorder.frames() >= 10),
        "The runtime should advance frames"
    );
    handle.shutdown();
    assert!(handle.wait_for_exit(Some(TIMEOUT)));

    // ASSERT
    assert_eq!(handle.state(), RuntimeState::Unloaded);
    assert_eq!(loader.recorder.inits.load(Ordering::SeqCst), 1);
    assert_eq!(loader.recorder.unloads.load(Ordering::SeqCst), 1);
    assert_eq!(loader.recorder.deinits.load(Ordering::SeqCst), 1);
    assert!(sink.prepared.load(Ordering::SeqCst));
    assert_eq!(sink.releases.load(Ordering::SeqCst), 1);
    assert!(sink.frames.load(Ordering::SeqCst) >= 10);
    assert!(sink.audio_frames.load(Ordering::SeqCst) >= 40);
    assert_eq!(
        *sink.last_frame.lock().unwrap(),
        Some((4, 2, 16, PixelFormat::Xrgb8888, 32)),
        "Frames should carry the format the module negotiated"
    );

    match events.recv_timeout(TIMEOUT).unwrap() {
        RuntimeEvent::Ready {
            id,
            system_info,
            av_info,
            pixel_format,
            hw_rendered,
            ..
        } => {
            assert_eq!(id, handle.id());
            assert_eq!(system_info.library_name, "MockCore");
            assert_eq!(av_info.geometry.base_width, 4);
            assert_eq!(pixel_format, PixelFormat::Xrgb8888);
            assert!(!hw_rendered);
        }
        other => panic!("expected Ready first, got {other:?}"),
    }
    assert_eq!(stop_reason(&events, handle.id()), StopReason::Requested);
}

#[test]
fn missing_module_or_content_fails_before_any_allocation() {
    let fixture = Fixture::new(b"ROM");
    let loader = MockLoader::new(MockBehaviour::default());
    let (services, events) = services(loader.clone());

    let request = LaunchRequest::new(fixture.path("nope.so"), &fixture.content, TestSink::new());
    assert!(matches!(
        CoreRuntime::launch(request, &services),
        Err(LaunchError::MissingModule(_))
    ));

    let request = LaunchRequest::new(&fixture.module, fixture.path("nope.bin"), TestSink::new());
    assert!(matches!(
        CoreRuntime::launch(request, &services),
        Err(LaunchError::MissingContent(_))
    ));

    assert!(loader.recorder.loaded_paths.lock().unwrap().is_empty());
    assert!(events.try_recv().is_err(), "No runtime should have started");
}

#[test]
fn rejected_content_is_fatal() {
    let fixture = Fixture::new(b"ROM");
    let loader = MockLoader::new(MockBehaviour {
        reject_content: true,
        ..Default::default()
    });
    let sink = TestSink::new();

    let (handle, events) = launch(&fixture, &loader, sink.clone());

    match stop_reason(&events, handle.id()) {
        StopReason::Fatal(reason) => assert!(reason.contains("rejected"), "{reason}"),
        other => panic!("expected a fatal stop, got {other:?}"),
    }
    assert!(handle.wait_for_exit(Some(TIMEOUT)));
    assert_eq!(loader.recorder.frames(), 0);
    assert_eq!(loader.recorder.unloads.load(Ordering::SeqCst), 0);
    assert_eq!(loader.recorder.deinits.load(Ordering::SeqCst), 1);
    assert!(!sink.prepared.load(Ordering::SeqCst));
}

#[test]
fn unsupported_hardware_context_is_fatal() {
    let fixture = Fixture::new(b"ROM");
    let loader = MockLoader::new(MockBehaviour {
        request_hw: true,
        ..Default::default()
    });

    let (handle, events) = launch(&fixture, &loader, TestSink::new());

    match stop_reason(&events, handle.id()) {
        StopReason::Fatal(reason) => {
            assert!(reason.contains("hardware render context"), "{reason}")
        }
        other => panic!("expected a fatal stop, got {other:?}"),
    }
    assert_eq!(loader.recorder.frames(), 0);
}

#[test]
fn sink_invalid_at_start_skips_running() {
    let fixture = Fixture::new(b"ROM");
    let loader = MockLoader::new(MockBehaviour::default());

    let (handle, events) = launch(&fixture, &loader, TestSink::rejecting());

    assert_eq!(stop_reason(&events, handle.id()), StopReason::SinkInvalidated);
    assert!(handle.wait_for_exit(Some(TIMEOUT)));
    assert_eq!(loader.recorder.frames(), 0, "No frame may run without a sink");
    assert_eq!(handle.state(), RuntimeState::Unloaded);
}

#[test]
fn sink_invalidation_stops_a_running_instance() {
    let fixture = Fixture::new(b"ROM");
    let loader = MockLoader::new(MockBehaviour::default());
    let sink = TestSink::new();

    let (handle, events) = launch(&fixture, &loader, sink.clone());
    assert!(wait_until(|| loader.recorder.frames() > 0));
    sink.invalidate();

    assert_eq!(stop_reason(&events, handle.id()), StopReason::SinkInvalidated);
    assert!(handle.wait_for_exit(Some(TIMEOUT)));
}

#[test]
fn module_shutdown_request_stops_the_instance() {
    let fixture = Fixture::new(b"ROM");
    let loader = MockLoader::new(MockBehaviour {
        shutdown_after: Some(5),
        ..Default::default()
    });

    let (handle, events) = launch(&fixture, &loader, TestSink::new());

    assert_eq!(stop_reason(&events, handle.id()), StopReason::ModuleShutdown);
    assert!(handle.wait_for_exit(Some(TIMEOUT)));
    assert_eq!(loader.recorder.frames(), 5);
}

#[test]
fn tasks_queued_before_shutdown_all_run_in_order() {
    // ARRANGE
    let fixture = Fixture::new(b"ROM");
    let loader = MockLoader::new(MockBehaviour::default());
    let (handle, _events) = launch(&fixture, &loader, TestSink::new());
    let order = Arc::new(Mutex::new(Vec::new()));

    // ACT
    for i in 0..50 {
        let order = Arc::clone(&order);
        assert!(handle.enqueue_task(Box::new(move |_| {
            order.lock().unwrap().push(i);
            Ok(())
        })));
    }
    handle.shutdown();
    assert!(handle.wait_for_exit(Some(TIMEOUT)));

    // ASSERT
    assert_eq!(*order.lock().unwrap(), (0..50).collect::<Vec<_>>());
    assert!(
        !handle.enqueue_task(Box::new(|_| Ok(()))),
        "Tasks after teardown must be refused"
    );
}

#[test]
fn failing_task_does_not_stop_the_instance() {
    let fixture = Fixture::new(b"ROM");
    let loader = MockLoader::new(MockBehaviour::default());
    let (handle, _events) = launch(&fixture, &loader, TestSink::new());

    handle.enqueue_task(Box::new(|_| anyhow::bail!("task failure")));
    let (tx, rx) = crossbeam_channel::bounded(1);
    handle.enqueue_task(Box::new(move |_| {
        tx.send(()).unwrap();
        Ok(())
    }));

    assert!(rx.recv_timeout(TIMEOUT).is_ok(), "Later tasks must still run");
    assert!(handle.state() < RuntimeState::Stopping);
    handle.shutdown();
    assert!(handle.wait_for_exit(Some(TIMEOUT)));
}

#[test]
fn paused_instance_drains_tasks_without_advancing() {
    // ARRANGE
    let fixture = Fixture::new(b"ROM");
    let loader = MockLoader::new(MockBehaviour::default());
    let (services, _events) = services(loader.clone());
    let mut request = request(&fixture, TestSink::new());
    request.paused = true;
    let handle = CoreRuntime::launch(request, &services).unwrap();

    // ACT
    assert!(wait_until(|| handle.state() == RuntimeState::Paused));
    assert!(handle.reset());
    assert!(wait_until(|| loader.recorder.resets.load(Ordering::SeqCst) == 1));

    // ASSERT
    assert_eq!(loader.recorder.frames(), 0, "A paused instance must not advance");

    handle.set_paused(false);
    assert!(wait_until(|| loader.recorder.frames() > 0));
    assert!(wait_until(|| handle.state() == RuntimeState::Running));

    handle.shutdown();
    assert!(handle.wait_for_exit(Some(TIMEOUT)));
}

#[test]
fn input_and_settings_reach_the_module() {
    let fixture = Fixture::new(b"ROM");
    let loader = MockLoader::new(MockBehaviour::default());
    let (services, _events) = services(loader.clone());
    let mut request = request(&fixture, TestSink::new());
    request
        .config
        .settings
        .insert("mock_speed".to_string(), "turbo".to_string());
    request.input.set_button(0, 0, true);
    let handle = CoreRuntime::launch(request, &services).unwrap();

    assert!(wait_until(|| loader.recorder.frames() > 0));
    assert_eq!(*loader.recorder.last_input.lock().unwrap(), Some(1));
    assert_eq!(
        loader.recorder.variable.lock().unwrap().as_deref(),
        Some("turbo"),
        "User settings must override the module's default"
    );

    handle.shutdown();
    assert!(handle.wait_for_exit(Some(TIMEOUT)));
}

#[test]
fn second_instance_of_a_module_runs_from_a_copy() {
    // ARRANGE
    let fixture = Fixture::new(b"ROM");
    let loader = MockLoader::new(MockBehaviour::default());
    let (services, _events) = services(loader.clone());
    let copy = fixture.path("mock_libretro1.so");

    // ACT
    let first = CoreRuntime::launch(request(&fixture, TestSink::new()), &services).unwrap();
    let second = CoreRuntime::launch(request(&fixture, TestSink::new()), &services).unwrap();
    assert!(wait_until(|| loader.recorder.loaded_paths.lock().unwrap().len() == 2));
    assert!(copy.exists(), "The duplicate module file should exist while in use");

    // ASSERT
    let mut loaded = loader.recorder.loaded_paths.lock().unwrap().clone();
    loaded.sort();
    assert_eq!(loaded, vec![fixture.module.clone(), copy.clone()]);

    first.shutdown();
    second.shutdown();
    assert!(first.wait_for_exit(Some(TIMEOUT)));
    assert!(second.wait_for_exit(Some(TIMEOUT)));
    assert!(!copy.exists(), "Teardown should remove the duplicate module file");
}

#[test]
fn shutdown_is_idempotent_and_non_blocking() {
    let fixture = Fixture::new(b"ROM");
    let loader = MockLoader::new(MockBehaviour::default());
    let (handle, events) = launch(&fixture, &loader, TestSink::new());

    handle.shutdown();
    handle.shutdown();
    let observer = handle.clone();
    observer.shutdown();

    assert_eq!(stop_reason(&events, handle.id()), StopReason::Requested);
    assert!(observer.wait_for_exit(Some(TIMEOUT)));
    assert!(handle.wait_for_exit(Some(Duration::from_millis(1))));
}
