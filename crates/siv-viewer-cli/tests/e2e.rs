//! Cross-process tests through the real `siv-viewer` binary.

use std::path::Path;
use std::time::{Duration, Instant};

use siv_client::{ControllerConfig, PushOptions, PushOutcome, ViewerController};
use siv_image::{Dtype, Image, Samples};

fn controller_for(dir: &Path) -> ViewerController {
    let config = ControllerConfig {
        capacity: 64 * 64 * 3,
        dtype: Dtype::U8,
        idle_ms: 1,
        paused_ms: 5,
        viewer_program: env!("CARGO_BIN_EXE_siv-viewer").into(),
        slot_path: Some(dir.join("e2e.slot")),
        settings_path: Some(dir.join("e2e.ini")),
        startup_poll: Duration::from_millis(10),
        ..ControllerConfig::default()
    };
    ViewerController::new(config).unwrap()
}

fn white(h: u32, w: u32) -> Image {
    Image::from_hwc(h, w, 3, Samples::U8(vec![255; (h * w * 3) as usize])).unwrap()
}

fn wait_consumed(controller: &ViewerController, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while controller.slot().has_new_image() {
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    true
}

#[test]
fn full_lifecycle_start_push_consume_close() {
    let dir = tempfile::tempdir().unwrap();
    let controller = controller_for(dir.path());

    controller.start().unwrap();
    assert!(controller.wait_until_started(Duration::from_secs(10)));
    assert!(controller.is_alive());

    let handle = controller.handle();
    let outcome = handle.push(&white(16, 16), PushOptions::default()).unwrap();
    assert_eq!(outcome, PushOutcome::Written);
    assert!(wait_consumed(&controller, Duration::from_secs(10)));

    controller.close();
    assert!(!controller.is_alive());
    assert!(!controller.is_started());
}

#[test]
fn viewer_can_be_restarted_after_close() {
    let dir = tempfile::tempdir().unwrap();
    let controller = controller_for(dir.path());

    controller.start().unwrap();
    assert!(controller.wait_until_started(Duration::from_secs(10)));
    controller.close();
    assert!(!controller.is_alive());

    // A close leaves should_quit set; restart must clear it or the fresh
    // viewer would exit immediately.
    controller.restart().unwrap();
    assert!(controller.wait_until_started(Duration::from_secs(10)));
    assert!(controller.is_alive());
    controller.close();
}

#[test]
fn pushes_into_dead_viewer_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let controller = controller_for(dir.path());

    controller.start().unwrap();
    assert!(controller.wait_until_started(Duration::from_secs(10)));
    controller.close();

    let handle = controller.handle();
    let outcome = handle.push(&white(8, 8), PushOptions::default()).unwrap();
    assert!(matches!(outcome, PushOutcome::Skipped(_)));
}
