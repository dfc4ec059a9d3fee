//! In-process producer/viewer round trip through the facade crate.

use std::sync::Arc;
use std::time::{Duration, Instant};

use siv::client::{ProducerHandle, PushOptions, PushOutcome};
use siv::image::{Dtype, Image, Samples};
use siv::shared::SharedImageSlot;
use siv::viewer::headless::{HeadlessRenderer, HeadlessWindow};
use siv::viewer::viewer::{PollIntervals, Viewer, ViewerConfig};

#[test]
fn producer_frame_reaches_viewer_texture() {
    let dir = tempfile::tempdir().unwrap();
    let slot = Arc::new(SharedImageSlot::create_in_memory(100 * 100 * 3, Dtype::U8).unwrap());
    let handle = ProducerHandle::new(slot.clone());

    let renderer = HeadlessRenderer::new();
    let stats = renderer.stats();
    let last_upload = renderer.last_upload_handle();
    let config = ViewerConfig {
        title: "in process".into(),
        key: "frame".into(),
        intervals: PollIntervals {
            idle: Duration::from_millis(1),
            paused: Duration::from_millis(1),
        },
        settings_path: Some(dir.path().join("viewer.ini")),
        start_hidden: false,
    };
    let viewer = Viewer::new(
        slot.clone(),
        config,
        renderer,
        HeadlessWindow::new(Duration::from_millis(1)),
    );
    let ui = std::thread::spawn(move || viewer.run());

    let deadline = Instant::now() + Duration::from_secs(5);
    while !slot.started() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(slot.started());

    let white = Image::from_hwc(50, 50, 3, Samples::F32(vec![1.0; 50 * 50 * 3])).unwrap();
    let outcome = handle.push(&white, PushOptions::default()).unwrap();
    assert_eq!(outcome, PushOutcome::Written);

    while stats.uploads.load(std::sync::atomic::Ordering::SeqCst) == 0
        && Instant::now() < deadline
    {
        std::thread::sleep(Duration::from_millis(1));
    }
    slot.set_should_quit(true);
    ui.join().unwrap().unwrap();

    // Float input normalized to all-255 bytes on the way to the texture.
    let upload = last_upload.lock().unwrap().clone().unwrap();
    assert_eq!((upload.width, upload.height, upload.channels), (50, 50, 3));
    assert!(upload.bytes.iter().all(|&b| b == 255));
}
