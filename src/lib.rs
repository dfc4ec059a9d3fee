//! Shared-memory single-image inspection viewer.
//!
//! Facade over the workspace crates: producing code depends on this crate
//! and uses [`client`] to spawn a viewer and push frames; the `siv-viewer`
//! binary lives in its own crate and is spawned as a separate process.
//!
//! ```no_run
//! use siv::client::{ControllerConfig, PushOptions, ViewerController};
//! use siv::image::{Image, Samples};
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let controller = ViewerController::new(ControllerConfig::default())?;
//! controller.start()?;
//! controller.wait_until_started(Duration::from_secs(5));
//!
//! let frame = Image::from_hwc(64, 64, 3, Samples::U8(vec![255; 64 * 64 * 3]))?;
//! controller.handle().push(&frame, PushOptions::default())?;
//! # Ok(())
//! # }
//! ```

pub use siv_client as client;
pub use siv_image as image;
pub use siv_shared as shared;
pub use siv_viewer as viewer;

pub use siv_client::{ControllerConfig, ProducerHandle, ViewerController};
pub use siv_image::Image;
pub use siv_shared::SharedImageSlot;
