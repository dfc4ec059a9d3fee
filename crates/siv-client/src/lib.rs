//! Producer-side API for the shared-memory image viewer.
//!
//! Instrumented code pushes frames through a [`ProducerHandle`]; a
//! [`ViewerController`] owns the slot file and the viewer process. Pushes
//! never block on rendering and become no-ops when no viewer is running.

pub mod controller;
pub mod producer;

pub use controller::{ControllerConfig, ControllerError, ViewerController};
pub use producer::{ProducerHandle, PushError, PushOptions, PushOutcome, SkipReason};
