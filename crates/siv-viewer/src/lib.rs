//! Viewer-process internals: event loop, compute thread, texture cache.
//!
//! The viewer runs in its own OS process so a heavy render loop never
//! competes with the producer's work. This crate is backend-agnostic:
//! embedders provide [`backend::Renderer`] and [`backend::WindowSystem`],
//! while tests and the standalone binary use [`headless`].

pub mod backend;
pub mod cache;
pub mod context;
pub mod headless;
pub mod settings;
pub mod viewer;

pub use backend::{Renderer, WindowSystem};
pub use cache::{DrawLayout, TextureCache};
pub use context::RenderLock;
pub use settings::WindowSettings;
pub use viewer::{Lifecycle, PollIntervals, Viewer, ViewerConfig, ViewerError};
