//! Collaborator traits for the viewer process.
//!
//! Actual rendering and windowing are supplied by the embedder; the viewer
//! core only needs the narrow surfaces below. The crate ships an in-memory
//! implementation ([`crate::headless`]) used by tests and the standalone
//! binary.

use thiserror::Error;

/// Opaque handle to a GPU-resident texture, issued by a [`Renderer`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TextureId(pub u64);

/// Descriptor for pixel data already resident in compute-device memory
/// (the zero-copy upload fast path).
#[derive(Copy, Clone, Debug)]
pub struct DevicePixels {
    /// Device address of the first byte, as reported by the compute stack.
    pub device_ptr: u64,
    pub byte_len: usize,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("renderer: {0}")]
    Backend(String),
}

/// Drawing capability owned by the viewer's render side.
///
/// Implementations are only ever called while the render-context lock is
/// held, so they may assume single-threaded access per call.
pub trait Renderer {
    fn create_texture(&mut self) -> Result<TextureId, RenderError>;

    /// Uploads interleaved pixel bytes (`width * height * channels`) into
    /// `id`, (re)allocating GPU storage as needed for the dimensions.
    fn upload(
        &mut self,
        id: TextureId,
        bytes: &[u8],
        width: u32,
        height: u32,
        channels: u32,
    ) -> Result<(), RenderError>;

    /// Optional zero-copy upload from device memory.
    ///
    /// Returns `Ok(false)` when the renderer has no device interop; callers
    /// must then fall back to the host-memory [`Renderer::upload`] path.
    fn upload_from_device(
        &mut self,
        _id: TextureId,
        _pixels: DevicePixels,
        _width: u32,
        _height: u32,
        _channels: u32,
    ) -> Result<bool, RenderError> {
        Ok(false)
    }

    fn draw(
        &mut self,
        id: TextureId,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    ) -> Result<(), RenderError>;

    fn destroy(&mut self, id: TextureId);
}

/// Window-system events the viewer loop reacts to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WindowEvent {
    CloseRequested,
    KeyPressed(Key),
    Resized { width: u32, height: u32 },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Key {
    Escape,
    Pause,
}

#[derive(Debug, Error)]
pub enum WindowError {
    /// The current frame cannot be rendered (e.g. no monitor while
    /// toggling modes); the loop skips the frame and retries.
    #[error("transient windowing error: {0}")]
    Transient(String),

    /// Window or context creation failed; viewer startup aborts.
    #[error("fatal windowing error: {0}")]
    Fatal(String),
}

/// Parameters for opening the viewer window, filled from persisted
/// settings plus the viewer config.
#[derive(Clone, Debug)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub pos_x: i32,
    pub pos_y: i32,
    pub maximized: bool,
    pub fullscreen: bool,
    pub visible: bool,
}

/// Windowing capability owned by the UI thread.
pub trait WindowSystem {
    fn open(&mut self, config: &WindowConfig) -> Result<(), WindowError>;

    fn poll_events(&mut self) -> Vec<WindowEvent>;

    fn size(&self) -> (u32, u32);

    fn position(&self) -> (i32, i32);

    fn is_maximized(&self) -> bool;

    fn set_visible(&mut self, visible: bool);

    /// Makes the rendering context current for this frame.
    fn begin_frame(&mut self) -> Result<(), WindowError>;

    /// Presents the frame rendered since [`WindowSystem::begin_frame`].
    fn present(&mut self);

    fn close(&mut self);
}
