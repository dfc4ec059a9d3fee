//! In-memory windowing/rendering backend.
//!
//! Stands in for an embedder-provided backend in tests and in the
//! standalone `siv-viewer` binary: the loop, texture cache, and process
//! topology all run for real, only the draw calls go nowhere.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::backend::{
    Key, RenderError, Renderer, TextureId, WindowConfig, WindowError, WindowEvent, WindowSystem,
};

/// Counters shared between a headless backend and the test observing it.
#[derive(Debug, Default)]
pub struct HeadlessStats {
    pub frames_presented: AtomicU64,
    pub begin_frame_failures: AtomicU64,
    pub textures_created: AtomicU64,
    pub textures_destroyed: AtomicU64,
    pub uploads: AtomicU64,
    pub draws: AtomicU64,
}

/// Shape of the most recent upload, recorded for assertions.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedUpload {
    pub id: TextureId,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub bytes: Vec<u8>,
}

/// Rectangle of the most recent draw call, recorded for assertions.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RecordedDraw {
    pub id: TextureId,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

pub struct HeadlessRenderer {
    next_id: u64,
    alive: HashMap<TextureId, ()>,
    stats: Arc<HeadlessStats>,
    last_upload: Arc<Mutex<Option<RecordedUpload>>>,
    last_draw: Arc<Mutex<Option<RecordedDraw>>>,
}

impl HeadlessRenderer {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            alive: HashMap::new(),
            stats: Arc::new(HeadlessStats::default()),
            last_upload: Arc::new(Mutex::new(None)),
            last_draw: Arc::new(Mutex::new(None)),
        }
    }

    pub fn stats(&self) -> Arc<HeadlessStats> {
        self.stats.clone()
    }

    pub fn last_upload_handle(&self) -> Arc<Mutex<Option<RecordedUpload>>> {
        self.last_upload.clone()
    }

    pub fn last_draw_handle(&self) -> Arc<Mutex<Option<RecordedDraw>>> {
        self.last_draw.clone()
    }
}

impl Default for HeadlessRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for HeadlessRenderer {
    fn create_texture(&mut self) -> Result<TextureId, RenderError> {
        let id = TextureId(self.next_id);
        self.next_id += 1;
        self.alive.insert(id, ());
        self.stats.textures_created.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    fn upload(
        &mut self,
        id: TextureId,
        bytes: &[u8],
        width: u32,
        height: u32,
        channels: u32,
    ) -> Result<(), RenderError> {
        if !self.alive.contains_key(&id) {
            return Err(RenderError::Backend(format!("unknown texture {id:?}")));
        }
        self.stats.uploads.fetch_add(1, Ordering::SeqCst);
        *self.last_upload.lock().unwrap() = Some(RecordedUpload {
            id,
            width,
            height,
            channels,
            bytes: bytes.to_vec(),
        });
        Ok(())
    }

    fn draw(
        &mut self,
        id: TextureId,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    ) -> Result<(), RenderError> {
        if !self.alive.contains_key(&id) {
            return Err(RenderError::Backend(format!("unknown texture {id:?}")));
        }
        self.stats.draws.fetch_add(1, Ordering::SeqCst);
        *self.last_draw.lock().unwrap() = Some(RecordedDraw {
            id,
            x,
            y,
            width,
            height,
        });
        Ok(())
    }

    fn destroy(&mut self, id: TextureId) {
        if self.alive.remove(&id).is_some() {
            self.stats.textures_destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Cloneable event injector for a [`HeadlessWindow`].
#[derive(Clone)]
pub struct HeadlessEvents(Arc<Mutex<VecDeque<WindowEvent>>>);

impl HeadlessEvents {
    pub fn push(&self, event: WindowEvent) {
        self.0.lock().unwrap().push_back(event);
    }

    pub fn press(&self, key: Key) {
        self.push(WindowEvent::KeyPressed(key));
    }

    pub fn request_close(&self) {
        self.push(WindowEvent::CloseRequested);
    }
}

pub struct HeadlessWindow {
    size: (u32, u32),
    position: (i32, i32),
    maximized: bool,
    visible: Arc<AtomicBool>,
    open: bool,
    /// Paces the frame loop in place of vsync.
    frame_interval: Duration,
    events: Arc<Mutex<VecDeque<WindowEvent>>>,
    /// Injected `begin_frame` failures, consumed front to back.
    forced_frame_errors: Arc<Mutex<VecDeque<WindowError>>>,
    stats: Arc<HeadlessStats>,
}

impl HeadlessWindow {
    pub fn new(frame_interval: Duration) -> Self {
        Self {
            size: (0, 0),
            position: (0, 0),
            maximized: false,
            visible: Arc::new(AtomicBool::new(true)),
            open: false,
            frame_interval,
            events: Arc::new(Mutex::new(VecDeque::new())),
            forced_frame_errors: Arc::new(Mutex::new(VecDeque::new())),
            stats: Arc::new(HeadlessStats::default()),
        }
    }

    pub fn events(&self) -> HeadlessEvents {
        HeadlessEvents(self.events.clone())
    }

    pub fn stats(&self) -> Arc<HeadlessStats> {
        self.stats.clone()
    }

    /// Shared view of the window's visibility, for observing
    /// [`WindowSystem::set_visible`] from another thread.
    pub fn visibility(&self) -> Arc<AtomicBool> {
        self.visible.clone()
    }

    /// Queues an error for the next `begin_frame` call.
    pub fn fail_next_frame(&self, error: WindowError) {
        self.forced_frame_errors.lock().unwrap().push_back(error);
    }
}

impl WindowSystem for HeadlessWindow {
    fn open(&mut self, config: &WindowConfig) -> Result<(), WindowError> {
        self.size = (config.width, config.height);
        self.position = (config.pos_x, config.pos_y);
        self.maximized = config.maximized;
        self.visible.store(config.visible, Ordering::SeqCst);
        self.open = true;
        Ok(())
    }

    fn poll_events(&mut self) -> Vec<WindowEvent> {
        self.events.lock().unwrap().drain(..).collect()
    }

    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn position(&self) -> (i32, i32) {
        self.position
    }

    fn is_maximized(&self) -> bool {
        self.maximized
    }

    fn set_visible(&mut self, visible: bool) {
        self.visible.store(visible, Ordering::SeqCst);
    }

    fn begin_frame(&mut self) -> Result<(), WindowError> {
        if let Some(err) = self.forced_frame_errors.lock().unwrap().pop_front() {
            self.stats.begin_frame_failures.fetch_add(1, Ordering::SeqCst);
            return Err(err);
        }
        if !self.open {
            return Err(WindowError::Fatal("window not open".into()));
        }
        Ok(())
    }

    fn present(&mut self) {
        self.stats.frames_presented.fetch_add(1, Ordering::SeqCst);
        if !self.frame_interval.is_zero() {
            std::thread::sleep(self.frame_interval);
        }
    }

    fn close(&mut self) {
        self.open = false;
    }
}
