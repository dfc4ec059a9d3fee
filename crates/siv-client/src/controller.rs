//! Lifecycle management for the viewer process.
//!
//! The controller owns the slot file, spawns the `siv-viewer` executable
//! against it, and exposes show/hide/restart/close without any global
//! state: callers construct a controller and pass its [`ProducerHandle`]
//! to wherever frames are produced.

use std::path::PathBuf;
use std::process::{Child, Command};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use siv_image::Dtype;
use siv_shared::{layout::DEFAULT_CAPACITY_SAMPLES, SharedImageSlot, SlotError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::producer::ProducerHandle;

#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Viewer window title.
    pub title: String,
    /// Texture key the viewer publishes frames under. Defaults to a
    /// per-process random value so concurrent controllers do not collide.
    pub key: String,
    pub capacity: u32,
    pub dtype: Dtype,
    pub idle_ms: u64,
    pub paused_ms: u64,
    /// Executable to spawn; resolved through `PATH` unless absolute.
    pub viewer_program: PathBuf,
    /// Slot file location; a temp-dir path derived from `key` by default.
    pub slot_path: Option<PathBuf>,
    pub settings_path: Option<PathBuf>,
    pub start_hidden: bool,
    /// Poll interval for [`ViewerController::wait_until_started`].
    pub startup_poll: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            title: "siv".to_string(),
            key: random_key(),
            capacity: DEFAULT_CAPACITY_SAMPLES,
            dtype: Dtype::U8,
            idle_ms: 12,
            paused_ms: 50,
            viewer_program: PathBuf::from("siv-viewer"),
            slot_path: None,
            settings_path: None,
            start_hidden: false,
            startup_poll: Duration::from_millis(100),
        }
    }
}

// Unique enough across processes and repeated runs; not security-relevant.
fn random_key() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    format!("{:x}-{:x}", std::process::id(), nanos)
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Slot(#[from] SlotError),
    #[error("failed to spawn viewer process `{program}`: {source}")]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },
}

/// Spawns and supervises one viewer process over one slot file.
pub struct ViewerController {
    config: ControllerConfig,
    slot: Arc<SharedImageSlot>,
    slot_path: PathBuf,
    child: Arc<Mutex<Option<Child>>>,
}

impl ViewerController {
    /// Creates the slot file; does not spawn the viewer yet.
    pub fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        let slot_path = config.slot_path.clone().unwrap_or_else(|| {
            std::env::temp_dir().join(format!("siv-{}.slot", config.key))
        });
        let slot = SharedImageSlot::create_file(&slot_path, config.capacity, config.dtype)?;
        debug!(path = %slot_path.display(), "slot file created");
        Ok(Self {
            config,
            slot: Arc::new(slot),
            slot_path,
            child: Arc::new(Mutex::new(None)),
        })
    }

    pub fn slot(&self) -> &Arc<SharedImageSlot> {
        &self.slot
    }

    /// Producer handle bound to this controller's slot and child process.
    pub fn handle(&self) -> ProducerHandle {
        ProducerHandle::with_child(self.slot.clone(), self.child.clone())
    }

    /// Spawns the viewer executable. The slot's startup flags are reset
    /// first so a viewer closed earlier (which leaves `should_quit` set)
    /// can be started again.
    pub fn start(&self) -> Result<(), ControllerError> {
        self.slot.reset_for_start();
        if self.config.start_hidden {
            self.slot.set_hidden(true);
        }

        let mut command = Command::new(&self.config.viewer_program);
        command
            .arg("--slot-path")
            .arg(&self.slot_path)
            .arg("--title")
            .arg(&self.config.title)
            .arg("--key")
            .arg(&self.config.key)
            .arg("--idle-ms")
            .arg(self.config.idle_ms.to_string())
            .arg("--paused-ms")
            .arg(self.config.paused_ms.to_string());
        if let Some(settings) = &self.config.settings_path {
            command.arg("--settings").arg(settings);
        }
        if self.config.start_hidden {
            command.arg("--hidden");
        }

        let child = command.spawn().map_err(|source| ControllerError::Spawn {
            program: self.config.viewer_program.clone(),
            source,
        })?;
        info!(pid = child.id(), "viewer process spawned");
        *self.child.lock().unwrap_or_else(|e| e.into_inner()) = Some(child);
        Ok(())
    }

    /// Polls the shared `started` flag until set or `timeout` elapses.
    /// Returns the final flag value; a timeout is not an error.
    pub fn wait_until_started(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.slot.started() {
            if Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(self.config.startup_poll);
        }
        self.slot.started()
    }

    pub fn is_started(&self) -> bool {
        self.slot.started()
    }

    /// Whether the spawned viewer process is still running.
    pub fn is_alive(&self) -> bool {
        let mut guard = self.child.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_mut() {
            None => false,
            Some(child) => match child.try_wait() {
                Ok(None) => true,
                Ok(Some(_)) => false,
                Err(err) => {
                    warn!(error = %err, "viewer liveness probe failed");
                    false
                }
            },
        }
    }

    /// Unhides the viewer window. No respawn; the flag is synced by the
    /// viewer's event loop.
    pub fn show(&self) {
        self.slot.set_hidden(false);
    }

    pub fn hide(&self) {
        self.slot.set_hidden(true);
    }

    /// Stops the current viewer if alive, then spawns a fresh one.
    pub fn restart(&self) -> Result<(), ControllerError> {
        if self.is_alive() {
            self.close();
        }
        self.start()
    }

    /// Asks the viewer to quit and waits for the process to exit.
    /// Idempotent; safe to call with no viewer running.
    pub fn close(&self) {
        self.slot.set_should_quit(true);
        let child = self.child.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(mut child) = child {
            match child.wait() {
                Ok(status) => debug!(%status, "viewer process exited"),
                Err(err) => warn!(error = %err, "failed to reap viewer process"),
            }
        }
    }

    /// Last window size reported by the viewer.
    pub fn window_size(&self) -> (u32, u32) {
        self.slot.window_size()
    }
}

impl Drop for ViewerController {
    fn drop(&mut self) {
        self.close();
        if let Err(err) = std::fs::remove_file(&self.slot_path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %err, path = %self.slot_path.display(), "failed to remove slot file");
            }
        }
    }
}
