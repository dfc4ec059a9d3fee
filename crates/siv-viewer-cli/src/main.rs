//! Standalone viewer executable.
//!
//! Spawned by `ViewerController` against an existing slot file. Runs the
//! viewer loop on the headless backend; embedders wanting a real window
//! wire their own `WindowSystem`/`Renderer` into `siv_viewer::Viewer`
//! instead of spawning this binary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use siv_shared::SharedImageSlot;
use siv_viewer::headless::{HeadlessRenderer, HeadlessWindow};
use siv_viewer::viewer::{PollIntervals, Viewer, ViewerConfig};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "siv-viewer", about = "Shared-memory image viewer process")]
struct Args {
    /// Slot file created by the controlling process.
    #[arg(long)]
    slot_path: PathBuf,

    /// Window title.
    #[arg(long, default_value = "siv")]
    title: String,

    /// Texture key frames are published under.
    #[arg(long, default_value = "default_image")]
    key: String,

    /// Start with the window hidden.
    #[arg(long)]
    hidden: bool,

    /// Compute-thread sleep between polls when idle, in milliseconds.
    #[arg(long, default_value_t = 12)]
    idle_ms: u64,

    /// Compute-thread sleep between polls while paused, in milliseconds.
    #[arg(long, default_value_t = 50)]
    paused_ms: u64,

    /// Window-settings file; derived from the title by default.
    #[arg(long)]
    settings: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let slot = SharedImageSlot::open_file(&args.slot_path)
        .with_context(|| format!("opening slot file {}", args.slot_path.display()))?;
    info!(path = %args.slot_path.display(), "slot file opened");

    let config = ViewerConfig {
        title: args.title,
        key: args.key,
        intervals: PollIntervals {
            idle: Duration::from_millis(args.idle_ms),
            paused: Duration::from_millis(args.paused_ms),
        },
        settings_path: args.settings,
        start_hidden: args.hidden,
    };
    let window = HeadlessWindow::new(Duration::from_millis(args.idle_ms));
    Viewer::new(Arc::new(slot), config, HeadlessRenderer::new(), window)
        .run()
        .context("viewer loop failed")?;
    Ok(())
}
