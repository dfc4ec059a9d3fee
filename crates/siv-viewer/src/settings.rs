//! Window geometry persisted across viewer runs.
//!
//! A tiny line-oriented format rather than a structured config: the file
//! is written and read only by the viewer itself, and a corrupt or missing
//! file just means default geometry.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tracing::debug;

#[derive(Clone, Debug, PartialEq)]
pub struct WindowSettings {
    pub width: u32,
    pub height: u32,
    pub pos: (i32, i32),
    pub maximized: bool,
    pub ui_scale: f32,
    pub fullscreen: bool,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            pos: (50, 50),
            maximized: false,
            ui_scale: 1.0,
            fullscreen: false,
        }
    }
}

impl WindowSettings {
    /// Reads settings from `path`, falling back to defaults when the file
    /// is absent or unparseable.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => match Self::parse(&text) {
                Some(settings) => settings,
                None => {
                    debug!(path = %path.display(), "malformed settings file, using defaults");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.serialize())
    }

    // One field group per line: "w h", "x y", maximized, ui_scale,
    // fullscreen. Order is part of the format.
    fn serialize(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{} {}", self.width, self.height);
        let _ = writeln!(out, "{} {}", self.pos.0, self.pos.1);
        let _ = writeln!(out, "{}", self.maximized as u8);
        let _ = writeln!(out, "{}", self.ui_scale);
        let _ = writeln!(out, "{}", self.fullscreen as u8);
        out
    }

    fn parse(text: &str) -> Option<Self> {
        let mut lines = text.lines();
        let mut size = lines.next()?.split_whitespace();
        let width = size.next()?.parse().ok()?;
        let height = size.next()?.parse().ok()?;
        let mut pos = lines.next()?.split_whitespace();
        let pos = (pos.next()?.parse().ok()?, pos.next()?.parse().ok()?);
        let maximized = lines.next()?.trim() == "1";
        let ui_scale = lines.next()?.trim().parse().ok()?;
        let fullscreen = lines.next()?.trim() == "1";
        if width == 0 || height == 0 || !(0.1..=10.0).contains(&ui_scale) {
            return None;
        }
        Some(Self {
            width,
            height,
            pos,
            maximized,
            ui_scale,
            fullscreen,
        })
    }
}

/// Settings filename for a window title: lowercased alphanumerics plus
/// `.ini`, so "Image Viewer" and "image viewer" share a file.
pub fn settings_path_for_title(dir: &Path, title: &str) -> PathBuf {
    let stem: String = title
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    let stem = if stem.is_empty() { "viewer".into() } else { stem };
    dir.join(format!("{stem}.ini"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("viewer.ini");
        let settings = WindowSettings {
            width: 1920,
            height: 1080,
            pos: (-8, 240),
            maximized: true,
            ui_scale: 1.5,
            fullscreen: false,
        };
        settings.save(&path).unwrap();
        assert_eq!(WindowSettings::load(&path), settings);
    }

    #[test]
    fn serialized_field_order_is_stable() {
        let text = WindowSettings::default().serialize();
        assert_eq!(text, "1280 720\n50 50\n0\n1\n0\n");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = WindowSettings::load(&dir.path().join("nope.ini"));
        assert_eq!(loaded, WindowSettings::default());
    }

    #[test]
    fn malformed_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("viewer.ini");
        for bad in ["", "garbage", "100 100\n50", "0 0\n0 0\n0\n1\n0\n"] {
            std::fs::write(&path, bad).unwrap();
            assert_eq!(WindowSettings::load(&path), WindowSettings::default());
        }
    }

    #[test]
    fn title_maps_to_lowercased_alphanumeric_filename() {
        let dir = Path::new("/tmp");
        assert_eq!(
            settings_path_for_title(dir, "Image Viewer #2"),
            dir.join("imageviewer2.ini")
        );
        assert_eq!(settings_path_for_title(dir, "***"), dir.join("viewer.ini"));
    }
}
