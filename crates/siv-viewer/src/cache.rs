//! Texture cache keyed by image name.
//!
//! Decouples "new pixels arrived" (compute thread) from "GPU texture
//! updated" (whichever thread holds the render context): entries track
//! their last-known dimensions so a same-size update overwrites existing
//! GPU storage instead of reallocating it.

use std::collections::HashMap;

use siv_image::{Dtype, Image, Samples};

use crate::backend::{DevicePixels, RenderError, Renderer, TextureId};

/// How [`TextureCache::draw`] sizes the image within the available area.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum DrawLayout {
    /// Fixed scale factor applied to the pixel dimensions.
    Scale(f32),
    /// Fill the available width, height follows the aspect ratio.
    FillWidth,
    /// Largest size that fits the available area, preserving aspect ratio.
    Fit,
}

#[derive(Debug)]
struct TextureEntry {
    id: TextureId,
    width: u32,
    height: u32,
}

/// String-keyed map of GPU textures; one entry per independently-updated
/// image in the window.
#[derive(Debug, Default)]
pub struct TextureCache {
    entries: HashMap<String, TextureEntry>,
    reallocations: u64,
}

impl TextureCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of allocation events so far (first uploads included).
    /// Same-dimension re-uploads do not count.
    pub fn reallocations(&self) -> u64 {
        self.reallocations
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Uploads `image` for `key` from host memory.
    ///
    /// After the call returns, the texture for `key` reflects `image`.
    pub fn upload<R: Renderer>(
        &mut self,
        renderer: &mut R,
        key: &str,
        image: &Image,
    ) -> Result<(), RenderError> {
        self.upload_inner(renderer, key, image, None)
    }

    /// Uploads for `key`, preferring the renderer's zero-copy device path.
    ///
    /// `image` must hold the same pixels in host memory; it is used
    /// whenever the renderer reports no device interop, so correctness
    /// never depends on which path ran.
    pub fn upload_device<R: Renderer>(
        &mut self,
        renderer: &mut R,
        key: &str,
        image: &Image,
        device: DevicePixels,
    ) -> Result<(), RenderError> {
        self.upload_inner(renderer, key, image, Some(device))
    }

    fn upload_inner<R: Renderer>(
        &mut self,
        renderer: &mut R,
        key: &str,
        image: &Image,
        device: Option<DevicePixels>,
    ) -> Result<(), RenderError> {
        // Renderers take 8-bit samples; single-channel images are widened
        // to three channels so a grayscale frame displays as gray, not as
        // a one-channel format the backend may not support.
        let canonical = image.normalized(Dtype::U8);
        let shape = canonical.shape();
        let (bytes, channels) = match canonical.samples() {
            Samples::U8(v) if shape.channels == 1 => {
                let mut rgb = Vec::with_capacity(v.len() * 3);
                for &s in v {
                    rgb.extend_from_slice(&[s, s, s]);
                }
                (rgb, 3)
            }
            Samples::U8(v) => (v.clone(), shape.channels),
            // normalized(U8) always yields u8 samples.
            Samples::F32(_) => unreachable!("normalized to u8"),
        };

        let id = match self.entries.get(key) {
            Some(entry) if entry.width == shape.width && entry.height == shape.height => entry.id,
            existing => {
                if let Some(entry) = existing {
                    renderer.destroy(entry.id);
                }
                let id = renderer.create_texture()?;
                self.reallocations += 1;
                self.entries.insert(
                    key.to_string(),
                    TextureEntry {
                        id,
                        width: shape.width,
                        height: shape.height,
                    },
                );
                id
            }
        };

        if let Some(pixels) = device {
            if renderer.upload_from_device(id, pixels, shape.width, shape.height, channels)? {
                return Ok(());
            }
        }
        renderer.upload(id, &bytes, shape.width, shape.height, channels)
    }

    /// Draws the texture for `key` sized per `layout` into `avail`
    /// (width, height in pixels). No-op when the key is absent.
    pub fn draw<R: Renderer>(
        &self,
        renderer: &mut R,
        key: &str,
        layout: DrawLayout,
        avail: (f32, f32),
    ) -> Result<(), RenderError> {
        let Some(entry) = self.entries.get(key) else {
            return Ok(());
        };
        let (w, h) = (entry.width as f32, entry.height as f32);
        let scale = match layout {
            DrawLayout::Scale(s) => s,
            DrawLayout::FillWidth => avail.0 / w,
            DrawLayout::Fit => (avail.0 / w).min(avail.1 / h),
        };
        renderer.draw(entry.id, 0.0, 0.0, w * scale, h * scale)
    }

    /// Destroys every entry. Called on viewer shutdown while the render
    /// context is held.
    pub fn clear<R: Renderer>(&mut self, renderer: &mut R) {
        for (_, entry) in self.entries.drain() {
            renderer.destroy(entry.id);
        }
    }
}
