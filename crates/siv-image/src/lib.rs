//! Image value model shared by the producer API and the viewer process.
//!
//! Images handed to the slot are always *canonical*: interleaved
//! height-width-channel ("HWC") layout with one of two sample types
//! ([`Dtype::U8`] in 0..=255 or [`Dtype::F32`] in 0.0..=1.0). Callers may
//! start from planar channel-height-width data ([`Image::from_chw`]); the
//! constructor transposes it up front so everything downstream only ever
//! sees one layout.

use std::borrow::Cow;

use thiserror::Error;

/// Sample type stored in the shared slot. Fixed per viewer instance.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum Dtype {
    /// 8-bit unsigned samples, canonical range 0..=255.
    U8 = 0,
    /// 32-bit float samples (little-endian on the wire), canonical range 0.0..=1.0.
    F32 = 1,
}

impl Dtype {
    /// Size of one sample in bytes.
    pub fn sample_size(self) -> usize {
        match self {
            Dtype::U8 => 1,
            Dtype::F32 => 4,
        }
    }

    /// Wire-stable code used in the shared header.
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Dtype::U8),
            1 => Some(Dtype::F32),
            _ => None,
        }
    }
}

/// Shape of a canonical (interleaved) image.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ImageShape {
    pub height: u32,
    pub width: u32,
    pub channels: u32,
}

impl ImageShape {
    pub fn new(height: u32, width: u32, channels: u32) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    /// Total number of samples (`h*w*c`), computed without intermediate overflow.
    pub fn sample_count(&self) -> u64 {
        self.height as u64 * self.width as u64 * self.channels as u64
    }
}

/// Raw sample storage for one image.
#[derive(Clone, Debug, PartialEq)]
pub enum Samples {
    U8(Vec<u8>),
    F32(Vec<f32>),
}

impl Samples {
    pub fn len(&self) -> usize {
        match self {
            Samples::U8(v) => v.len(),
            Samples::F32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> Dtype {
        match self {
            Samples::U8(_) => Dtype::U8,
            Samples::F32(_) => Dtype::F32,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageError {
    #[error("sample buffer length {actual} does not match shape product {expected}")]
    LengthMismatch { expected: u64, actual: usize },

    #[error("unsupported channel count {0} (expected 1..=4)")]
    BadChannels(u32),

    #[error("image has a zero-sized dimension")]
    ZeroDim,

    #[error("image of {0} samples does not fit in host memory")]
    TooLarge(u64),

    #[error("byte buffer length {len} is not a whole number of {dtype:?} samples")]
    RaggedBytes { len: usize, dtype: Dtype },
}

/// A canonical interleaved image: shape plus samples, always HWC.
#[derive(Clone, Debug, PartialEq)]
pub struct Image {
    shape: ImageShape,
    samples: Samples,
}

impl Image {
    /// Builds an image from interleaved (height, width, channel) data.
    pub fn from_hwc(
        height: u32,
        width: u32,
        channels: u32,
        samples: Samples,
    ) -> Result<Self, ImageError> {
        let shape = ImageShape::new(height, width, channels);
        validate(shape, &samples)?;
        Ok(Self { shape, samples })
    }

    /// Builds an image from planar (channel, height, width) data.
    ///
    /// The samples are transposed into the canonical interleaved layout, so
    /// planar `(3, 64, 128)` input becomes interleaved `(64, 128, 3)` with
    /// element `[y, x, :]` holding the three planar channel values at
    /// spatial position `(y, x)`.
    pub fn from_chw(
        channels: u32,
        height: u32,
        width: u32,
        samples: Samples,
    ) -> Result<Self, ImageError> {
        let shape = ImageShape::new(height, width, channels);
        validate(shape, &samples)?;
        let samples = match samples {
            Samples::U8(v) => Samples::U8(transpose_chw(channels, height, width, &v)),
            Samples::F32(v) => Samples::F32(transpose_chw(channels, height, width, &v)),
        };
        Ok(Self { shape, samples })
    }

    pub fn shape(&self) -> ImageShape {
        self.shape
    }

    pub fn dtype(&self) -> Dtype {
        self.samples.dtype()
    }

    pub fn samples(&self) -> &Samples {
        &self.samples
    }

    /// Converts samples to the canonical range of `target`.
    ///
    /// The rule is fixed (and matches what producers expect from the
    /// original tool): data already in the canonical range is borrowed
    /// back without copying; float data whose maximum exceeds 1.0 is
    /// assumed to be in 0..=255 and rescaled; everything else is clamped
    /// to the target range.
    ///
    /// - target `U8`: u8 passes through; f32 with max <= 1.0 is scaled by
    ///   255; other f32 is clamped to [0, 255]; the result is rounded.
    /// - target `F32`: f32 already in [0, 1] passes through; f32 with
    ///   max > 1.0 is divided by 255 and clamped to [0, 1]; u8 is divided
    ///   by 255.
    pub fn normalized(&self, target: Dtype) -> Cow<'_, Image> {
        let samples = match (&self.samples, target) {
            (Samples::U8(_), Dtype::U8) => return Cow::Borrowed(self),
            (Samples::F32(v), Dtype::F32)
                if v.iter().all(|&s| (0.0..=1.0).contains(&s)) =>
            {
                return Cow::Borrowed(self);
            }
            (Samples::U8(v), Dtype::F32) => {
                Samples::F32(v.iter().map(|&s| s as f32 / 255.0).collect())
            }
            (Samples::F32(v), target) => {
                let assumed_unit = max_sample(v) <= 1.0;
                match target {
                    Dtype::U8 => Samples::U8(
                        v.iter()
                            .map(|&s| {
                                let s = if assumed_unit { s * 255.0 } else { s };
                                s.clamp(0.0, 255.0).round() as u8
                            })
                            .collect(),
                    ),
                    Dtype::F32 => Samples::F32(
                        v.iter()
                            .map(|&s| {
                                let s = if assumed_unit { s } else { s / 255.0 };
                                s.clamp(0.0, 1.0)
                            })
                            .collect(),
                    ),
                }
            }
        };
        Cow::Owned(Image {
            shape: self.shape,
            samples,
        })
    }

    /// Raw little-endian sample bytes, as written into the shared slot.
    pub fn to_le_bytes(&self) -> Cow<'_, [u8]> {
        match &self.samples {
            Samples::U8(v) => Cow::Borrowed(v.as_slice()),
            Samples::F32(v) => {
                let mut out = Vec::with_capacity(v.len() * 4);
                for s in v {
                    out.extend_from_slice(&s.to_le_bytes());
                }
                Cow::Owned(out)
            }
        }
    }

    /// Rebuilds an image from slot bytes. Inverse of [`Image::to_le_bytes`].
    pub fn from_le_bytes(shape: ImageShape, dtype: Dtype, bytes: &[u8]) -> Result<Self, ImageError> {
        let samples = match dtype {
            Dtype::U8 => Samples::U8(bytes.to_vec()),
            Dtype::F32 => {
                if bytes.len() % 4 != 0 {
                    return Err(ImageError::RaggedBytes {
                        len: bytes.len(),
                        dtype,
                    });
                }
                Samples::F32(
                    bytes
                        .chunks_exact(4)
                        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                        .collect(),
                )
            }
        };
        Image::from_hwc(shape.height, shape.width, shape.channels, samples)
    }
}

fn validate(shape: ImageShape, samples: &Samples) -> Result<(), ImageError> {
    if shape.height == 0 || shape.width == 0 || shape.channels == 0 {
        return Err(ImageError::ZeroDim);
    }
    if shape.channels > 4 {
        return Err(ImageError::BadChannels(shape.channels));
    }
    let expected = shape.sample_count();
    if usize::try_from(expected).is_err() {
        return Err(ImageError::TooLarge(expected));
    }
    if samples.len() as u64 != expected {
        return Err(ImageError::LengthMismatch {
            expected,
            actual: samples.len(),
        });
    }
    Ok(())
}

fn transpose_chw<T: Copy + Default>(channels: u32, height: u32, width: u32, src: &[T]) -> Vec<T> {
    let (c, h, w) = (channels as usize, height as usize, width as usize);
    let plane = h * w;
    let mut dst = vec![T::default(); src.len()];
    for y in 0..h {
        for x in 0..w {
            let spatial = y * w + x;
            for ch in 0..c {
                dst[spatial * c + ch] = src[ch * plane + spatial];
            }
        }
    }
    dst
}

fn max_sample(v: &[f32]) -> f32 {
    v.iter().fold(f32::NEG_INFINITY, |acc, &s| acc.max(s))
}
