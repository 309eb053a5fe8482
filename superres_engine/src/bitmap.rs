use crate::error::PipelineError;
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Rgba8,
    Bgra8,
    Rgb8,
    Luma8,
    /// Produced by some JPEG decoders. Representable, but not accepted by the engine.
    Cmyk8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba8 | PixelFormat::Bgra8 | PixelFormat::Cmyk8 => 4,
            PixelFormat::Rgb8 => 3,
            PixelFormat::Luma8 => 1,
        }
    }

    pub fn has_alpha(self) -> bool {
        matches!(self, PixelFormat::Rgba8 | PixelFormat::Bgra8)
    }

    pub fn is_supported(self) -> bool {
        !matches!(self, PixelFormat::Cmyk8)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PixelFormat::Rgba8 => "rgba8",
            PixelFormat::Bgra8 => "bgra8",
            PixelFormat::Rgb8 => "rgb8",
            PixelFormat::Luma8 => "luma8",
            PixelFormat::Cmyk8 => "cmyk8",
        }
    }
}

fn byte_len(width: u32, height: u32, format: PixelFormat) -> Result<usize, PipelineError> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| pixels.checked_mul(format.bytes_per_pixel()))
        .ok_or_else(|| {
            PipelineError::InvalidImage(format!("{}x{} overflows memory", width, height))
        })
}

/// A decoded, tightly packed pixel grid.
///
/// The pixel buffer is private and never handed out mutably, so a `Bitmap`
/// cannot change after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
}

impl Bitmap {
    /// Wraps a raw pixel buffer. Zero dimensions are accepted here (with an
    /// empty buffer) and rejected later by the engine.
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: Vec<u8>,
    ) -> Result<Self, PipelineError> {
        let expected = byte_len(width, height, format)?;

        if data.len() != expected {
            return Err(PipelineError::InvalidImage(format!(
                "pixel buffer holds {} bytes, expected {} for {}x{} {}",
                data.len(),
                expected,
                width,
                height,
                format.as_str()
            )));
        }

        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    /// A bitmap where every pixel holds the same bytes.
    pub fn filled(
        width: u32,
        height: u32,
        format: PixelFormat,
        pixel: &[u8],
    ) -> Result<Self, PipelineError> {
        if pixel.len() != format.bytes_per_pixel() {
            return Err(PipelineError::InvalidImage(format!(
                "fill pixel has {} bytes, {} needs {}",
                pixel.len(),
                format.as_str(),
                format.bytes_per_pixel()
            )));
        }
        let count = byte_len(width, height, format)? / pixel.len();
        Self::new(width, height, format, pixel.repeat(count))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Bytes of the pixel at `(x, y)`, or `None` when out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let bpp = self.format.bytes_per_pixel();
        let offset = (y as usize * self.width as usize + x as usize) * bpp;
        self.data.get(offset..offset + bpp)
    }

    /// Keeps 8-bit RGB, RGBA and grayscale layouts as they are; every other
    /// decoded layout is widened to RGBA.
    pub fn from_dynamic(image: DynamicImage) -> Self {
        let (format, width, height, data) = match image {
            DynamicImage::ImageRgb8(img) => {
                (PixelFormat::Rgb8, img.width(), img.height(), img.into_raw())
            }
            DynamicImage::ImageLuma8(img) => {
                (PixelFormat::Luma8, img.width(), img.height(), img.into_raw())
            }
            DynamicImage::ImageRgba8(img) => {
                (PixelFormat::Rgba8, img.width(), img.height(), img.into_raw())
            }
            other => {
                let img = other.into_rgba8();
                (PixelFormat::Rgba8, img.width(), img.height(), img.into_raw())
            }
        };

        Self {
            width,
            height,
            format,
            data,
        }
    }

    pub fn to_dynamic(&self) -> Result<DynamicImage, PipelineError> {
        let (w, h) = self.dimensions();
        let image = match self.format {
            PixelFormat::Rgba8 => {
                RgbaImage::from_raw(w, h, self.data.clone()).map(DynamicImage::ImageRgba8)
            }
            PixelFormat::Bgra8 => {
                let swapped = self
                    .data
                    .chunks_exact(4)
                    .flat_map(|p| [p[2], p[1], p[0], p[3]])
                    .collect();
                RgbaImage::from_raw(w, h, swapped).map(DynamicImage::ImageRgba8)
            }
            PixelFormat::Rgb8 => {
                RgbImage::from_raw(w, h, self.data.clone()).map(DynamicImage::ImageRgb8)
            }
            PixelFormat::Luma8 => {
                GrayImage::from_raw(w, h, self.data.clone()).map(DynamicImage::ImageLuma8)
            }
            PixelFormat::Cmyk8 => {
                return Err(PipelineError::InvalidImage(
                    "cmyk8 bitmaps cannot be converted".to_string(),
                ))
            }
        };

        image.ok_or_else(|| {
            PipelineError::InvalidImage(format!("{}x{} buffer does not match its dimensions", w, h))
        })
    }
}
