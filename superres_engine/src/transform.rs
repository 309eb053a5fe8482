use crate::{
    bitmap::{Bitmap, PixelFormat},
    error::PipelineError,
};
use image::{imageops::FilterType, DynamicImage, GrayImage, Rgb, RgbImage};
use ndarray::{Array, Array4, Ix4};

/// Model input built from a bitmap.
///
/// `content` is the `(width, height)` region of the tensor holding image
/// data; anything right of or below it is zero padding.
pub(crate) struct PreparedInput {
    pub tensor: Array<f32, Ix4>,
    pub content: (u32, u32),
}

/// Largest size with the source aspect ratio that fits inside `bounds`.
pub(crate) fn fit_within(width: u32, height: u32, bounds: (u32, u32)) -> (u32, u32) {
    let (max_w, max_h) = bounds;
    let scale = (max_w as f64 / width as f64).min(max_h as f64 / height as f64);
    let fit_w = ((width as f64 * scale).round() as u32).clamp(1, max_w);
    let fit_h = ((height as f64 * scale).round() as u32).clamp(1, max_h);
    (fit_w, fit_h)
}

fn rgb_plane(bitmap: &Bitmap) -> Result<RgbImage, PipelineError> {
    let bytes = bitmap.as_bytes();
    let data: Vec<u8> = match bitmap.format() {
        PixelFormat::Rgb8 => bytes.to_vec(),
        PixelFormat::Rgba8 => bytes.chunks_exact(4).flat_map(|p| [p[0], p[1], p[2]]).collect(),
        PixelFormat::Bgra8 => bytes.chunks_exact(4).flat_map(|p| [p[2], p[1], p[0]]).collect(),
        PixelFormat::Luma8 => bytes.iter().flat_map(|&v| [v, v, v]).collect(),
        PixelFormat::Cmyk8 => {
            return Err(PipelineError::InvalidImage(
                "unsupported pixel format: cmyk8".to_string(),
            ))
        }
    };

    RgbImage::from_raw(bitmap.width(), bitmap.height(), data)
        .ok_or_else(|| PipelineError::Processing("rgb plane size mismatch".to_string()))
}

fn alpha_plane(bitmap: &Bitmap) -> Option<GrayImage> {
    if !bitmap.format().has_alpha() {
        return None;
    }
    let alpha = bitmap.as_bytes().chunks_exact(4).map(|p| p[3]).collect();
    GrayImage::from_raw(bitmap.width(), bitmap.height(), alpha)
}

/// Converts a bitmap into a `[1, 3, H, W]` tensor scaled to `[0, 1]`.
///
/// With `fixed_input`, the image is fit-scaled into that size without
/// cropping and the remainder is left as zeros.
pub(crate) fn prepare_input(
    bitmap: &Bitmap,
    fixed_input: Option<(u32, u32)>,
) -> Result<PreparedInput, PipelineError> {
    let (width, height) = bitmap.dimensions();
    let mut rgb = rgb_plane(bitmap)?;

    let (tensor_w, tensor_h) = fixed_input.unwrap_or((width, height));
    let content = match fixed_input {
        Some(bounds) => fit_within(width, height, bounds),
        None => (width, height),
    };

    if content != (width, height) {
        tracing::debug!(
            "Fit-scaling {}x{} into {}x{} model input",
            width,
            height,
            tensor_w,
            tensor_h
        );
        rgb = image::imageops::resize(&rgb, content.0, content.1, FilterType::CatmullRom);
    }

    let mut tensor = Array::zeros((1, 3, tensor_h as usize, tensor_w as usize));
    for (x, y, pixel) in rgb.enumerate_pixels() {
        let x = x as usize;
        let y = y as usize;
        let [r, g, b] = pixel.0;
        tensor[[0, 0, y, x]] = (r as f32) / 255.;
        tensor[[0, 1, y, x]] = (g as f32) / 255.;
        tensor[[0, 2, y, x]] = (b as f32) / 255.;
    }

    Ok(PreparedInput { tensor, content })
}

/// Integer ratio between the model's output and input spatial sizes.
pub(crate) fn upscale_ratio(
    input_shape: &[usize],
    output_shape: &[usize],
) -> Result<u32, PipelineError> {
    let (in_h, in_w) = (input_shape[2], input_shape[3]);
    let (batch, channels, out_h, out_w) = match output_shape {
        [n, c, h, w] => (*n, *c, *h, *w),
        _ => {
            return Err(PipelineError::Processing(format!(
                "unexpected output shape {:?}",
                output_shape
            )))
        }
    };

    if batch != 1 || channels != 3 {
        return Err(PipelineError::Processing(format!(
            "expected a single RGB output, got shape {:?}",
            output_shape
        )));
    }
    if out_h < in_h || out_w < in_w || out_h % in_h != 0 || out_w % in_w != 0 {
        return Err(PipelineError::Processing(format!(
            "output {}x{} is not an integer multiple of input {}x{}",
            out_w, out_h, in_w, in_h
        )));
    }

    let ratio = out_w / in_w;
    if ratio < 2 {
        return Err(PipelineError::Processing(format!(
            "model did not enlarge its {}x{} input",
            in_w, in_h
        )));
    }
    if out_h / in_h != ratio {
        return Err(PipelineError::Processing(format!(
            "model scaled width by {} but height by {}",
            ratio,
            out_h / in_h
        )));
    }

    u32::try_from(ratio)
        .map_err(|_| PipelineError::Processing(format!("upscale ratio {} out of range", ratio)))
}

fn to_byte(value: f32) -> u8 {
    // NaN casts to 0
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Rebuilds a bitmap in the source's pixel format from the model output,
/// dropping the padded region and resampling the source alpha to match.
pub(crate) fn reconstruct(
    output: &Array4<f32>,
    ratio: u32,
    content: (u32, u32),
    source: &Bitmap,
) -> Result<Bitmap, PipelineError> {
    let out_w = content.0 * ratio;
    let out_h = content.1 * ratio;

    let rgb = RgbImage::from_fn(out_w, out_h, |x, y| {
        let (x, y) = (x as usize, y as usize);
        Rgb([
            to_byte(output[[0, 0, y, x]]),
            to_byte(output[[0, 1, y, x]]),
            to_byte(output[[0, 2, y, x]]),
        ])
    });

    let alpha = alpha_plane(source).map(|plane| {
        if plane.dimensions() == (out_w, out_h) {
            plane
        } else {
            image::imageops::resize(&plane, out_w, out_h, FilterType::CatmullRom)
        }
    });

    let format = source.format();
    let data = match format {
        PixelFormat::Rgb8 => rgb.into_raw(),
        PixelFormat::Luma8 => DynamicImage::ImageRgb8(rgb).into_luma8().into_raw(),
        PixelFormat::Rgba8 | PixelFormat::Bgra8 => {
            let alpha = alpha.ok_or_else(|| {
                PipelineError::Processing("source alpha plane is missing".to_string())
            })?;
            let mut data = Vec::with_capacity(out_w as usize * out_h as usize * 4);
            for (pixel, a) in rgb.pixels().zip(alpha.pixels()) {
                let [r, g, b] = pixel.0;
                let a = a.0[0];
                if format == PixelFormat::Bgra8 {
                    data.extend_from_slice(&[b, g, r, a]);
                } else {
                    data.extend_from_slice(&[r, g, b, a]);
                }
            }
            data
        }
        PixelFormat::Cmyk8 => {
            return Err(PipelineError::InvalidImage(
                "unsupported pixel format: cmyk8".to_string(),
            ))
        }
    };

    Bitmap::new(out_w, out_h, format, data)
        .map_err(|e| PipelineError::Processing(format!("output assembly failed: {}", e)))
}
