use crate::shell::ShellError;
use image::{codecs::jpeg::JpegEncoder, ImageFormat};
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};
use superres_engine::Bitmap;

pub fn decode_file(path: &Path) -> Result<Bitmap, ShellError> {
    let image = image::ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| ShellError::Decode(format!("{}: {}", path.display(), e)))?;

    Ok(Bitmap::from_dynamic(image))
}

/// Writes PNG (lossless) or JPEG at `jpeg_quality`, chosen by extension.
/// JPEG has no alpha channel, so transparency is dropped.
pub fn encode_file(bitmap: &Bitmap, path: &Path, jpeg_quality: u8) -> Result<(), ShellError> {
    let format = ImageFormat::from_path(path)
        .map_err(|_| ShellError::UnsupportedFormat(path.display().to_string()))?;
    let image = bitmap.to_dynamic()?;

    match format {
        ImageFormat::Png => image
            .save_with_format(path, ImageFormat::Png)
            .map_err(|e| ShellError::Encode(e.to_string())),
        ImageFormat::Jpeg => {
            let mut writer = BufWriter::new(File::create(path)?);
            JpegEncoder::new_with_quality(&mut writer, jpeg_quality)
                .encode_image(&image.to_rgb8())
                .map_err(|e| ShellError::Encode(e.to_string()))?;
            writer.flush()?;
            Ok(())
        }
        other => Err(ShellError::UnsupportedFormat(format!("{:?}", other))),
    }
}
