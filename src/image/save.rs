//! Postprocessing and image encoding.

use std::io::Cursor;
use std::path::Path;

use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage};

use crate::error::{Error, Result};

use super::{denormalize, ImageTensor, GRAY_CHANNELS, RGB_CHANNELS};

/// Convert a generator output tensor to an 8-bit image.
///
/// The first item of the batch is:
/// 1. Denormalized from [-1, 1] to [0, 1]
/// 2. Scaled to [0, 255] and truncated to `u8`
/// 3. Returned as grayscale (one channel) or RGB (three channels)
///
/// # Errors
///
/// Returns an error if the batch is empty or the channel count has no image mode.
#[allow(clippy::cast_possible_truncation)]
pub fn postprocess(tensor: &ImageTensor) -> Result<DynamicImage> {
    let (batch, channels, height, width) = tensor.dim();

    if batch == 0 {
        return Err(Error::ShapeMismatch {
            expected: "at least one image in the batch".to_string(),
            actual: "empty batch".to_string(),
        });
    }

    // Safe: spatial dims come from a 256x256 pipeline and fit in u32
    let (w, h) = (width as u32, height as u32);

    match channels {
        GRAY_CHANNELS => Ok(DynamicImage::ImageLuma8(GrayImage::from_fn(w, h, |x, y| {
            Luma([to_u8(tensor[[0, 0, y as usize, x as usize]])])
        }))),
        RGB_CHANNELS => Ok(DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |x, y| {
            let (y, x) = (y as usize, x as usize);
            Rgb([
                to_u8(tensor[[0, 0, y, x]]),
                to_u8(tensor[[0, 1, y, x]]),
                to_u8(tensor[[0, 2, y, x]]),
            ])
        }))),
        other => Err(Error::ShapeMismatch {
            expected: "1 or 3 channels".to_string(),
            actual: format!("{other} channels"),
        }),
    }
}

/// Encode an image as PNG.
///
/// # Errors
///
/// Returns an error if encoding fails.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    img.write_to(&mut buffer, ImageFormat::Png)
        .map_err(|source| Error::ImageEncode { source })?;

    Ok(buffer.into_inner())
}

/// Save an image to disk, format inferred from the extension.
///
/// # Errors
///
/// Returns an error if the image cannot be saved.
pub fn save_image<P: AsRef<Path>>(img: &DynamicImage, path: P) -> Result<()> {
    let path = path.as_ref();

    img.save(path).map_err(|source| Error::ImageSave {
        path: path.to_path_buf(),
        source,
    })
}

/// Denormalize a model value from [-1, 1] to [0, 255] with clamping.
#[inline]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_u8(value: f32) -> u8 {
    // Safe: clamped to [0, 255] range before casting
    (denormalize(value) * 255.0).clamp(0.0, 255.0) as u8
}
