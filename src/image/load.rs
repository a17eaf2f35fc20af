//! Image decoding and preprocessing.

use std::path::Path;

use image::{imageops::FilterType, DynamicImage, GrayImage, Luma};
use ndarray::Array4;

use crate::error::{Error, Result};

use super::{normalize, ImageTensor, GRAY_CHANNELS, IMAGE_SIZE};

/// Decode an in-memory image of any supported format.
///
/// # Errors
///
/// Returns an error if the bytes are empty or not a decodable image.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(bytes).map_err(|source| Error::ImageDecode { source })
}

/// Load an image from disk.
///
/// # Errors
///
/// Returns an error if the image cannot be opened or decoded.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
    let path = path.as_ref();

    image::open(path).map_err(|source| Error::ImageLoad {
        path: path.to_path_buf(),
        source,
    })
}

/// Convert an image to the generator's input tensor.
///
/// The image is:
/// 1. Converted to 8-bit grayscale
/// 2. Resized to 256x256, ignoring aspect ratio
/// 3. Scaled from [0, 255] to [0, 1], then remapped to [-1, 1]
/// 4. Returned as NCHW tensor (1, 1, 256, 256)
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn preprocess(img: &DynamicImage) -> ImageTensor {
    let gray = to_grayscale(img);
    // Triangle is the bilinear filter, with support widened when downscaling
    let resized = image::imageops::resize(&gray, IMAGE_SIZE, IMAGE_SIZE, FilterType::Triangle);

    let size = IMAGE_SIZE as usize;

    Array4::from_shape_fn((1, GRAY_CHANNELS, size, size), |(_, _, y, x)| {
        // Safe: x and y are bounded by IMAGE_SIZE (256) which fits in u32
        let value = resized.get_pixel(x as u32, y as u32)[0];
        normalize(f32::from(value) / 255.0)
    })
}

/// Convert any image to 8-bit grayscale.
///
/// Color sources use the ITU-R 601-2 luma transform in fixed point,
/// `L = R * 299/1000 + G * 587/1000 + B * 114/1000`, which is what the
/// training data went through. Alpha is discarded. 16-bit grayscale is
/// clipped at 255, not rescaled.
#[must_use]
pub fn to_grayscale(img: &DynamicImage) -> GrayImage {
    match img {
        DynamicImage::ImageLuma8(gray) => gray.clone(),
        DynamicImage::ImageLumaA8(_) => img.to_luma8(),
        DynamicImage::ImageLuma16(gray) => {
            GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
                Luma([clip_u16(gray.get_pixel(x, y)[0])])
            })
        }
        DynamicImage::ImageLumaA16(gray) => {
            GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
                Luma([clip_u16(gray.get_pixel(x, y)[0])])
            })
        }
        _ => {
            let rgb = img.to_rgb8();
            GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
                let [r, g, b] = rgb.get_pixel(x, y).0;
                Luma([luma(r, g, b)])
            })
        }
    }
}

#[inline]
#[allow(clippy::cast_possible_truncation)]
fn luma(r: u8, g: u8, b: u8) -> u8 {
    let weighted = u32::from(r) * 19_595 + u32::from(g) * 38_470 + u32::from(b) * 7_471;
    // Safe: weights sum to 65536, so the shifted value never exceeds 255
    ((weighted + 0x8000) >> 16) as u8
}

#[inline]
fn clip_u16(value: u16) -> u8 {
    u8::try_from(value).unwrap_or(u8::MAX)
}
