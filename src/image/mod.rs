//! Image decoding, tensor conversion, and encoding utilities.

mod load;
mod save;

pub use load::{decode_image, load_image, preprocess, to_grayscale};
pub use save::{encode_png, postprocess, save_image};

use ndarray::Array4;

/// Image tensor in NCHW format (batch, channels, height, width).
/// Values are normalized to [-1, 1], matching the generator's training data.
pub type ImageTensor = Array4<f32>;

/// Side length of the square images the generators were trained on.
pub const IMAGE_SIZE: u32 = 256;

/// Number of channels in grayscale images.
pub const GRAY_CHANNELS: usize = 1;

/// Number of channels in RGB images.
pub const RGB_CHANNELS: usize = 3;

/// Map an intensity in [0, 1] to the model range [-1, 1].
#[inline]
#[must_use]
pub fn normalize(value: f32) -> f32 {
    (value - 0.5) / 0.5
}

/// Map a model value in [-1, 1] back to an intensity in [0, 1].
#[inline]
#[must_use]
pub fn denormalize(value: f32) -> f32 {
    value.mul_add(0.5, 0.5)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denormalize_inverts_normalize() {
        for step in 0..=100u8 {
            let x = f32::from(step) / 100.0;
            assert!((denormalize(normalize(x)) - x).abs() < 1e-6, "x = {x}");
        }
    }

    #[test]
    fn test_normalize_endpoints() {
        assert!((normalize(0.0) + 1.0).abs() < f32::EPSILON);
        assert!(normalize(0.5).abs() < f32::EPSILON);
        assert!((normalize(1.0) - 1.0).abs() < f32::EPSILON);
    }
}
