//! # `xray-translate`
//!
//! Chest X-ray image translation between healthy and pneumonia appearance,
//! using a pair of CycleGAN generators.
//!
//! Each direction has its own generator loaded from a checkpoint. Images of
//! any size and color mode are converted to 256x256 grayscale, run through the
//! generator, and returned as 256x256 grayscale.
//!
//! ## Example
//!
//! ```no_run
//! use xray_translate::{Config, Direction, Translator};
//!
//! # fn main() -> xray_translate::Result<()> {
//! let translator = Translator::load(&Config::default())?;
//!
//! let input = xray_translate::image::load_image("chest.png")?;
//! let output = translator.translate(&input, Direction::NormalToPneumonia)?;
//! xray_translate::image::save_image(&output, "chest_pneumonia.png")?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod image;
pub mod model;
pub mod pipeline;
pub mod server;

pub use error::{Error, ErrorKind, Result};
pub use pipeline::{Config, Direction, Translation, Translator};
