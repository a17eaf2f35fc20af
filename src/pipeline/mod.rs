//! X-ray translation service.

mod direction;
mod translator;

pub use direction::Direction;
pub use translator::{Config, ModelStatus, Translation, Translator};
