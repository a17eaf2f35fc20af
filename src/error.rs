//! Custom error types for xray-translate.

use std::path::PathBuf;
use thiserror::Error;

use crate::pipeline::Direction;

/// Coarse classification of an [`Error`], used to pick a user-visible status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The generator for the requested direction has no loaded parameters.
    NotReady,
    /// The caller supplied something we refuse to process.
    InvalidInput,
    /// Anything that went wrong while decoding, running or encoding.
    Processing,
}

/// Main error type for the xray-translate library.
#[derive(Error, Debug)]
pub enum Error {
    /// No generator is loaded for the requested direction.
    #[error("model for {direction} is not loaded")]
    NotReady { direction: Direction },

    /// Unrecognized translation direction.
    #[error("invalid translation type: {0:?}")]
    InvalidDirection(String),

    /// Invalid parameter value.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// Uploaded bytes could not be decoded as an image.
    #[error("failed to decode image: {source}")]
    ImageDecode {
        #[source]
        source: image::ImageError,
    },

    /// Failed to load an image file.
    #[error("failed to load image from {path}: {source}")]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Failed to save an image file.
    #[error("failed to save image to {path}: {source}")]
    ImageSave {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Failed to encode the result image.
    #[error("failed to encode image: {source}")]
    ImageEncode {
        #[source]
        source: image::ImageError,
    },

    /// Tensor computation failed.
    #[error("model inference failed: {0}")]
    Inference(#[from] candle_core::Error),

    /// Shape mismatch in tensor operations.
    #[error("tensor shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    /// A checkpoint file could not be read.
    #[error("failed to read checkpoint {path}: {source}")]
    CheckpointLoad {
        path: PathBuf,
        #[source]
        source: candle_core::Error,
    },

    /// A checkpoint does not describe the generator architecture.
    #[error("checkpoint {path} does not match the generator: missing {missing:?}, unexpected {unexpected:?}")]
    CheckpointMismatch {
        path: PathBuf,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    /// Failed to create the model directory.
    #[error("failed to create model directory {path}: {source}")]
    ModelDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Classify the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotReady { .. } => ErrorKind::NotReady,
            Self::InvalidDirection(_) | Self::InvalidParameter { .. } => ErrorKind::InvalidInput,
            _ => ErrorKind::Processing,
        }
    }
}

/// Result type alias for xray-translate operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_taxonomy() {
        let not_ready = Error::NotReady {
            direction: Direction::NormalToPneumonia,
        };
        assert_eq!(not_ready.kind(), ErrorKind::NotReady);
        assert_eq!(
            Error::InvalidDirection("sideways".into()).kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            Error::ShapeMismatch {
                expected: "4D tensor".into(),
                actual: "3D tensor".into(),
            }
            .kind(),
            ErrorKind::Processing
        );
    }

    #[test]
    fn test_not_ready_message_names_direction() {
        let err = Error::NotReady {
            direction: Direction::PneumoniaToNormal,
        };
        assert_eq!(err.to_string(), "model for pneumonia_to_normal is not loaded");
    }
}
