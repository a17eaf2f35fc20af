//! Translation directions.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Which way an X-ray is translated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Healthy lungs to pneumonia (the `G_AB` generator).
    NormalToPneumonia,
    /// Pneumonia to healthy lungs (the `G_BA` generator).
    PneumoniaToNormal,
}

impl Direction {
    /// Both directions, in checkpoint order.
    pub const ALL: [Self; 2] = [Self::NormalToPneumonia, Self::PneumoniaToNormal];

    /// Wire name, as accepted by [`FromStr`].
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NormalToPneumonia => "normal_to_pneumonia",
            Self::PneumoniaToNormal => "pneumonia_to_normal",
        }
    }

    /// Class of the input image.
    #[must_use]
    pub const fn source(&self) -> &'static str {
        match self {
            Self::NormalToPneumonia => "normal",
            Self::PneumoniaToNormal => "pneumonia",
        }
    }

    /// Class of the output image.
    #[must_use]
    pub const fn target(&self) -> &'static str {
        match self {
            Self::NormalToPneumonia => "pneumonia",
            Self::PneumoniaToNormal => "normal",
        }
    }

    /// Default checkpoint file name for this direction.
    #[must_use]
    pub const fn default_checkpoint(&self) -> &'static str {
        match self {
            Self::NormalToPneumonia => "G_AB_90.pth",
            Self::PneumoniaToNormal => "G_BA_90.pth",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|direction| direction.as_str() == s)
            .ok_or_else(|| Error::InvalidDirection(s.to_string()))
    }
}
