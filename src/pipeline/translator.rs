//! Generator selection and the end-to-end translation pipeline.

use std::path::PathBuf;

use ::image::DynamicImage;
use candle_core::{Device, Module, Tensor};
use ndarray::Array4;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::image::{self, ImageTensor, GRAY_CHANNELS, RGB_CHANNELS};
use crate::model::{Generator, GeneratorConfig, ModelStore};

use super::Direction;

/// Configuration for the translation service.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the checkpoints. Created if missing.
    pub model_dir: PathBuf,

    /// Checkpoint file for normal -> pneumonia.
    pub normal_to_pneumonia_checkpoint: String,

    /// Checkpoint file for pneumonia -> normal.
    pub pneumonia_to_normal_checkpoint: String,

    /// Architecture both checkpoints must match.
    pub generator: GeneratorConfig,

    /// Run on the CPU even if a GPU is available.
    pub use_cpu: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("checkpoints"),
            normal_to_pneumonia_checkpoint: Direction::NormalToPneumonia
                .default_checkpoint()
                .to_string(),
            pneumonia_to_normal_checkpoint: Direction::PneumoniaToNormal
                .default_checkpoint()
                .to_string(),
            generator: GeneratorConfig::default(),
            use_cpu: false,
        }
    }
}

impl Config {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any parameter is out of valid range.
    pub fn validate(&self) -> Result<()> {
        self.generator.validate()?;

        if self.generator.input_channels != GRAY_CHANNELS {
            return Err(Error::InvalidParameter {
                name: "input_channels".to_string(),
                reason: "images are converted to grayscale, must be 1".to_string(),
            });
        }

        if ![GRAY_CHANNELS, RGB_CHANNELS].contains(&self.generator.output_channels) {
            return Err(Error::InvalidParameter {
                name: "output_channels".to_string(),
                reason: "must be 1 or 3".to_string(),
            });
        }

        for direction in Direction::ALL {
            if self.checkpoint(direction).is_empty() {
                return Err(Error::InvalidParameter {
                    name: format!("{direction} checkpoint"),
                    reason: "must not be empty".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Checkpoint file name for a direction.
    #[must_use]
    pub fn checkpoint(&self, direction: Direction) -> &str {
        match direction {
            Direction::NormalToPneumonia => &self.normal_to_pneumonia_checkpoint,
            Direction::PneumoniaToNormal => &self.pneumonia_to_normal_checkpoint,
        }
    }

    fn device(&self) -> Result<Device> {
        if self.use_cpu {
            return Ok(Device::Cpu);
        }

        Ok(Device::cuda_if_available(0)?)
    }
}

/// Which directions currently have a generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelStatus {
    pub normal_to_pneumonia: bool,
    pub pneumonia_to_normal: bool,
}

/// A translated image, PNG encoded.
#[derive(Debug, Clone)]
pub struct Translation {
    pub direction: Direction,
    pub png: Vec<u8>,
}

impl Translation {
    /// Human-readable summary, e.g. "Translated normal to pneumonia".
    #[must_use]
    pub fn message(&self) -> String {
        format!(
            "Translated {} to {}",
            self.direction.source(),
            self.direction.target()
        )
    }
}

/// Holds one generator per direction and runs the translation pipeline.
///
/// Generators are read-only after construction, so a `Translator` can be
/// shared across request handlers behind an `Arc`.
pub struct Translator {
    device: Device,
    normal_to_pneumonia: Option<Generator>,
    pneumonia_to_normal: Option<Generator>,
}

impl Translator {
    /// Create a translator from already-built generators.
    #[must_use]
    pub fn new(
        normal_to_pneumonia: Option<Generator>,
        pneumonia_to_normal: Option<Generator>,
        device: Device,
    ) -> Self {
        Self {
            device,
            normal_to_pneumonia,
            pneumonia_to_normal,
        }
    }

    /// Load both generators from the model directory.
    ///
    /// A missing or unloadable checkpoint leaves that direction unavailable
    /// and is only logged.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the model
    /// directory cannot be created.
    pub fn load(config: &Config) -> Result<Self> {
        config.validate()?;

        tracing::info!("Initializing translator with config: {config:?}");

        let device = config.device()?;
        let store = ModelStore::new(&config.model_dir)?;

        let [normal_to_pneumonia, pneumonia_to_normal] =
            Direction::ALL.map(|direction| load_direction(&store, config, direction, &device));

        tracing::info!("Models initialized on {device:?}");

        Ok(Self::new(normal_to_pneumonia, pneumonia_to_normal, device))
    }

    /// Whether a generator is loaded for `direction`.
    #[must_use]
    pub const fn is_ready(&self, direction: Direction) -> bool {
        self.generator(direction).is_some()
    }

    /// Readiness of both directions.
    #[must_use]
    pub const fn status(&self) -> ModelStatus {
        ModelStatus {
            normal_to_pneumonia: self.is_ready(Direction::NormalToPneumonia),
            pneumonia_to_normal: self.is_ready(Direction::PneumoniaToNormal),
        }
    }

    /// Translate an image of any size and color mode.
    ///
    /// The result is always 256x256.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReady`] if no generator is loaded for `direction`,
    /// or an error if inference fails.
    pub fn translate(&self, img: &DynamicImage, direction: Direction) -> Result<DynamicImage> {
        let generator = self
            .generator(direction)
            .ok_or(Error::NotReady { direction })?;

        let input = image::preprocess(img);
        let output = self.forward(generator, &input)?;

        image::postprocess(&output)
    }

    /// Decode, translate and PNG-encode an uploaded image.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDirection`] for an unknown direction name,
    /// [`Error::NotReady`] if that direction has no generator, and a
    /// processing error if the bytes are not an image or inference fails.
    pub fn translate_bytes(&self, bytes: &[u8], direction: &str) -> Result<Translation> {
        let direction: Direction = direction.parse()?;

        if !self.is_ready(direction) {
            return Err(Error::NotReady { direction });
        }

        let img = image::decode_image(bytes)?;
        tracing::debug!(
            "Translating {}x{} {:?} image {direction}",
            img.width(),
            img.height(),
            img.color()
        );

        let translated = self.translate(&img, direction)?;
        let png = image::encode_png(&translated)?;

        Ok(Translation { direction, png })
    }

    const fn generator(&self, direction: Direction) -> Option<&Generator> {
        match direction {
            Direction::NormalToPneumonia => self.normal_to_pneumonia.as_ref(),
            Direction::PneumoniaToNormal => self.pneumonia_to_normal.as_ref(),
        }
    }

    /// Run a generator on a host tensor.
    fn forward(&self, generator: &Generator, input: &ImageTensor) -> Result<ImageTensor> {
        let data: Vec<f32> = input.iter().copied().collect();
        let xs = Tensor::from_vec(data, input.dim(), &self.device)?;

        let ys = generator.forward(&xs)?;

        let dims = ys.dims4()?;
        let data = ys.flatten_all()?.to_vec1::<f32>()?;

        Array4::from_shape_vec(dims, data).map_err(|_| Error::ShapeMismatch {
            expected: format!("{dims:?}"),
            actual: "reshape failed".to_string(),
        })
    }
}

fn load_direction(
    store: &ModelStore,
    config: &Config,
    direction: Direction,
    device: &Device,
) -> Option<Generator> {
    let file_name = config.checkpoint(direction);
    let path = store.checkpoint_path(file_name);

    match store.load(file_name, config.generator, device) {
        Ok(Some(generator)) => {
            tracing::info!("Loaded {direction} model from {}", path.display());
            Some(generator)
        }
        Ok(None) => {
            tracing::warn!("{direction} model not found at {}", path.display());
            None
        }
        Err(err) => {
            tracing::error!("Error loading {direction} model: {err}");
            None
        }
    }
}
