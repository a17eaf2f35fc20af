//! Checkpoint discovery and loading.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;

use crate::error::{Error, Result};

use super::generator::{expected_parameters, Generator, GeneratorConfig};

/// Directory holding one checkpoint file per translation direction.
#[derive(Debug)]
pub struct ModelStore {
    model_dir: PathBuf,
}

impl ModelStore {
    /// Open the model directory, creating it if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new<P: AsRef<Path>>(model_dir: P) -> Result<Self> {
        let model_dir = model_dir.as_ref().to_path_buf();

        fs::create_dir_all(&model_dir).map_err(|source| Error::ModelDir {
            path: model_dir.clone(),
            source,
        })?;

        Ok(Self { model_dir })
    }

    /// Path of a checkpoint inside the model directory.
    #[must_use]
    pub fn checkpoint_path(&self, file_name: &str) -> PathBuf {
        self.model_dir.join(file_name)
    }

    /// Load a generator from a checkpoint in the model directory.
    ///
    /// Returns `Ok(None)` when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be loaded.
    pub fn load(
        &self,
        file_name: &str,
        config: GeneratorConfig,
        device: &Device,
    ) -> Result<Option<Generator>> {
        let path = self.checkpoint_path(file_name);

        if !path.exists() {
            return Ok(None);
        }

        load_generator(&path, config, device).map(Some)
    }
}

/// Load a generator from a checkpoint file.
///
/// `.safetensors` files are read as such; anything else is treated as a
/// PyTorch `state_dict` pickle. The parameter names must match the
/// architecture exactly, with no keys missing or left over.
///
/// # Errors
///
/// Returns an error if the file cannot be read or does not describe a
/// generator with this configuration.
pub fn load_generator<P: AsRef<Path>>(
    path: P,
    config: GeneratorConfig,
    device: &Device,
) -> Result<Generator> {
    let path = path.as_ref();

    tracing::debug!("Reading checkpoint {}", path.display());
    let tensors = read_checkpoint(path)?;

    check_parameter_names(path, &tensors, &config)?;

    let vb = VarBuilder::from_tensors(tensors, DType::F32, device);
    Generator::new(config, vb).map_err(|source| Error::CheckpointLoad {
        path: path.to_path_buf(),
        source,
    })
}

fn read_checkpoint(path: &Path) -> Result<HashMap<String, Tensor>> {
    let is_safetensors = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("safetensors"));

    let tensors = if is_safetensors {
        candle_core::safetensors::load(path, &Device::Cpu)
    } else {
        candle_core::pickle::read_all(path).map(|tensors| tensors.into_iter().collect())
    };

    tensors.map_err(|source| Error::CheckpointLoad {
        path: path.to_path_buf(),
        source,
    })
}

fn check_parameter_names(
    path: &Path,
    tensors: &HashMap<String, Tensor>,
    config: &GeneratorConfig,
) -> Result<()> {
    let expected: BTreeSet<String> = expected_parameters(config)
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    let present: BTreeSet<String> = tensors.keys().cloned().collect();

    let missing: Vec<String> = expected.difference(&present).cloned().collect();
    let unexpected: Vec<String> = present.difference(&expected).cloned().collect();

    if missing.is_empty() && unexpected.is_empty() {
        return Ok(());
    }

    Err(Error::CheckpointMismatch {
        path: path.to_path_buf(),
        missing,
        unexpected,
    })
}
