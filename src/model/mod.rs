//! Generator architecture and checkpoint loading.

mod generator;
mod loader;

pub use generator::{
    expected_parameters, instance_norm, layer_plan, Generator, GeneratorConfig, LayerSpec,
    ResidualBlock, BASE_FEATURES, MODEL_PREFIX,
};
pub use loader::{load_generator, ModelStore};
