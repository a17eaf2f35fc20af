//! ResNet-style CycleGAN generator.
//!
//! The network is described by an ordered list of [`LayerSpec`] descriptors
//! (see [`layer_plan`]). A layer's position in that list is also the index
//! under which its parameters are stored in a checkpoint, e.g.
//! `model.0.weight` for the stem convolution.

use candle_core::{Module, Result, Tensor, D};
use candle_nn::{
    conv2d, conv_transpose2d, Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig,
    VarBuilder,
};

use crate::error::Error;

/// Parameter name prefix shared by every layer.
pub const MODEL_PREFIX: &str = "model";

/// Channel count after the stem convolution.
pub const BASE_FEATURES: usize = 64;

/// Number of stride-2 stages on each side of the residual stack.
const SAMPLING_STAGES: usize = 2;

const STEM_KERNEL: usize = 7;
const SAMPLING_KERNEL: usize = 3;
const INSTANCE_NORM_EPS: f64 = 1e-5;

/// Shape of a generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorConfig {
    /// Channels of the input image.
    pub input_channels: usize,
    /// Channels of the output image.
    pub output_channels: usize,
    /// Length of the residual stack.
    pub num_res_blocks: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            input_channels: 1,
            output_channels: 1,
            num_res_blocks: 9,
        }
    }
}

impl GeneratorConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a channel count is zero.
    pub fn validate(&self) -> crate::Result<()> {
        if self.input_channels == 0 {
            return Err(Error::InvalidParameter {
                name: "input_channels".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        if self.output_channels == 0 {
            return Err(Error::InvalidParameter {
                name: "output_channels".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

/// One entry of the generator's layer sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerSpec {
    /// 2D convolution with bias.
    Conv {
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        padding: usize,
    },
    /// 2D transposed convolution with bias.
    ConvTranspose {
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        padding: usize,
        output_padding: usize,
    },
    /// Non-affine instance normalization.
    InstanceNorm { channels: usize },
    /// Rectified linear unit.
    Relu,
    /// [`ResidualBlock`] at a fixed channel count.
    Residual { channels: usize },
    /// Hyperbolic tangent, bounding the output to [-1, 1].
    Tanh,
}

impl LayerSpec {
    /// Parameter names, relative to the layer, and their shapes.
    #[must_use]
    pub fn parameters(&self) -> Vec<(&'static str, Vec<usize>)> {
        match *self {
            Self::Conv {
                in_channels,
                out_channels,
                kernel_size,
                ..
            } => vec![
                (
                    "weight",
                    vec![out_channels, in_channels, kernel_size, kernel_size],
                ),
                ("bias", vec![out_channels]),
            ],
            // Transposed convolutions store their weight as (in, out, k, k)
            Self::ConvTranspose {
                in_channels,
                out_channels,
                kernel_size,
                ..
            } => vec![
                (
                    "weight",
                    vec![in_channels, out_channels, kernel_size, kernel_size],
                ),
                ("bias", vec![out_channels]),
            ],
            Self::Residual { channels } => {
                let weight = vec![channels, channels, 3, 3];
                vec![
                    ("conv_block.0.weight", weight.clone()),
                    ("conv_block.0.bias", vec![channels]),
                    ("conv_block.3.weight", weight),
                    ("conv_block.3.bias", vec![channels]),
                ]
            }
            Self::InstanceNorm { .. } | Self::Relu | Self::Tanh => Vec::new(),
        }
    }
}

/// Build the ordered layer sequence for a generator.
///
/// Stem, two downsampling stages, the residual stack, two upsampling stages
/// and the head, each convolution followed by its normalization and activation.
#[must_use]
pub fn layer_plan(config: &GeneratorConfig) -> Vec<LayerSpec> {
    let mut plan = Vec::with_capacity(17 + config.num_res_blocks);

    plan.extend([
        LayerSpec::Conv {
            in_channels: config.input_channels,
            out_channels: BASE_FEATURES,
            kernel_size: STEM_KERNEL,
            stride: 1,
            padding: 3,
        },
        LayerSpec::InstanceNorm {
            channels: BASE_FEATURES,
        },
        LayerSpec::Relu,
    ]);

    let mut channels = BASE_FEATURES;
    for _ in 0..SAMPLING_STAGES {
        plan.extend([
            LayerSpec::Conv {
                in_channels: channels,
                out_channels: channels * 2,
                kernel_size: SAMPLING_KERNEL,
                stride: 2,
                padding: 1,
            },
            LayerSpec::InstanceNorm {
                channels: channels * 2,
            },
            LayerSpec::Relu,
        ]);
        channels *= 2;
    }

    plan.extend(std::iter::repeat(LayerSpec::Residual { channels }).take(config.num_res_blocks));

    for _ in 0..SAMPLING_STAGES {
        plan.extend([
            LayerSpec::ConvTranspose {
                in_channels: channels,
                out_channels: channels / 2,
                kernel_size: SAMPLING_KERNEL,
                stride: 2,
                padding: 1,
                output_padding: 1,
            },
            LayerSpec::InstanceNorm {
                channels: channels / 2,
            },
            LayerSpec::Relu,
        ]);
        channels /= 2;
    }

    plan.extend([
        LayerSpec::Conv {
            in_channels: channels,
            out_channels: config.output_channels,
            kernel_size: STEM_KERNEL,
            stride: 1,
            padding: 3,
        },
        LayerSpec::Tanh,
    ]);

    plan
}

/// Every parameter a checkpoint must provide, with its full name and shape.
#[must_use]
pub fn expected_parameters(config: &GeneratorConfig) -> Vec<(String, Vec<usize>)> {
    layer_plan(config)
        .iter()
        .enumerate()
        .flat_map(|(index, layer)| {
            layer
                .parameters()
                .into_iter()
                .map(move |(name, shape)| (format!("{MODEL_PREFIX}.{index}.{name}"), shape))
        })
        .collect()
}

/// Non-affine instance normalization over the spatial dimensions of a
/// `[N, C, H, W]` tensor, using the biased variance.
///
/// # Errors
///
/// Returns an error if the tensor is not four-dimensional.
pub fn instance_norm(xs: &Tensor) -> Result<Tensor> {
    let (batch, channels, height, width) = xs.dims4()?;

    let flat = xs.reshape((batch, channels, height * width))?;
    let mean = flat.mean_keepdim(D::Minus1)?;
    let centered = flat.broadcast_sub(&mean)?;
    let variance = centered.sqr()?.mean_keepdim(D::Minus1)?;
    let normed = centered.broadcast_div(&variance.affine(1.0, INSTANCE_NORM_EPS)?.sqrt()?)?;

    normed.reshape((batch, channels, height, width))
}

/// Two 3x3 convolutions with a skip connection; shape preserving.
#[derive(Debug, Clone)]
pub struct ResidualBlock {
    conv1: Conv2d,
    conv2: Conv2d,
}

impl ResidualBlock {
    /// Create a block, reading `conv_block.0` and `conv_block.3` from `vb`.
    ///
    /// # Errors
    ///
    /// Returns an error if a parameter is missing or has the wrong shape.
    pub fn new(channels: usize, vb: VarBuilder) -> Result<Self> {
        let cfg = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };
        let vb = vb.pp("conv_block");

        Ok(Self {
            conv1: conv2d(channels, channels, 3, cfg, vb.pp(0))?,
            conv2: conv2d(channels, channels, 3, cfg, vb.pp(3))?,
        })
    }
}

impl Module for ResidualBlock {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let ys = instance_norm(&self.conv1.forward(xs)?)?.relu()?;
        let ys = instance_norm(&self.conv2.forward(&ys)?)?;
        xs.add(&ys)
    }
}

#[derive(Debug, Clone)]
enum Layer {
    Conv(Conv2d),
    ConvTranspose(ConvTranspose2d),
    InstanceNorm,
    Relu,
    Residual(ResidualBlock),
    Tanh,
}

impl Layer {
    fn new(spec: &LayerSpec, vb: VarBuilder) -> Result<Self> {
        let layer = match *spec {
            LayerSpec::Conv {
                in_channels,
                out_channels,
                kernel_size,
                stride,
                padding,
            } => {
                let cfg = Conv2dConfig {
                    padding,
                    stride,
                    ..Default::default()
                };
                Self::Conv(conv2d(in_channels, out_channels, kernel_size, cfg, vb)?)
            }
            LayerSpec::ConvTranspose {
                in_channels,
                out_channels,
                kernel_size,
                stride,
                padding,
                output_padding,
            } => {
                let cfg = ConvTranspose2dConfig {
                    padding,
                    output_padding,
                    stride,
                    ..Default::default()
                };
                Self::ConvTranspose(conv_transpose2d(
                    in_channels,
                    out_channels,
                    kernel_size,
                    cfg,
                    vb,
                )?)
            }
            LayerSpec::InstanceNorm { .. } => Self::InstanceNorm,
            LayerSpec::Relu => Self::Relu,
            LayerSpec::Residual { channels } => Self::Residual(ResidualBlock::new(channels, vb)?),
            LayerSpec::Tanh => Self::Tanh,
        };

        Ok(layer)
    }
}

impl Module for Layer {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        match self {
            Self::Conv(conv) => conv.forward(xs),
            Self::ConvTranspose(conv) => conv.forward(xs),
            Self::InstanceNorm => instance_norm(xs),
            Self::Relu => xs.relu(),
            Self::Residual(block) => block.forward(xs),
            Self::Tanh => xs.tanh(),
        }
    }
}

/// Encoder, residual transform and decoder mapping `[N, in, H, W]` to
/// `[N, out, H, W]` with values in [-1, 1].
///
/// Inference only: normalization statistics come from each input, so the
/// generator holds no state between calls and can be shared across threads.
#[derive(Debug, Clone)]
pub struct Generator {
    config: GeneratorConfig,
    layers: Vec<Layer>,
}

impl Generator {
    /// Build a generator, reading every parameter from `vb`.
    ///
    /// # Errors
    ///
    /// Returns an error if a parameter is missing or has the wrong shape.
    pub fn new(config: GeneratorConfig, vb: VarBuilder) -> Result<Self> {
        let vb = vb.pp(MODEL_PREFIX);
        let layers = layer_plan(&config)
            .iter()
            .enumerate()
            .map(|(index, spec)| Layer::new(spec, vb.pp(index)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { config, layers })
    }

    /// The configuration this generator was built with.
    #[must_use]
    pub const fn config(&self) -> &GeneratorConfig {
        &self.config
    }
}

impl Module for Generator {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        self.layers
            .iter()
            .try_fold(xs.clone(), |xs, layer| layer.forward(&xs))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    use super::*;

    /// Per-channel normalization computed element by element on the host.
    fn reference_instance_norm(xs: &Tensor) -> Tensor {
        let (batch, channels, height, width) = xs.dims4().unwrap();
        let data = xs.flatten_all().unwrap().to_vec1::<f32>().unwrap();

        let mut out = Vec::with_capacity(data.len());
        for plane in data.chunks(height * width) {
            let len = plane.len() as f32;
            let mean = plane.iter().sum::<f32>() / len;
            let variance = plane.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / len;
            let scale = (variance + 1e-5).sqrt();
            out.extend(plane.iter().map(|v| (v - mean) / scale));
        }

        Tensor::from_vec(out, (batch, channels, height, width), &Device::Cpu).unwrap()
    }

    fn reference_conv(xs: &Tensor, weight: &Tensor, bias: &Tensor, padding: usize) -> Tensor {
        let channels = bias.dims1().unwrap();
        xs.conv2d(weight, padding, 1, 1, 1)
            .unwrap()
            .broadcast_add(&bias.reshape((1, channels, 1, 1)).unwrap())
            .unwrap()
    }

    fn max_abs_diff(a: &Tensor, b: &Tensor) -> f32 {
        (a - b)
            .unwrap()
            .abs()
            .unwrap()
            .max_all()
            .unwrap()
            .to_scalar::<f32>()
            .unwrap()
    }

    fn small_config() -> GeneratorConfig {
        GeneratorConfig {
            num_res_blocks: 1,
            ..GeneratorConfig::default()
        }
    }

    fn random_generator(config: GeneratorConfig) -> Generator {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        Generator::new(config, vb).unwrap()
    }

    #[test]
    fn test_layer_plan_matches_checkpoint_layout() {
        let plan = layer_plan(&GeneratorConfig::default());
        assert_eq!(plan.len(), 26);

        let parametrized: Vec<usize> = plan
            .iter()
            .enumerate()
            .filter(|(_, layer)| !layer.parameters().is_empty())
            .map(|(index, _)| index)
            .collect();
        assert_eq!(
            parametrized,
            vec![0, 3, 6, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 21, 24]
        );

        assert_eq!(plan[25], LayerSpec::Tanh);
        assert_eq!(plan[17], LayerSpec::Residual { channels: 256 });
    }

    #[test]
    fn test_expected_parameters() {
        let params = expected_parameters(&GeneratorConfig::default());
        assert_eq!(params.len(), 48);

        let shape_of = |name: &str| {
            params
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, shape)| shape.clone())
        };
        assert_eq!(shape_of("model.0.weight"), Some(vec![64, 1, 7, 7]));
        assert_eq!(shape_of("model.3.weight"), Some(vec![128, 64, 3, 3]));
        assert_eq!(
            shape_of("model.9.conv_block.3.weight"),
            Some(vec![256, 256, 3, 3])
        );
        assert_eq!(shape_of("model.18.weight"), Some(vec![256, 128, 3, 3]));
        assert_eq!(shape_of("model.24.weight"), Some(vec![1, 64, 7, 7]));
        assert_eq!(shape_of("model.24.bias"), Some(vec![1]));
        assert_eq!(shape_of("model.1.weight"), None);
    }

    #[test]
    fn test_config_validate() {
        assert!(GeneratorConfig::default().validate().is_ok());

        let config = GeneratorConfig {
            output_channels: 0,
            ..GeneratorConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_instance_norm_statistics() {
        let xs = Tensor::randn(3f32, 2f32, (2, 3, 8, 8), &Device::Cpu).unwrap();
        let ys = instance_norm(&xs).unwrap();
        assert_eq!(ys.dims(), xs.dims());

        let flat = ys.reshape((2, 3, 64)).unwrap();
        let means = flat.mean(2).unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let vars = flat
            .sqr()
            .unwrap()
            .mean(2)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();

        assert!(means.iter().all(|m| m.abs() < 1e-4), "{means:?}");
        assert!(vars.iter().all(|v| (v - 1.0).abs() < 1e-2), "{vars:?}");
    }

    #[test]
    fn test_residual_block_preserves_shape() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let block = ResidualBlock::new(8, vb).unwrap();

        for dims in [(1, 8, 4, 4), (2, 8, 5, 7), (3, 8, 1, 9)] {
            let xs = Tensor::randn(0f32, 1f32, dims, &Device::Cpu).unwrap();
            assert_eq!(block.forward(&xs).unwrap().dims4().unwrap(), dims);
        }
    }

    #[test]
    fn test_zero_residual_block_is_identity() {
        let block = ResidualBlock::new(4, VarBuilder::zeros(DType::F32, &Device::Cpu)).unwrap();
        let xs = Tensor::randn(0f32, 1f32, (1, 4, 6, 6), &Device::Cpu).unwrap();
        let ys = block.forward(&xs).unwrap();

        let diff = (ys - &xs)
            .unwrap()
            .abs()
            .unwrap()
            .max_all()
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert!(diff < 1e-6);
    }

    #[test]
    fn test_residual_block_matches_reference() {
        let device = Device::Cpu;
        let channels = 3;
        let w0 = Tensor::randn(0f32, 0.5, (channels, channels, 3, 3), &device).unwrap();
        let b0 = Tensor::randn(0f32, 0.5, channels, &device).unwrap();
        let w3 = Tensor::randn(0f32, 0.5, (channels, channels, 3, 3), &device).unwrap();
        let b3 = Tensor::randn(0f32, 0.5, channels, &device).unwrap();

        let tensors = HashMap::from([
            ("conv_block.0.weight".to_string(), w0.clone()),
            ("conv_block.0.bias".to_string(), b0.clone()),
            ("conv_block.3.weight".to_string(), w3.clone()),
            ("conv_block.3.bias".to_string(), b3.clone()),
        ]);
        let vb = VarBuilder::from_tensors(tensors, DType::F32, &device);
        let block = ResidualBlock::new(channels, vb).unwrap();

        let xs = Tensor::randn(0f32, 1f32, (2, channels, 5, 6), &device).unwrap();
        let hidden = reference_instance_norm(&reference_conv(&xs, &w0, &b0, 1))
            .relu()
            .unwrap();
        let branch = reference_instance_norm(&reference_conv(&hidden, &w3, &b3, 1));
        let expected = (&xs + &branch).unwrap();

        let diff = max_abs_diff(&block.forward(&xs).unwrap(), &expected);
        assert!(diff < 1e-4, "max diff {diff}");
    }

    #[test]
    fn test_stem_is_conv_norm_relu() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let generator = Generator::new(small_config(), vb).unwrap();

        let (weight, bias) = {
            let data = varmap.data().lock().unwrap();
            (
                data["model.0.weight"].as_tensor().clone(),
                data["model.0.bias"].as_tensor().clone(),
            )
        };

        let xs = Tensor::randn(0f32, 1f32, (1, 1, 10, 12), &Device::Cpu).unwrap();
        let stem = generator.layers[..3]
            .iter()
            .try_fold(xs.clone(), |xs, layer| layer.forward(&xs))
            .unwrap();
        let expected = reference_instance_norm(&reference_conv(&xs, &weight, &bias, 3))
            .relu()
            .unwrap();

        assert_eq!(stem.dims4().unwrap(), (1, BASE_FEATURES, 10, 12));
        let diff = max_abs_diff(&stem, &expected);
        assert!(diff < 1e-4, "max diff {diff}");
    }

    #[test]
    fn test_generator_preserves_spatial_dims() {
        let generator = random_generator(small_config());

        for (height, width) in [(16, 16), (32, 20), (8, 12)] {
            let xs = Tensor::randn(0f32, 1f32, (1, 1, height, width), &Device::Cpu).unwrap();
            let ys = generator.forward(&xs).unwrap();
            assert_eq!(ys.dims4().unwrap(), (1, 1, height, width));
        }
    }

    #[test]
    fn test_generator_output_channels_and_range() {
        let config = GeneratorConfig {
            output_channels: 3,
            num_res_blocks: 2,
            ..GeneratorConfig::default()
        };
        let generator = random_generator(config);
        assert_eq!(generator.config(), &config);

        let xs = Tensor::randn(0f32, 1f32, (2, 1, 12, 12), &Device::Cpu).unwrap();
        let ys = generator.forward(&xs).unwrap();
        assert_eq!(ys.dims4().unwrap(), (2, 3, 12, 12));

        let values = ys.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(values.iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn test_generator_is_deterministic() {
        let generator = random_generator(small_config());
        let xs = Tensor::randn(0f32, 1f32, (1, 1, 16, 16), &Device::Cpu).unwrap();

        let first = generator.forward(&xs).unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let second = generator.forward(&xs).unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_zero_generator_outputs_zero() {
        let generator =
            Generator::new(small_config(), VarBuilder::zeros(DType::F32, &Device::Cpu)).unwrap();
        let xs = Tensor::randn(0f32, 1f32, (1, 1, 8, 8), &Device::Cpu).unwrap();

        let values = generator.forward(&xs).unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(values.iter().all(|v| v.abs() < f32::EPSILON));
    }
}
