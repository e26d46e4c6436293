use std::path::Path;

use num::traits::real::Real;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::nn::linear::cast_param;
use crate::nn::{Activation, Linear, Module};
use crate::tensor::{Numeric, RcTensor, TensorLike, TensorList};
use crate::{Error, Result};

pub const MODEL_FORMAT_VERSION: u32 = 1;

/// A multilayer perceptron: `N` linear layers applied in order.
#[derive(Debug)]
pub struct Mlp<T, const N: usize>
where
    T: Numeric,
{
    layers: [Linear<T>; N],
}

impl<T: Numeric + Real, const N: usize> Mlp<T, N> {
    pub fn new(layers: [Linear<T>; N]) -> Mlp<T, N> {
        Mlp { layers }
    }

    /// Builds `N` layers from `N + 1` widths. Every layer but the last uses
    /// `hidden`; the last uses `output`.
    pub fn from_sizes<R: Rng + ?Sized>(
        sizes: &[usize],
        hidden: Activation,
        output: Activation,
        rng: &mut R,
    ) -> Result<Self> {
        if sizes.len() != N + 1 {
            return Err(Error::Model(format!(
                "{N} layers need {} widths, got {sizes:?}",
                N + 1
            )));
        }
        let layers = sizes
            .windows(2)
            .enumerate()
            .map(|(i, dims)| {
                let activation = if i + 1 == N { output } else { hidden };
                Linear::init(dims[0], dims[1], activation, &mut *rng)
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_layers(layers)
    }

    fn from_layers(layers: Vec<Linear<T>>) -> Result<Self> {
        let count = layers.len();
        let layers: [Linear<T>; N] = layers
            .try_into()
            .map_err(|_| Error::Model(format!("expected {N} layers, got {count}")))?;
        Ok(Mlp { layers })
    }

    pub fn layers(&self) -> &[Linear<T>] {
        &self.layers
    }

    pub fn in_features(&self) -> usize {
        self.layers.first().map_or(0, Linear::in_features)
    }

    pub fn to_serialized(&self) -> SerializedMlp {
        let layers = self
            .layers
            .iter()
            .map(|layer| SerializedLayer {
                in_features: layer.in_features(),
                out_features: layer.out_features(),
                activation: layer.activation(),
                weights: to_f64(layer.weights.data()),
                bias: to_f64(layer.bias.data()),
            })
            .collect();
        SerializedMlp {
            format_version: MODEL_FORMAT_VERSION,
            layers,
        }
    }

    pub fn from_serialized(serialized: &SerializedMlp) -> Result<Self> {
        if serialized.format_version != MODEL_FORMAT_VERSION {
            return Err(Error::Model(format!(
                "unsupported model format version {}",
                serialized.format_version
            )));
        }
        let mut layers = Vec::with_capacity(serialized.layers.len());
        for (i, layer) in serialized.layers.iter().enumerate() {
            layer.validate(i)?;
            if let Some(previous) = i.checked_sub(1).map(|p| &serialized.layers[p]) {
                if previous.out_features != layer.in_features {
                    return Err(Error::Model(format!(
                        "layer {i} expects {} inputs but layer {} produces {}",
                        layer.in_features,
                        i - 1,
                        previous.out_features
                    )));
                }
            }
            let weights = layer
                .weights
                .iter()
                .map(|&w| cast_param(w))
                .collect::<Result<Vec<T>>>()?;
            let bias = layer
                .bias
                .iter()
                .map(|&b| cast_param(b))
                .collect::<Result<Vec<T>>>()?;
            layers.push(Linear::new(
                RcTensor::new(weights, vec![layer.in_features, layer.out_features]),
                RcTensor::new(bias, vec![1, layer.out_features]),
                Some(layer.activation),
            ));
        }
        Self::from_layers(layers)
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(&self.to_serialized())?;
        std::fs::write(path, json).map_err(|e| Error::io(path, e))
    }

    pub fn load_json(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let serialized: SerializedMlp = serde_json::from_str(&json)?;
        Self::from_serialized(&serialized)
    }
}

fn to_f64<T: Real>(values: &[T]) -> Vec<f64> {
    values.iter().map(|v| v.to_f64().unwrap_or(f64::NAN)).collect()
}

impl<T: Numeric, const N: usize> crate::nn::module::private::Private for Mlp<T, N> {}

impl<T: Numeric + Real, const N: usize> Module<T> for Mlp<T, N> {
    type InputType = RcTensor<T>;
    type OutputType = RcTensor<T>;

    fn forward(&self, batch: RcTensor<T>) -> RcTensor<T> {
        self.layers
            .iter()
            .fold(batch, |prev, layer| layer.forward(prev))
    }

    fn params(&self) -> TensorList<T> {
        self.layers
            .iter()
            .flat_map(|layer| layer.params())
            .collect()
    }

    fn update_params(&mut self, new_params: TensorList<T>) {
        assert_eq!(new_params.len(), 2 * N, "expected weights and bias per layer");
        let mut param_iter = new_params.into_iter();
        for layer in self.layers.iter_mut() {
            let weights = param_iter.next();
            let bias = param_iter.next();
            if let (Some(weights), Some(bias)) = (weights, bias) {
                layer.update_params(vec![weights, bias]);
            }
        }
    }
}

/// Stable on-disk form of an `Mlp`, independent of the element type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedMlp {
    pub format_version: u32,
    pub layers: Vec<SerializedLayer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedLayer {
    pub in_features: usize,
    pub out_features: usize,
    pub activation: Activation,
    /// Row-major `[in_features, out_features]`.
    pub weights: Vec<f64>,
    pub bias: Vec<f64>,
}

impl SerializedLayer {
    fn validate(&self, index: usize) -> Result<()> {
        if self.weights.len() != self.in_features * self.out_features {
            return Err(Error::Model(format!(
                "layer {index}: {} weights for a {}x{} layer",
                self.weights.len(),
                self.in_features,
                self.out_features
            )));
        }
        if self.bias.len() != self.out_features {
            return Err(Error::Model(format!(
                "layer {index}: {} biases for {} outputs",
                self.bias.len(),
                self.out_features
            )));
        }
        if self.weights.iter().chain(self.bias.iter()).any(|v| !v.is_finite()) {
            return Err(Error::Model(format!("layer {index}: non-finite parameter")));
        }
        Ok(())
    }
}

#[test]
fn test_mlp_creation() {
    Mlp::new([
        Linear::new(
            RcTensor::from([[1.0, -2.0], [-1.1, 0.7]]),
            RcTensor::new_with_filler(vec![1, 2], 1.0),
            Some(Activation::Tanh),
        ),
        Linear::new(
            RcTensor::from([[1.0, -2.0], [-1.1, 0.7]]),
            RcTensor::new_with_filler(vec![1, 2], 1.0),
            Some(Activation::Tanh),
        ),
    ]);
}

#[test]
fn test_mlp() {
    use crate::optim::sgd_step;

    let mut mlp = Mlp::new([
        Linear::new(
            RcTensor::from([[1.0, 1e-2, -1e-3, -2.0], [-1.1, 0., 0., 0.7]]),
            RcTensor::new_with_filler(vec![1, 4], 1.0),
            Some(Activation::Tanh),
        ),
        Linear::new(
            RcTensor::from([[1.0, -2.0], [-1.1, 0.7], [0.1, -0.2], [0.1, 0.0]]),
            RcTensor::new_with_filler(vec![1, 2], 1.0),
            Some(Activation::Tanh),
        ),
    ]);
    let input = RcTensor::new(vec![1.0, 2.0], vec![1, 2]);
    let expected = RcTensor::new(vec![-0.5, 0.5], vec![1, 2]);
    let initial_loss = (&mlp.forward(input.clone()) - &expected).abs().sum().elem();

    for _ in 0..1000 {
        let res = mlp.forward(input.clone());
        let loss = (&res - &expected).square().sum();
        loss.backward();
        sgd_step(&mut mlp, 0.1);
    }
    let res = mlp.forward(input.clone());
    let loss = (&res - &expected).abs().sum().elem();
    assert!(loss < 0.2, "loss={loss}");
    assert!(loss < initial_loss);
}

#[test]
fn test_from_sizes_and_serialization() {
    use rand::SeedableRng;
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    let mlp = Mlp::<f32, 3>::from_sizes(&[6, 4, 3, 1], Activation::Relu, Activation::Identity, &mut rng)
        .unwrap();
    assert_eq!(mlp.in_features(), 6);
    assert_eq!(mlp.layers()[2].activation(), Activation::Identity);
    assert_eq!(mlp.layers()[0].activation(), Activation::Relu);

    let restored = Mlp::<f32, 3>::from_serialized(&mlp.to_serialized()).unwrap();
    let input = RcTensor::new((0..12).map(|x| x as f32 / 12.0).collect(), vec![2, 6]);
    assert_eq!(mlp.forward(input.clone()), restored.forward(input));

    assert!(Mlp::<f32, 2>::from_sizes(&[6, 4, 3, 1], Activation::Relu, Activation::Identity, &mut rng).is_err());
    assert!(Mlp::<f32, 2>::from_serialized(&mlp.to_serialized()).is_err());
}

#[test]
fn test_from_serialized_rejects_bad_layers() {
    let mut serialized = SerializedMlp {
        format_version: MODEL_FORMAT_VERSION,
        layers: vec![SerializedLayer {
            in_features: 2,
            out_features: 1,
            activation: Activation::Identity,
            weights: vec![1.0],
            bias: vec![0.0],
        }],
    };
    assert!(Mlp::<f64, 1>::from_serialized(&serialized).is_err());
    serialized.layers[0].weights = vec![1.0, f64::NAN];
    assert!(Mlp::<f64, 1>::from_serialized(&serialized).is_err());
    serialized.layers[0].weights = vec![1.0, 2.0];
    assert!(Mlp::<f64, 1>::from_serialized(&serialized).is_ok());
    serialized.format_version = 99;
    assert!(Mlp::<f64, 1>::from_serialized(&serialized).is_err());
}
