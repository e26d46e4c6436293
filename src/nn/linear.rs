use num::traits::real::Real;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::nn::{Activation, Module};
use crate::tensor::{Numeric, RcTensor, TensorLike, TensorList};
use crate::{Error, Result};

#[derive(Debug)]
pub struct Linear<T>
where
    T: Numeric,
{
    /// `[in_features, out_features]`
    pub weights: RcTensor<T>,
    /// `[1, out_features]`, broadcast over the batch
    pub bias: RcTensor<T>,
    activation: Activation,
}

impl<T> Linear<T>
where
    T: Numeric + Real,
{
    pub fn new(weights: RcTensor<T>, bias: RcTensor<T>, activation: Option<Activation>) -> Self {
        assert_eq!(weights.shape().len(), 2, "weights must be a matrix");
        assert_eq!(
            bias.shape(),
            &[1, weights.shape()[1]],
            "bias must be [1, out_features]"
        );
        Linear {
            weights,
            bias,
            activation: activation.unwrap_or(Activation::Identity),
        }
    }

    /// He initialisation: weights ~ N(0, 2 / in_features), zero bias.
    pub fn init<R: Rng + ?Sized>(
        in_features: usize,
        out_features: usize,
        activation: Activation,
        rng: &mut R,
    ) -> Result<Self> {
        if in_features == 0 || out_features == 0 {
            return Err(Error::Model(format!(
                "layer dimensions must be positive, got {in_features} -> {out_features}"
            )));
        }
        let std_dev = (2.0 / in_features as f64).sqrt();
        let normal = Normal::new(0.0, std_dev).map_err(|e| Error::Model(e.to_string()))?;
        let weights = (0..in_features * out_features)
            .map(|_| cast_param(normal.sample(&mut *rng)))
            .collect::<Result<Vec<T>>>()?;
        Ok(Linear::new(
            RcTensor::new(weights, vec![in_features, out_features]),
            RcTensor::new_with_filler(vec![1, out_features], T::zero()),
            Some(activation),
        ))
    }

    pub fn in_features(&self) -> usize {
        self.weights.shape()[0]
    }

    pub fn out_features(&self) -> usize {
        self.weights.shape()[1]
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }
}

pub(crate) fn cast_param<T: Real>(value: f64) -> Result<T> {
    num::cast::<f64, T>(value)
        .ok_or_else(|| Error::Model(format!("{value} is not representable as a parameter")))
}

impl<T: Numeric> crate::nn::module::private::Private for Linear<T> {}

impl<T: Numeric + Real> Module<T> for Linear<T> {
    type InputType = RcTensor<T>;
    type OutputType = RcTensor<T>;

    fn forward(&self, batch: RcTensor<T>) -> RcTensor<T> {
        let y = batch.matmul(&self.weights);
        self.activation.apply(&(&y + &self.bias))
    }

    fn params(&self) -> TensorList<T> {
        vec![self.weights.clone(), self.bias.clone()]
    }

    fn update_params(&mut self, mut new_params: TensorList<T>) {
        assert_eq!(new_params.len(), 2, "a linear layer has weights and bias");
        self.bias = new_params.remove(1);
        self.weights = new_params.remove(0);
    }
}

#[test]
fn test_layer_no_grad() {
    let layer = Linear::new(
        RcTensor::new_with_filler(vec![2, 2], 1.0),
        RcTensor::new_with_filler(vec![1, 2], 1.0),
        None,
    );
    let input = RcTensor::new(vec![1.0, 2.0], vec![1, 2]);
    let res = layer.forward(input);
    let expected = RcTensor::new(vec![4.0, 4.0], vec![1, 2]);

    assert_eq!(res, expected);
}

#[test]
fn test_layer_sets_param_grads() {
    let layer = Linear::new(
        RcTensor::from([[1.0, -2.0], [-1.1, 0.7]]),
        RcTensor::new_with_filler(vec![1, 2], 1.0),
        None,
    );
    let input = RcTensor::from([[1.0, 2.0], [3.0, 4.0]]);
    layer.forward(input).sum().backward();
    assert_eq!(layer.weights.grad(), RcTensor::from([[4.0, 4.0], [6.0, 6.0]]));
    assert_eq!(layer.bias.grad(), RcTensor::from([[2.0, 2.0]]));
}

#[test]
fn test_init_shapes() {
    use rand::SeedableRng;
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);
    let layer = Linear::<f32>::init(5, 3, Activation::Relu, &mut rng).unwrap();
    assert_eq!(layer.weights.shape(), &[5, 3]);
    assert_eq!(layer.bias, RcTensor::new_with_filler(vec![1, 3], 0.0));
    assert_eq!(layer.activation(), Activation::Relu);
    assert!(Linear::<f32>::init(0, 3, Activation::Relu, &mut rng).is_err());
}
