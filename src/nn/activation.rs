use num::traits::real::Real;
use serde::{Deserialize, Serialize};

use crate::tensor::{functional, Numeric, RcTensor};

/// Element-wise non-linearity applied after a `Linear` layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Relu,
    Tanh,
    Identity,
}

impl Activation {
    pub fn apply<T: Numeric + Real>(&self, tensor: &RcTensor<T>) -> RcTensor<T> {
        match self {
            Activation::Relu => functional::relu(tensor),
            Activation::Tanh => functional::tanh(tensor),
            Activation::Identity => functional::identity(tensor),
        }
    }
}

#[test]
fn test_activation_apply() {
    use crate::tensor::TensorLike;
    let input = RcTensor::from([-2.0, 0.5]);
    assert_eq!(Activation::Relu.apply(&input), RcTensor::from([0.0, 0.5]));
    assert_eq!(Activation::Identity.apply(&input), input);
    let tanh = Activation::Tanh.apply(&input);
    assert!((tanh.data()[1] - 0.5f64.tanh()).abs() < 1e-12);
}
