use num::traits::real::Real;

use crate::nn::Module;
use crate::tensor::{Numeric, RcTensor, TensorLike, TensorList};

/// One plain gradient descent step: `p <- p - step_size * grad(p)`.
///
/// The new parameters carry no history, so gradients never leak from one
/// step into the next.
pub fn sgd_step<T, M>(module: &mut M, step_size: T)
where
    T: Numeric + Real,
    M: Module<T>,
{
    let new_params: TensorList<T> = module
        .params()
        .iter()
        .map(|param| {
            let grad = param.grad();
            let array = param
                .data()
                .iter()
                .zip(grad.data().iter())
                .map(|(&p, &g)| p - step_size * g)
                .collect();
            RcTensor::new(array, param.shape().to_vec())
        })
        .collect();
    module.update_params(new_params);
}

/// Stochastic gradient descent with optional classical momentum.
#[derive(Debug)]
pub struct Sgd<T: Numeric + Real> {
    learning_rate: T,
    momentum: T,
    velocities: Option<Vec<Vec<T>>>,
}

impl<T: Numeric + Real> Sgd<T> {
    pub fn new(learning_rate: T, momentum: T) -> Self {
        assert!(learning_rate > T::zero(), "Step size must be positive!");
        assert!(
            momentum >= T::zero() && momentum < T::one(),
            "momentum must lie in [0, 1)"
        );
        Sgd {
            learning_rate,
            momentum,
            velocities: None,
        }
    }

    pub fn learning_rate(&self) -> T {
        self.learning_rate
    }

    pub fn zero_grad<M: Module<T>>(&self, module: &M) {
        module.params().iter().for_each(|p| p.zero_grad());
    }

    pub fn step<M: Module<T>>(&mut self, module: &mut M) {
        if self.momentum == T::zero() {
            sgd_step(module, self.learning_rate);
            return;
        }
        let params = module.params();
        let velocities = self.velocities.get_or_insert_with(|| {
            params
                .iter()
                .map(|p| vec![T::zero(); p.count()])
                .collect()
        });
        let new_params = params
            .iter()
            .zip(velocities.iter_mut())
            .map(|(param, velocity)| {
                let grad = param.grad();
                let array = param
                    .data()
                    .iter()
                    .zip(grad.data().iter())
                    .zip(velocity.iter_mut())
                    .map(|((&p, &g), v)| {
                        *v = self.momentum * *v + g;
                        p - self.learning_rate * *v
                    })
                    .collect();
                RcTensor::new(array, param.shape().to_vec())
            })
            .collect();
        module.update_params(new_params);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::{Activation, Linear};

    fn quadratic_layer() -> Linear<f64> {
        Linear::new(
            RcTensor::from([[2.0], [-1.0]]),
            RcTensor::from([[0.5]]),
            Some(Activation::Identity),
        )
    }

    #[test]
    fn test_sgd_step_moves_against_gradient() {
        let mut layer = quadratic_layer();
        let input = RcTensor::from([[1.0, 1.0]]);
        // output 1.5, loss = output^2, dloss/doutput = 3
        layer.forward(input).square().sum().backward();
        sgd_step(&mut layer, 0.5);
        assert_eq!(layer.weights, RcTensor::from([[0.5], [-2.5]]));
        assert_eq!(layer.bias, RcTensor::from([[-1.0]]));
        assert!(!layer.weights.has_grad());
    }

    #[test]
    fn test_momentum_accumulates_velocity() {
        let mut layer = Linear::new(
            RcTensor::from([[0.0]]),
            RcTensor::from([[0.0]]),
            None,
        );
        let mut optimiser = Sgd::new(0.5, 0.5);
        for _ in 0..2 {
            // d/dw sum(w * 1 + b) = 1
            layer.forward(RcTensor::from([[1.0]])).sum().backward();
            optimiser.step(&mut layer);
        }
        // v1 = 1, v2 = 0.5 + 1 = 1.5, w = -0.5 - 0.75
        assert_eq!(layer.weights, RcTensor::from([[-1.25]]));
    }

    #[test]
    #[should_panic]
    fn test_rejects_non_positive_learning_rate() {
        Sgd::new(0.0, 0.0);
    }
}
