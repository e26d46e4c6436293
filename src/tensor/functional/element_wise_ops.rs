use crate::tensor::numeric::*;

use crate::tensor::autograd::{Derivative, VectorJacobianProduct};
use crate::tensor::utils::{broadcast_shape, global_index, IndexIterator};
use crate::tensor::{RawTensor, RcTensor, TensorLike, TensorList};
use num::traits::real::Real;

fn broadcast_zip<T, F>(left: &RcTensor<T>, right: &RcTensor<T>, op: F) -> RawTensor<T>
where
    T: Numeric,
    F: Fn(T, T) -> T,
{
    if left.shape() == right.shape() {
        let array = left
            .data()
            .iter()
            .zip(right.data().iter())
            .map(|(&l, &r)| op(l, r))
            .collect();
        return RawTensor::new(array, left.shape().to_vec());
    }
    let shape = match broadcast_shape(left.shape(), right.shape()) {
        Some(shape) => shape,
        None => panic!(
            "shapes {:?} and {:?} cannot be broadcast together",
            left.shape(),
            right.shape()
        ),
    };
    let array = IndexIterator::new(shape.clone())
        .map(|idx| op(left[&idx[..]], right[&idx[..]]))
        .collect();
    RawTensor::new(array, shape)
}

/// Sums an output-shaped buffer down to `target_shape`, undoing broadcasting.
pub(in crate::tensor) fn reduce_to_shape<T: Numeric>(
    values: &[T],
    output_shape: &[usize],
    target_shape: &[usize],
) -> RcTensor<T> {
    if output_shape == target_shape {
        return RcTensor::new(values.to_vec(), target_shape.to_vec());
    }
    let mut reduced = vec![T::zero(); target_shape.iter().product()];
    for (flat, idx) in IndexIterator::new(output_shape.to_vec()).enumerate() {
        match global_index(&idx, target_shape) {
            Ok(target_idx) => reduced[target_idx] += values[flat],
            Err(e) => panic!("{}", e),
        }
    }
    RcTensor::new(reduced, target_shape.to_vec())
}

fn binary<T: Numeric>(
    left: &RcTensor<T>,
    right: &RcTensor<T>,
    op: impl Fn(T, T) -> T,
    vector_jacobian_product: VectorJacobianProduct<T>,
    debug_info: &'static str,
) -> RcTensor<T> {
    let raw_tensor = broadcast_zip(left, right, op).with_grad_fn(Derivative::new(
        vec![left.clone(), right.clone()],
        vector_jacobian_product,
        debug_info,
    ));
    RcTensor::from_raw(raw_tensor)
}

fn unary<T: Numeric>(
    tensor: &RcTensor<T>,
    op: impl Fn(T) -> T,
    vector_jacobian_product: VectorJacobianProduct<T>,
    debug_info: &'static str,
) -> RcTensor<T> {
    let array = tensor.data().iter().map(|&x| op(x)).collect();
    let raw_tensor = RawTensor::new(array, tensor.shape().to_vec()).with_grad_fn(
        Derivative::new(vec![tensor.clone()], vector_jacobian_product, debug_info),
    );
    RcTensor::from_raw(raw_tensor)
}

/// `grad ⊙ f'(input)` for an element-wise `f`.
fn chain_unary<T: Numeric>(
    inputs: &TensorList<T>,
    grad: &RcTensor<T>,
    derivative: impl Fn(T) -> T,
) -> TensorList<T> {
    assert!(inputs.len() == 1);
    let input = &inputs[0];
    let array = grad
        .data()
        .iter()
        .zip(input.data().iter())
        .map(|(&g, &x)| g * derivative(x))
        .collect();
    vec![RcTensor::new(array, input.shape().to_vec())]
}

pub fn add<T: Numeric>(left: &RcTensor<T>, right: &RcTensor<T>) -> RcTensor<T> {
    binary(left, right, |l, r| l + r, add_vjp, "add")
}

fn add_vjp<T: Numeric>(inputs: &TensorList<T>, grad: &RcTensor<T>) -> TensorList<T> {
    assert!(inputs.len() == 2);
    vec![
        reduce_to_shape(grad.data(), grad.shape(), inputs[0].shape()),
        reduce_to_shape(grad.data(), grad.shape(), inputs[1].shape()),
    ]
}

pub fn sub<T: Numeric>(left: &RcTensor<T>, right: &RcTensor<T>) -> RcTensor<T> {
    binary(left, right, |l, r| l - r, sub_vjp, "sub")
}

fn sub_vjp<T: Numeric>(inputs: &TensorList<T>, grad: &RcTensor<T>) -> TensorList<T> {
    assert!(inputs.len() == 2);
    let negated: Vec<T> = grad.data().iter().map(|&g| T::zero() - g).collect();
    vec![
        reduce_to_shape(grad.data(), grad.shape(), inputs[0].shape()),
        reduce_to_shape(&negated, grad.shape(), inputs[1].shape()),
    ]
}

pub fn mul<T: Numeric>(left: &RcTensor<T>, right: &RcTensor<T>) -> RcTensor<T> {
    binary(left, right, |l, r| l * r, mul_vjp, "mul")
}

fn mul_vjp<T: Numeric>(inputs: &TensorList<T>, grad: &RcTensor<T>) -> TensorList<T> {
    assert!(inputs.len() == 2);
    let (left, right) = (&inputs[0], &inputs[1]);
    let mut left_partial = Vec::with_capacity(grad.count());
    let mut right_partial = Vec::with_capacity(grad.count());
    for (idx, &g) in IndexIterator::new(grad.shape().to_vec()).zip(grad.data().iter()) {
        left_partial.push(g * right[&idx[..]]);
        right_partial.push(g * left[&idx[..]]);
    }
    vec![
        reduce_to_shape(&left_partial, grad.shape(), left.shape()),
        reduce_to_shape(&right_partial, grad.shape(), right.shape()),
    ]
}

pub fn square<T: Numeric>(tensor: &RcTensor<T>) -> RcTensor<T> {
    unary(tensor, |x| x * x, square_vjp, "square")
}

fn square_vjp<T: Numeric>(inputs: &TensorList<T>, grad: &RcTensor<T>) -> TensorList<T> {
    chain_unary(inputs, grad, |x| (T::one() + T::one()) * x)
}

pub fn abs<T: Numeric>(tensor: &RcTensor<T>) -> RcTensor<T> {
    unary(
        tensor,
        |x| if x < T::zero() { T::zero() - x } else { x },
        abs_vjp,
        "abs",
    )
}

fn abs_vjp<T: Numeric>(inputs: &TensorList<T>, grad: &RcTensor<T>) -> TensorList<T> {
    chain_unary(inputs, grad, |x| {
        if x > T::zero() {
            T::one()
        } else if x < T::zero() {
            T::zero() - T::one()
        } else {
            T::zero()
        }
    })
}

pub fn relu<T: Numeric + Real>(tensor: &RcTensor<T>) -> RcTensor<T> {
    unary(tensor, |x| x.max(T::zero()), relu_vjp, "relu")
}

fn relu_vjp<T: Numeric + Real>(inputs: &TensorList<T>, grad: &RcTensor<T>) -> TensorList<T> {
    chain_unary(inputs, grad, |x| if x > T::zero() { T::one() } else { T::zero() })
}

pub fn tanh<T: Numeric + Real>(tensor: &RcTensor<T>) -> RcTensor<T> {
    unary(tensor, |x| x.tanh(), tanh_vjp, "tanh")
}

fn tanh_vjp<T: Numeric + Real>(inputs: &TensorList<T>, grad: &RcTensor<T>) -> TensorList<T> {
    chain_unary(inputs, grad, |x| T::one() - x.tanh().powi(2))
}

pub fn identity<T: Numeric>(tensor: &RcTensor<T>) -> RcTensor<T> {
    tensor.clone()
}

#[cfg(test)]
pub(super) fn numerical_gradient(f: impl Fn(&RcTensor<f64>) -> RcTensor<f64>, input: &RcTensor<f64>) -> Vec<f64> {
    let epsilon = 1e-6;
    (0..input.count())
        .map(|i| {
            let mut plus = input.data().to_vec();
            let mut minus = input.data().to_vec();
            plus[i] += epsilon;
            minus[i] -= epsilon;
            let f_plus = f(&RcTensor::new(plus, input.shape().to_vec())).elem();
            let f_minus = f(&RcTensor::new(minus, input.shape().to_vec())).elem();
            (f_plus - f_minus) / (2.0 * epsilon)
        })
        .collect()
}

#[cfg(test)]
pub(super) fn assert_close(left: &[f64], right: &[f64], tolerance: f64) {
    assert_eq!(left.len(), right.len());
    for (i, (l, r)) in left.iter().zip(right.iter()).enumerate() {
        assert!((l - r).abs() <= tolerance, "position {i}: {l} vs {r}");
    }
}

#[test]
fn test_add() {
    let tensor1 = RcTensor::new_with_filler(vec![4, 4], 1);
    let tensor2 = RcTensor::new((0..32).collect(), vec![2, 4, 4]);
    let tensor3 = RcTensor::new((1..33).collect(), vec![2, 4, 4]);
    assert_eq!(&tensor2 + &tensor1, tensor3);
    assert_eq!(&tensor1 + &tensor2, tensor3);
    assert_eq!(tensor1 + tensor2, tensor3);
}

#[test]
fn test_add_scalar() {
    let tensor1 = RcTensor::new((0..32).collect(), vec![2, 4, 4]);
    let tensor2 = RcTensor::new((42..(32 + 42)).collect(), vec![2, 4, 4]);
    let scalar = RcTensor::scalar(42);
    assert_eq!(&tensor1 + &scalar, tensor2);
    assert_eq!(&scalar + &tensor1, tensor2);
}

#[test]
fn test_broadcast_add_gradient_reduces_over_batch() {
    let batch = RcTensor::from([[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]);
    let bias = RcTensor::from([[0.5, -0.5]]);
    (&batch + &bias).sum().backward();
    assert_eq!(bias.grad(), RcTensor::from([[3.0, 3.0]]));
    assert_eq!(batch.grad(), RcTensor::new_with_filler(vec![3, 2], 1.0));
}

#[test]
fn test_sub_gradient() {
    let left = RcTensor::from([1.0, 2.0]);
    let right = RcTensor::from([3.0, 5.0]);
    (&left - &right).sum().backward();
    assert_eq!(left.grad(), RcTensor::from([1.0, 1.0]));
    assert_eq!(right.grad(), RcTensor::from([-1.0, -1.0]));
}

#[test]
fn test_mul_gradient_matches_numerical() {
    let right = RcTensor::from([[0.3, -1.2, 2.0]]);
    let input = RcTensor::from([[1.0, 2.0, -3.0], [0.5, 0.0, 4.0]]);
    (&input * &right).sum().backward();
    let numerical = numerical_gradient(|x| (x * &right).sum(), &input);
    assert_close(input.grad().data(), &numerical, 1e-6);
    // right is broadcast over two rows
    assert_close(right.grad().data(), &[1.5, 2.0, 1.0], 1e-12);
}

#[test]
fn test_shared_input_accumulates() {
    // d/dx sum(x * x + x) = 2x + 1
    let input = RcTensor::from([1.0, -2.0, 0.5]);
    let output = (&(&input * &input) + &input).sum();
    output.backward();
    assert_close(input.grad().data(), &[3.0, -3.0, 2.0], 1e-12);
}

#[test]
fn test_tanh_gradient_matches_numerical() {
    let input = RcTensor::from([[0.666, 12.0], [-3.2, -0.1]]);
    tanh(&tanh(&input)).sum().backward();
    let numerical = numerical_gradient(|x| tanh(&tanh(x)).sum(), &input);
    assert_close(input.grad().data(), &numerical, 1e-6);
}

#[test]
fn test_relu() {
    let input = RcTensor::from([-1.0, 0.0, 2.5]);
    let output = relu(&input);
    assert_eq!(output, RcTensor::from([0.0, 0.0, 2.5]));
    output.sum().backward();
    assert_eq!(input.grad(), RcTensor::from([0.0, 0.0, 1.0]));
}

#[test]
fn test_square_and_abs_gradients() {
    let input = RcTensor::from([-1.5, 0.0, 2.0]);
    square(&input).sum().backward();
    assert_eq!(input.grad(), RcTensor::from([-3.0, 0.0, 4.0]));
    input.zero_grad();
    abs(&input).sum().backward();
    assert_eq!(input.grad(), RcTensor::from([-1.0, 0.0, 1.0]));
}

#[test]
#[should_panic]
fn test_incompatible_shapes_panic() {
    let _ = &RcTensor::new_with_filler(vec![2, 3], 1) + &RcTensor::new_with_filler(vec![3, 2], 1);
}
