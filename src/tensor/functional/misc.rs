use crate::tensor::autograd::Derivative;
use crate::tensor::numeric::*;
use crate::tensor::{RawTensor, RcTensor, Scalar, TensorLike, TensorList};

use num::traits::real::Real;
use rayon::prelude::*;

fn count_as<T: Real>(count: usize) -> T {
    match num::cast::<usize, T>(count) {
        Some(v) => v,
        None => panic!("{count} is not representable in the tensor element type"),
    }
}

pub fn sum<T: Numeric>(tensor: &RcTensor<T>) -> Scalar<T> {
    let v = tensor
        .data()
        .iter()
        .fold(T::zero(), |acc, &x| acc + x);
    let raw_scalar =
        RawTensor::scalar(v).with_grad_fn(Derivative::new(vec![tensor.clone()], sum_vjp, "sum"));
    RcTensor::from_raw(raw_scalar)
}

fn sum_vjp<T: Numeric>(inputs: &TensorList<T>, grad: &RcTensor<T>) -> TensorList<T> {
    assert_eq!(inputs.len(), 1);
    vec![RcTensor::new_with_filler(
        inputs[0].shape().to_vec(),
        grad.elem(),
    )]
}

pub fn mean<T: Numeric + Real>(tensor: &RcTensor<T>) -> Scalar<T> {
    let count = count_as::<T>(tensor.count());
    let v = tensor
        .data()
        .iter()
        .fold(T::zero(), |acc, &x| acc + x)
        / count;
    let raw_scalar =
        RawTensor::scalar(v).with_grad_fn(Derivative::new(vec![tensor.clone()], mean_vjp, "mean"));
    RcTensor::from_raw(raw_scalar)
}

fn mean_vjp<T: Numeric + Real>(inputs: &TensorList<T>, grad: &RcTensor<T>) -> TensorList<T> {
    assert_eq!(inputs.len(), 1);
    let count = count_as::<T>(inputs[0].count());
    vec![RcTensor::new_with_filler(
        inputs[0].shape().to_vec(),
        grad.elem() / count,
    )]
}

/// Mean squared error between a prediction and a target of the same shape.
pub fn mse_loss<T: Numeric + Real>(prediction: &RcTensor<T>, target: &RcTensor<T>) -> Scalar<T> {
    assert_eq!(
        prediction.shape(),
        target.shape(),
        "prediction and target must have the same shape"
    );
    mean(&(prediction - target).square())
}

fn transpose<T: Numeric>(array: &[T], rows: usize, columns: usize) -> Vec<T> {
    let mut result = Vec::with_capacity(array.len());
    for j in 0..columns {
        for i in 0..rows {
            result.push(array[i * columns + j]);
        }
    }
    result
}

/// `[n, k] x [k, m] -> [n, m]`, one output row per rayon task.
fn matmul_buffers<T: Numeric>(left: &[T], right: &[T], n: usize, k: usize, m: usize) -> Vec<T> {
    let mut result = vec![T::zero(); n * m];
    if n == 0 || m == 0 {
        return result;
    }
    result
        .par_chunks_mut(m)
        .enumerate()
        .for_each(|(i, row)| {
            for (p, &left_ip) in left[i * k..(i + 1) * k].iter().enumerate() {
                for (out, &right_pj) in row.iter_mut().zip(right[p * m..(p + 1) * m].iter()) {
                    *out += left_ip * right_pj;
                }
            }
        });
    result
}

/// Matrix product of two 2-D tensors.
///
/// ```
/// # use ne_light::tensor::*;
/// let matrix = RcTensor::new(vec![0, 1, 2, 3], vec![2, 2]);
/// let diag = RcTensor::new(vec![1, 1], vec![2, 1]);
/// let r = matrix.matmul(&diag);
///
/// assert_eq!(r.shape(), &[2, 1]);
/// assert_eq!(r, RcTensor::new(vec![1, 5], vec![2, 1]));
/// ```
pub fn matmul<T: Numeric>(left: &RcTensor<T>, right: &RcTensor<T>) -> RcTensor<T> {
    assert!(
        left.shape().len() == 2 && right.shape().len() == 2,
        "matmul needs two matrices, got {:?} and {:?}",
        left.shape(),
        right.shape()
    );
    let (n, k) = (left.shape()[0], left.shape()[1]);
    let m = right.shape()[1];
    assert_eq!(
        k,
        right.shape()[0],
        "inner dimensions do not match: {:?} x {:?}",
        left.shape(),
        right.shape()
    );
    let array = matmul_buffers(left.data(), right.data(), n, k, m);
    let raw_tensor = RawTensor::new(array, vec![n, m]).with_grad_fn(Derivative::new(
        vec![left.clone(), right.clone()],
        matmul_vjp,
        "matmul",
    ));
    RcTensor::from_raw(raw_tensor)
}

fn matmul_vjp<T: Numeric>(inputs: &TensorList<T>, grad: &RcTensor<T>) -> TensorList<T> {
    assert_eq!(inputs.len(), 2);
    let (left, right) = (&inputs[0], &inputs[1]);
    let (n, k) = (left.shape()[0], left.shape()[1]);
    let m = right.shape()[1];
    // dL = G R^T, dR = L^T G
    let right_t = transpose(right.data(), k, m);
    let left_t = transpose(left.data(), n, k);
    vec![
        RcTensor::new(matmul_buffers(grad.data(), &right_t, n, m, k), vec![n, k]),
        RcTensor::new(matmul_buffers(&left_t, grad.data(), k, n, m), vec![k, m]),
    ]
}

#[test]
fn test_sum_backward() {
    let input = RcTensor::from([1.0, 2.0, 3.0]);
    input.sum().backward();
    assert_eq!(input.grad(), RcTensor::from([1.0, 1.0, 1.0]));
}

#[test]
fn test_mean() {
    let input = RcTensor::from([[1.0, 2.0], [3.0, 6.0]]);
    let output = mean(&input);
    assert_eq!(output.elem(), 3.0);
    output.backward();
    assert_eq!(input.grad(), RcTensor::new_with_filler(vec![2, 2], 0.25));
}

#[test]
fn test_matmul_2x2() {
    let matrix = RcTensor::new(vec![0, 1, 2, 3], vec![2, 2]);
    let shape = vec![2, 1];
    let e1 = RcTensor::new(vec![0, 1], vec![2, 1]);
    let e2 = RcTensor::new(vec![1, 0], vec![2, 1]);
    assert_eq!(matrix.matmul(&e1), RcTensor::new(vec![1, 3], shape.clone()));
    assert_eq!(matrix.matmul(&e2), RcTensor::new(vec![0, 2], shape));
}

#[test]
fn test_matmul_rectangular() {
    let left = RcTensor::new((1..7).collect(), vec![2, 3]);
    let right = RcTensor::new((1..13).collect(), vec![3, 4]);
    let expected = RcTensor::new(vec![38, 44, 50, 56, 83, 98, 113, 128], vec![2, 4]);
    assert_eq!(left.matmul(&right), expected);
}

#[test]
fn test_matmul_gradients() {
    let left = RcTensor::from([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
    let right = RcTensor::from([[0.5, -1.0], [2.0, 0.0], [-0.5, 1.5]]);
    left.matmul(&right).sum().backward();
    // d/dL sum(LR) = 1 R^T, d/dR sum(LR) = L^T 1
    assert_eq!(
        left.grad(),
        RcTensor::from([[-0.5, 2.0, 1.0], [-0.5, 2.0, 1.0]])
    );
    assert_eq!(right.grad(), RcTensor::from([[5.0, 5.0], [7.0, 7.0], [9.0, 9.0]]));
}

#[test]
fn test_matmul_propagates_non_finite_weights() {
    // 0 * inf is NaN, so zero padding must not hide a diverged weight
    let left = RcTensor::from([[0.0, 1.0]]);
    let right = RcTensor::from([[f64::INFINITY], [2.0]]);
    assert!(left.matmul(&right).data()[0].is_nan());
}

#[test]
fn test_matmul_gradient_matches_numerical() {
    use super::element_wise_ops::{assert_close, numerical_gradient};

    let left = RcTensor::from([[0.3, -1.2, 2.0], [1.5, 0.0, -0.7]]);
    let right = RcTensor::from([[0.5, -1.0], [2.0, 0.25], [-0.5, 1.5]]);
    // square makes the loss depend on both factors non-linearly
    left.matmul(&right).square().sum().backward();

    let by_left = numerical_gradient(|x| x.matmul(&right.detach()).square().sum(), &left);
    assert_close(left.grad().data(), &by_left, 1e-5);
    let by_right = numerical_gradient(|x| left.detach().matmul(x).square().sum(), &right);
    assert_close(right.grad().data(), &by_right, 1e-5);
}

#[test]
fn test_mse_loss_gradient_matches_numerical() {
    use super::element_wise_ops::{assert_close, numerical_gradient};

    let prediction = RcTensor::from([[1.0], [2.5], [-4.0], [0.2]]);
    let target = RcTensor::from([[1.5], [3.0], [2.0], [0.0]]);
    mse_loss(&prediction, &target).backward();
    let numerical = numerical_gradient(|x| mse_loss(x, &target.detach()), &prediction);
    assert_close(prediction.grad().data(), &numerical, 1e-6);
}

#[test]
fn test_mse_loss() {
    let prediction = RcTensor::from([[1.0], [2.0], [4.0]]);
    let target = RcTensor::from([[1.0], [3.0], [2.0]]);
    let loss = mse_loss(&prediction, &target);
    assert!((loss.elem() - 5.0 / 3.0).abs() < 1e-12);
    loss.backward();
    // 2 (p - t) / n
    let expected = [0.0, -2.0 / 3.0, 4.0 / 3.0];
    for (g, e) in prediction.grad().data().iter().zip(expected.iter()) {
        assert!((g - e).abs() < 1e-12);
    }
}
