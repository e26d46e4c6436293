use std::rc::Rc;

use std::cmp::PartialEq;
use std::convert::From;
use std::ops::{Add, Deref, Mul, Sub};

use num::traits::real::Real;

use super::autograd;
use super::functional;
use super::numeric::*;
use super::raw_tensor::*;
use super::tensor_like::*;
use super::types::Scalar;

/// A reference-counted tensor. Cloning is cheap and shares the gradient slot,
/// which is how parameters collect gradients from every use in a graph.
#[derive(Debug, PartialEq, Clone)]
pub struct RcTensor<T: Numeric>(pub(in crate::tensor) Rc<RawTensor<T>>);

impl<T> Deref for RcTensor<T>
where
    T: Numeric,
{
    type Target = RawTensor<T>;

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

impl<T: Numeric> RcTensor<T> {
    pub(in crate::tensor) fn from_raw(raw_tensor: RawTensor<T>) -> RcTensor<T> {
        RcTensor(Rc::new(raw_tensor))
    }

    pub fn new_with_filler(shape: Vec<usize>, filler: T) -> RcTensor<T> {
        RcTensor::from_raw(RawTensor::new_with_filler(shape, filler))
    }

    pub fn scalar(scalar: T) -> RcTensor<T> {
        RcTensor::from_raw(RawTensor::scalar(scalar))
    }

    pub fn new(array: Vec<T>, shape: Vec<usize>) -> RcTensor<T> {
        RcTensor::from_raw(RawTensor::new(array, shape))
    }

    pub fn is_scalar(&self) -> bool {
        self.0.is_scalar()
    }

    /// Same values and shape, no gradient and no history.
    pub fn detach(&self) -> RcTensor<T> {
        self.to_tensor()
    }

    /// Row `index` of a matrix as a `[1, columns]` tensor with no history.
    pub fn row(&self, index: usize) -> RcTensor<T> {
        assert_eq!(self.shape().len(), 2, "row() needs a matrix");
        let columns = self.shape()[1];
        RcTensor::new(
            self.array[index * columns..(index + 1) * columns].to_vec(),
            vec![1, columns],
        )
    }

    /// The accumulated gradient, or zeros when nothing has flowed back yet.
    pub fn grad(&self) -> RcTensor<T> {
        match self.grad.borrow().as_ref() {
            Some(grad) => grad.clone(),
            None => RcTensor::new_with_filler(self.shape().to_vec(), T::zero()),
        }
    }

    pub fn has_grad(&self) -> bool {
        self.grad.borrow().is_some()
    }

    pub fn zero_grad(&self) {
        *self.grad.borrow_mut() = None;
    }

    pub(in crate::tensor) fn update_grad(&self, grad: RcTensor<T>) {
        let mut slot = self.grad.borrow_mut();
        let accumulated = match slot.take() {
            Some(previous) => RcTensor::new(
                previous
                    .array
                    .iter()
                    .zip(grad.array.iter())
                    .map(|(&a, &b)| a + b)
                    .collect(),
                previous.shape.clone(),
            ),
            None => grad,
        };
        *slot = Some(accumulated);
    }

    /// Computes gradients of this single-element tensor with respect to every
    /// tensor it was computed from.
    pub fn backward(&self) {
        autograd::backward(self);
    }

    pub fn sum(&self) -> Scalar<T> {
        functional::sum(self)
    }

    pub fn square(&self) -> RcTensor<T> {
        functional::square(self)
    }

    pub fn matmul(&self, right: &RcTensor<T>) -> RcTensor<T> {
        functional::matmul(self, right)
    }
}

impl<T: Numeric + Real> RcTensor<T> {
    pub fn mean(&self) -> Scalar<T> {
        functional::mean(self)
    }

    pub fn abs(&self) -> RcTensor<T> {
        functional::abs(self)
    }
}

impl<T> TensorLikePrivate for RcTensor<T> where T: Numeric {}
impl<T> TensorLike for RcTensor<T>
where
    T: Numeric,
{
    type Elem = T;

    fn shape(&self) -> &[usize] {
        &self.0.shape
    }

    fn data(&self) -> &[T] {
        &self.0.array
    }

    fn to_tensor(&self) -> RcTensor<T> {
        self.0.to_tensor()
    }
}

impl<T> std::fmt::Display for RcTensor<T>
where
    T: Numeric,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RcTensor(shape={:?}, data={:?})", self.shape(), self.data())
    }
}

impl<T> From<T> for RcTensor<T>
where
    T: Numeric,
{
    fn from(value: T) -> Self {
        RcTensor::from_raw(RawTensor::from(value))
    }
}

impl<T, U> From<Vec<U>> for RcTensor<T>
where
    T: Numeric,
    RawTensor<T>: From<U>,
{
    fn from(value: Vec<U>) -> RcTensor<T> {
        RcTensor::from_raw(<RawTensor<T> as From<Vec<U>>>::from(value))
    }
}

impl<T, U, const N: usize> From<[U; N]> for RcTensor<T>
where
    T: Numeric,
    RawTensor<T>: From<U>,
    U: Clone,
{
    fn from(value: [U; N]) -> RcTensor<T> {
        RcTensor::from_raw(From::from(value.to_vec()))
    }
}

impl<T: Numeric> Add<&RcTensor<T>> for &RcTensor<T> {
    type Output = RcTensor<T>;
    fn add(self, right: &RcTensor<T>) -> Self::Output {
        functional::add(self, right)
    }
}

impl<T: Numeric> Add for RcTensor<T> {
    type Output = RcTensor<T>;
    fn add(self, right: RcTensor<T>) -> Self::Output {
        functional::add(&self, &right)
    }
}

impl<T: Numeric> Sub<&RcTensor<T>> for &RcTensor<T> {
    type Output = RcTensor<T>;
    fn sub(self, right: &RcTensor<T>) -> Self::Output {
        functional::sub(self, right)
    }
}

impl<T: Numeric> Sub for RcTensor<T> {
    type Output = RcTensor<T>;
    fn sub(self, right: RcTensor<T>) -> Self::Output {
        functional::sub(&self, &right)
    }
}

impl<T: Numeric> Mul<&RcTensor<T>> for &RcTensor<T> {
    type Output = RcTensor<T>;
    fn mul(self, right: &RcTensor<T>) -> Self::Output {
        functional::mul(self, right)
    }
}

impl<T: Numeric> Mul for RcTensor<T> {
    type Output = RcTensor<T>;
    fn mul(self, right: RcTensor<T>) -> Self::Output {
        functional::mul(&self, &right)
    }
}

#[test]
fn test_element_wise_multiplication() {
    let left = RcTensor::from([1, 2, 3]);
    let right = RcTensor::from([7, 2, 8]);
    assert_eq!(&left * &right, RcTensor::from([7, 4, 24]));
    assert_eq!(left * right, RcTensor::from([7, 4, 24]));
}

#[test]
fn test_grad_accumulates_until_zeroed() {
    let input = RcTensor::from([1.0, 2.0, 3.0]);
    input.sum().backward();
    input.sum().backward();
    assert_eq!(input.grad(), RcTensor::from([2.0, 2.0, 2.0]));
    input.zero_grad();
    assert!(!input.has_grad());
    assert_eq!(input.grad(), RcTensor::from([0.0, 0.0, 0.0]));
}

#[test]
fn test_detach_drops_history() {
    let input = RcTensor::from([1.0, -2.0]);
    let output = (&input * &input).detach();
    output.sum().backward();
    assert!(!input.has_grad());
    assert_eq!(output, RcTensor::from([1.0, 4.0]));
}

#[test]
fn test_row() {
    let matrix = RcTensor::new((0..6).collect(), vec![3, 2]);
    assert_eq!(matrix.row(1), RcTensor::new(vec![2, 3], vec![1, 2]));
}
