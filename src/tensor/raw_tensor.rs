use std::cell::RefCell;
use std::cmp::PartialEq;
use std::convert::From;
use std::ops::Index;

use super::autograd::Derivative;
use super::numeric::*;
use super::rc_tensor::*;
use super::tensor_like::*;
use super::utils::global_index;

/// The storage behind every `RcTensor`: a row-major buffer, its shape, the
/// gradient accumulated during `backward`, and the node that produced it.
#[derive(Debug, Clone)]
pub struct RawTensor<T>
where
    T: Numeric,
{
    pub(in crate::tensor) array: Vec<T>,
    pub(in crate::tensor) shape: Vec<usize>,
    pub(in crate::tensor) grad: RefCell<Option<RcTensor<T>>>,
    pub(in crate::tensor) grad_fn: Option<Derivative<T>>,
}

impl<T: Numeric> PartialEq for RawTensor<T> {
    // gradients and graph history do not take part in equality
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape && self.array == other.array
    }
}

impl<T> Default for RawTensor<T>
where
    T: Numeric,
{
    fn default() -> Self {
        RawTensor {
            shape: vec![],
            grad: RefCell::new(None),
            array: vec![],
            grad_fn: None,
        }
    }
}

impl<T, U> From<Vec<U>> for RawTensor<T>
where
    T: Numeric,
    RawTensor<T>: From<U>,
{
    fn from(value: Vec<U>) -> RawTensor<T> {
        let tensors: Vec<_> = value.into_iter().map(RawTensor::from).collect();
        let (arrays, shapes): (Vec<_>, Vec<_>) =
            tensors.into_iter().map(|t| (t.array, t.shape)).unzip();
        assert!(
            shapes.iter().all(|shape| *shape == shapes[0]),
            "nested tensors must all have the same shape, got {shapes:?}"
        );

        let mut shape = vec![shapes.len()];
        shape.extend_from_slice(&shapes[0]);
        RawTensor {
            array: arrays.into_iter().flatten().collect(),
            shape,
            ..Default::default()
        }
    }
}

impl<T, U, const N: usize> From<[U; N]> for RawTensor<T>
where
    T: Numeric,
    RawTensor<T>: From<U>,
    U: Clone,
{
    fn from(value: [U; N]) -> RawTensor<T> {
        From::from(value.to_vec())
    }
}

impl<T> From<T> for RawTensor<T>
where
    T: Numeric,
{
    fn from(value: T) -> Self {
        RawTensor::scalar(value)
    }
}

impl<T> RawTensor<T>
where
    T: Numeric,
{
    pub fn is_scalar(&self) -> bool {
        self.array.len() == 1 && self.shape.is_empty()
    }

    /// Note! An empty `shape` constructs a scalar.
    pub fn new_with_filler(shape: Vec<usize>, filler: T) -> RawTensor<T> {
        let total = shape.iter().product();
        RawTensor {
            array: vec![filler; total],
            shape,
            ..Default::default()
        }
    }

    pub fn scalar(scalar: T) -> RawTensor<T> {
        RawTensor {
            array: vec![scalar],
            shape: vec![],
            ..Default::default()
        }
    }

    pub fn new(array: Vec<T>, shape: Vec<usize>) -> RawTensor<T> {
        assert_eq!(
            shape.iter().product::<usize>(),
            array.len(),
            "shape {shape:?} does not match a buffer of {} elements",
            array.len()
        );
        RawTensor {
            array,
            shape,
            ..Default::default()
        }
    }

    pub(in crate::tensor) fn with_grad_fn(mut self, grad_fn: Derivative<T>) -> RawTensor<T> {
        self.grad_fn = Some(grad_fn);
        self
    }

    pub(in crate::tensor) fn set(&mut self, index: &[usize], value: T) -> Result<(), String> {
        let global_idx = global_index(index, &self.shape)?;
        self.array[global_idx] = value;
        Ok(())
    }
}

impl<T> Index<&[usize]> for RawTensor<T>
where
    T: Numeric,
{
    type Output = T;

    fn index(&self, index: &[usize]) -> &Self::Output {
        match self.get(index) {
            Ok(v) => v,
            Err(e) => panic!("{}", e),
        }
    }
}

impl<T> TensorLikePrivate for RawTensor<T> where T: Numeric {}
impl<T> TensorLike for RawTensor<T>
where
    T: Numeric,
{
    type Elem = T;

    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn data(&self) -> &[T] {
        &self.array
    }

    fn to_tensor(&self) -> RcTensor<T> {
        RcTensor::new(self.array.clone(), self.shape.clone())
    }
}

#[test]
fn test_new_with_filler() {
    let vec = RawTensor::new_with_filler(vec![4], 4);
    assert_eq!(vec.shape(), &[4]);
    assert_eq!(vec.get(&[2]).unwrap(), &4);
    assert!(RawTensor::new_with_filler(vec![], 1.5).is_scalar());
}

#[test]
fn test_get_3x3() {
    let matrix = RawTensor::new(vec![0, 1, 2, 3, 4, 5, 6, 7, 8], vec![3, 3]);
    let mut prev = -1;
    for i in 0..3 {
        for j in 0..3 {
            let &curr = matrix.get(&[i, j]).unwrap();
            assert_eq!(prev + 1, curr);
            prev = curr;
        }
    }
    assert_eq!(matrix[&[2usize, 2][..]], 8);
}

#[test]
fn test_from_nested() {
    let tensor = RawTensor::from([[1, 2, 3], [4, 5, 6]]);
    assert_eq!(tensor.shape(), &[2, 3]);
    assert_eq!(tensor, RawTensor::new((1..7).collect(), vec![2, 3]));
}

#[test]
#[should_panic]
fn test_new_rejects_mismatched_shape() {
    RawTensor::new(vec![1.0, 2.0, 3.0], vec![2, 2]);
}
