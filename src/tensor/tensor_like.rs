use super::numeric::*;
use super::utils::{global_index, IndexIterator};
use super::RcTensor;

pub(in crate::tensor) mod private {
    pub trait TensorLikePrivate {}
}
pub(crate) use self::private::TensorLikePrivate;

/// Read access shared by `RawTensor` and `RcTensor`.
pub trait TensorLike: TensorLikePrivate + std::fmt::Debug {
    type Elem: Numeric;

    fn shape(&self) -> &[usize];

    /// The row-major buffer.
    fn data(&self) -> &[Self::Elem];

    /// Convert self into a new tensor with no gradient history.
    fn to_tensor(&self) -> RcTensor<Self::Elem>;

    /// Broadcasting read: `index` may be longer than the shape, and size-one
    /// dimensions always read position zero.
    ///
    /// ```
    /// # use ne_light::tensor::*;
    /// let matrix = RcTensor::new(vec![0, 1, 2, 3], vec![2, 2]);
    /// let tensor = RcTensor::new((0..16).collect(), vec![2, 2, 1, 2, 2]);
    ///
    /// assert_eq!(matrix.get(&[0, 1]), matrix.get(&[0, 0, 1]));
    /// assert_eq!(matrix.get(&[0, 1]), matrix.get(&[0, 4, 0, 1]));
    /// assert_eq!(tensor.get(&[0, 0, 0, 0, 1]), tensor.get(&[0, 0, 10, 0, 1]));
    /// ```
    fn get(&self, index: &[usize]) -> Result<&Self::Elem, String> {
        let global_idx = global_index(index, self.shape())?;
        Ok(&self.data()[global_idx])
    }

    fn count(&self) -> usize {
        self.shape().iter().product()
    }

    #[inline]
    fn get_first_elem(&self) -> &Self::Elem {
        &self.data()[0]
    }

    fn elem(&self) -> Self::Elem {
        assert_eq!(
            self.count(),
            1,
            "elem() needs a single-element tensor, got shape {:?}",
            self.shape()
        );
        *self.get_first_elem()
    }

    fn same_shape<U>(&self, other: &U) -> bool
    where
        U: TensorLike<Elem = Self::Elem>,
    {
        self.shape() == other.shape()
    }

    fn broadcastable(&self, new_shape: &[usize]) -> bool {
        self.shape()
            .iter()
            .rev()
            .zip(new_shape.iter().rev())
            .all(|(&d1, &d2)| d1 == d2 || d1 == 1 || d2 == 1)
    }

    fn iter_indices(&self) -> IndexIterator {
        IndexIterator::new(self.shape().to_vec())
    }

    fn left_scalar_multiplication(&self, &scalar: &Self::Elem) -> RcTensor<Self::Elem> {
        RcTensor::new(
            self.data().iter().map(|&elem| scalar * elem).collect(),
            self.shape().to_vec(),
        )
    }
}

#[test]
fn test_broadcastable() {
    let tensor = RcTensor::new_with_filler(vec![4, 1, 3], 0);
    assert!(tensor.broadcastable(&[4, 5, 3]));
    assert!(tensor.broadcastable(&[3]));
    assert!(tensor.broadcastable(&[2, 3]));
    assert!(!tensor.broadcastable(&[4, 2, 2]));
}
