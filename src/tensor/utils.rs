use itertools::EitherOrBoth::{Both, Left, Right};
use itertools::Itertools;
use std::cmp::max;

/// Iterates over every index of a shape in row-major order.
///
/// A zero-dimensional shape yields a single empty index; a shape with a zero
/// dimension yields nothing.
pub struct IndexIterator {
    index: Vec<usize>,
    dimensions: Vec<usize>,
    first: bool,
}

impl IndexIterator {
    pub fn new(dimensions: Vec<usize>) -> IndexIterator {
        IndexIterator {
            index: vec![0; dimensions.len()],
            first: !dimensions.contains(&0),
            dimensions,
        }
    }
}

impl Iterator for IndexIterator {
    type Item = Vec<usize>;
    fn next(&mut self) -> Option<Self::Item> {
        if self.first {
            self.first = false;
            return Some(self.index.clone());
        }
        if !self.dimensions.contains(&0) && increment_index(&mut self.index, &self.dimensions) {
            return Some(self.index.clone());
        }
        None
    }
}

/// Advances `index` to the next position of `shape` in row-major order.
/// Returns `false` once the last position has been passed.
pub fn increment_index(index: &mut [usize], shape: &[usize]) -> bool {
    for i in (0..index.len()).rev() {
        if index[i] + 1 < shape[i] {
            index[i] += 1;
            reset_trailing_indices(index, i);
            return true;
        }
    }
    false
}

fn reset_trailing_indices(index: &mut [usize], position: usize) {
    for idx in index.iter_mut().skip(position + 1) {
        *idx = 0;
    }
}

/// Flat offset of `index` into a row-major buffer of `shape`.
///
/// The index is aligned with the shape from the right, and dimensions of size
/// one always read position zero, which is what broadcasting needs.
///
/// ```
/// # use ne_light::tensor::*;
/// assert_eq!(global_index(&[1, 2], &[2, 3]), Ok(5));
/// assert_eq!(global_index(&[1, 2], &[1, 3]), Ok(2));
/// assert_eq!(global_index(&[4, 1, 2], &[2, 3]), Ok(5));
/// ```
pub fn global_index(index: &[usize], shape: &[usize]) -> Result<usize, String> {
    if index.len() < shape.len() {
        return Err(format!(
            "shapes do not match: shape={shape:?}, index={index:?}
            Need index to be at least as long as shape."
        ));
    }
    let mut global_idx = 0;
    let mut multiplier = 1;
    for (i, (&dim, &idx_dim)) in shape.iter().rev().zip(index.iter().rev()).enumerate() {
        if dim == 1 {
            // we pick the 0th element during broadcasting
            continue;
        }
        if dim <= idx_dim {
            return Err(format!(
                "index {index:?} is out of bounds for shape {shape:?} (the {}th position from the right)",
                i
            ));
        }
        global_idx += idx_dim * multiplier;
        multiplier *= dim;
    }
    Ok(global_idx)
}

/// The NumPy broadcast of two shapes, or `None` when they are incompatible.
pub fn broadcast_shape(left_shape: &[usize], right_shape: &[usize]) -> Option<Vec<usize>> {
    let mut shape = Vec::with_capacity(max(left_shape.len(), right_shape.len()));
    for pair in left_shape
        .iter()
        .rev()
        .zip_longest(right_shape.iter().rev())
        .rev()
    {
        let dim = match pair {
            Both(&l, &r) if l == r || r == 1 => l,
            Both(&l, &r) if l == 1 => r,
            Both(_, _) => return None,
            Left(&l) => l,
            Right(&r) => r,
        };
        shape.push(dim);
    }
    Some(shape)
}

#[test]
fn test_increment_index() {
    let mut index = vec![0, 0, 0];
    let dimensions = vec![2, 3, 2];
    let indices = vec![
        [0, 0, 1].to_vec(),
        [0, 1, 0].to_vec(),
        [0, 1, 1].to_vec(),
        [0, 2, 0].to_vec(),
        [0, 2, 1].to_vec(),
        [1, 0, 0].to_vec(),
        [1, 0, 1].to_vec(),
        [1, 1, 0].to_vec(),
        [1, 1, 1].to_vec(),
        [1, 2, 0].to_vec(),
        [1, 2, 1].to_vec(),
    ];
    for expected_idx in indices.into_iter() {
        let valid = increment_index(&mut index, &dimensions);
        assert!(valid);
        assert_eq!(index, expected_idx);
    }
    assert!(!increment_index(&mut index, &dimensions));
}

#[test]
fn test_index_iterator() {
    let index_iter = IndexIterator::new(vec![2, 2, 2]);
    assert_eq!(
        index_iter.collect::<Vec<_>>(),
        vec![
            [0, 0, 0].to_vec(),
            [0, 0, 1].to_vec(),
            [0, 1, 0].to_vec(),
            [0, 1, 1].to_vec(),
            [1, 0, 0].to_vec(),
            [1, 0, 1].to_vec(),
            [1, 1, 0].to_vec(),
            [1, 1, 1].to_vec(),
        ]
    );
}

#[test]
fn test_index_iterator_edge_shapes() {
    assert_eq!(IndexIterator::new(vec![]).count(), 1);
    assert_eq!(IndexIterator::new(vec![3, 0]).count(), 0);
    assert_eq!(IndexIterator::new(vec![1, 4]).count(), 4);
}

#[test]
fn test_broadcast_shape() {
    assert_eq!(broadcast_shape(&[4, 4], &[2, 4, 4]), Some(vec![2, 4, 4]));
    assert_eq!(broadcast_shape(&[8, 3], &[1, 3]), Some(vec![8, 3]));
    assert_eq!(broadcast_shape(&[], &[2, 3]), Some(vec![2, 3]));
    assert_eq!(broadcast_shape(&[2, 3], &[3, 2]), None);
}
