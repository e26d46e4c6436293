use num::traits::real::Real;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use tracing::debug;

use crate::data::{Dataset, Example};
use crate::tensor::{Numeric, RcTensor};
use crate::{Error, Result};

/// A mini-batch in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// `[size, features]`
    pub inputs: Vec<f64>,
    /// `[size]`
    pub targets: Vec<f64>,
    pub features: usize,
}

impl Batch {
    fn from_examples(examples: Vec<Example>) -> Result<Batch> {
        let features = examples.first().map_or(0, |e| e.features.len());
        let mut inputs = Vec::with_capacity(examples.len() * features);
        let mut targets = Vec::with_capacity(examples.len());
        for example in examples {
            if example.features.len() != features {
                return Err(Error::RaggedBatch {
                    expected: features,
                    found: example.features.len(),
                });
            }
            inputs.extend(example.features);
            targets.push(example.target);
        }
        Ok(Batch {
            inputs,
            targets,
            features,
        })
    }

    pub fn size(&self) -> usize {
        self.targets.len()
    }

    /// `([size, features], [size, 1])` tensors with no history.
    pub fn to_tensors<T: Numeric + Real>(&self) -> Result<(RcTensor<T>, RcTensor<T>)> {
        let cast = |values: &[f64]| {
            values
                .iter()
                .map(|&v| {
                    num::cast::<f64, T>(v)
                        .ok_or_else(|| Error::Model(format!("{v} does not fit the tensor type")))
                })
                .collect::<Result<Vec<T>>>()
        };
        Ok((
            RcTensor::new(cast(&self.inputs)?, vec![self.size(), self.features]),
            RcTensor::new(cast(&self.targets)?, vec![self.size(), 1]),
        ))
    }
}

/// Shuffles and batches a `Dataset`; each call to `epoch` is one pass.
#[derive(Debug)]
pub struct DataLoader<'a, D: Dataset> {
    dataset: &'a D,
    batch_size: usize,
    shuffle: bool,
    drop_last: bool,
    rng: StdRng,
}

impl<'a, D> DataLoader<'a, D>
where
    D: Dataset<Item = Example>,
{
    pub fn new(dataset: &'a D, batch_size: usize) -> Self {
        assert!(batch_size > 0, "batch size must be positive");
        DataLoader {
            dataset,
            batch_size,
            shuffle: false,
            drop_last: false,
            rng: StdRng::seed_from_u64(0),
        }
    }

    /// Reshuffle the order at the start of every epoch, reproducibly.
    pub fn shuffled(mut self, seed: u64) -> Self {
        self.shuffle = true;
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Skip the final batch when it is smaller than `batch_size`.
    pub fn drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    pub fn num_batches(&self) -> usize {
        let len = self.dataset.len();
        if self.drop_last {
            len / self.batch_size
        } else {
            (len + self.batch_size - 1) / self.batch_size
        }
    }

    pub fn epoch(&mut self) -> Batches<'_, D> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if self.shuffle {
            order.shuffle(&mut self.rng);
        }
        if self.drop_last {
            order.truncate(self.num_batches() * self.batch_size);
        }
        Batches {
            dataset: self.dataset,
            order,
            batch_size: self.batch_size,
            position: 0,
        }
    }
}

/// The batches of one epoch. Items of a batch are loaded in parallel.
#[derive(Debug)]
pub struct Batches<'a, D: Dataset> {
    dataset: &'a D,
    order: Vec<usize>,
    batch_size: usize,
    position: usize,
}

impl<'a, D> Batches<'a, D>
where
    D: Dataset<Item = Example>,
{
    /// Dataset indices in the order this epoch visits them.
    pub fn order(&self) -> &[usize] {
        &self.order
    }
}

impl<'a, D> Iterator for Batches<'a, D>
where
    D: Dataset<Item = Example>,
{
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.order.len() {
            return None;
        }
        let end = (self.position + self.batch_size).min(self.order.len());
        let indices = &self.order[self.position..end];
        self.position = end;
        debug!(size = indices.len(), "loading batch");
        let examples = indices
            .par_iter()
            .map(|&index| self.dataset.get(index))
            .collect::<Result<Vec<_>>>();
        Some(examples.and_then(Batch::from_examples))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Item `i` has features `[i, i]` and target `i`.
    struct Counting(usize);

    impl Dataset for Counting {
        type Item = Example;

        fn len(&self) -> usize {
            self.0
        }

        fn get(&self, index: usize) -> Result<Example> {
            Ok(Example {
                features: vec![index as f64; 2],
                target: index as f64,
            })
        }
    }

    fn visited(loader: &mut DataLoader<'_, Counting>) -> Vec<usize> {
        loader
            .epoch()
            .flat_map(|batch| batch.unwrap().targets)
            .map(|t| t as usize)
            .collect()
    }

    #[test]
    fn test_every_index_once_per_epoch() {
        let dataset = Counting(10);
        let mut loader = DataLoader::new(&dataset, 3).shuffled(7);
        let sizes: Vec<usize> = loader.epoch().map(|b| b.unwrap().size()).collect();
        assert_eq!(sizes, vec![3, 3, 3, 1]);
        assert_eq!(loader.num_batches(), 4);

        for _ in 0..3 {
            let mut indices = visited(&mut loader);
            indices.sort_unstable();
            assert_eq!(indices, (0..10).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_drop_last() {
        let dataset = Counting(10);
        let mut loader = DataLoader::new(&dataset, 4).drop_last(true);
        let sizes: Vec<usize> = loader.epoch().map(|b| b.unwrap().size()).collect();
        assert_eq!(sizes, vec![4, 4]);
        assert_eq!(loader.num_batches(), 2);
    }

    #[test]
    fn test_unshuffled_order_is_sequential() {
        let dataset = Counting(5);
        let mut loader = DataLoader::new(&dataset, 2);
        assert_eq!(visited(&mut loader), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_shuffle_is_seeded() {
        let dataset = Counting(50);
        let first: Vec<usize> = DataLoader::new(&dataset, 8).shuffled(3).epoch().order().to_vec();
        let second: Vec<usize> = DataLoader::new(&dataset, 8).shuffled(3).epoch().order().to_vec();
        let other: Vec<usize> = DataLoader::new(&dataset, 8).shuffled(4).epoch().order().to_vec();
        assert_eq!(first, second);
        assert_ne!(first, other);

        let mut loader = DataLoader::new(&dataset, 8).shuffled(3);
        let epoch_one = loader.epoch().order().to_vec();
        let epoch_two = loader.epoch().order().to_vec();
        assert_ne!(epoch_one, epoch_two);
    }

    #[test]
    fn test_batch_to_tensors() {
        let dataset = Counting(3);
        let mut loader = DataLoader::new(&dataset, 3);
        let batch = loader.epoch().next().unwrap().unwrap();
        let (inputs, targets) = batch.to_tensors::<f32>().unwrap();
        assert_eq!(
            inputs,
            RcTensor::new(vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0], vec![3, 2])
        );
        assert_eq!(targets, RcTensor::new(vec![0.0, 1.0, 2.0], vec![3, 1]));
    }

    #[test]
    fn test_ragged_batch_is_rejected() {
        let examples = vec![
            Example {
                features: vec![0.0; 3],
                target: 0.0,
            },
            Example {
                features: vec![0.0; 2],
                target: 1.0,
            },
        ];
        assert!(matches!(
            Batch::from_examples(examples),
            Err(Error::RaggedBatch {
                expected: 3,
                found: 2
            })
        ));
    }

    #[test]
    fn test_empty_dataset_has_no_batches() {
        let dataset = Counting(0);
        let mut loader = DataLoader::new(&dataset, 4);
        assert!(loader.epoch().next().is_none());
    }
}
