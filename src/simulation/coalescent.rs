//! Hudson's coalescent with recombination and infinite-sites mutation.
//!
//! Time runs backwards in generations. Each lineage carries the stretches of
//! sequence that are ancestral to at least one sample, together with how many
//! samples each stretch is ancestral to. A stretch ancestral to every sample
//! has found its most recent common ancestor and is dropped.

use rand::Rng;
use rand_distr::{Distribution, Exp, Poisson};

/// An interval `[left, right)` of sequence ancestral to `count` samples.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Segment {
    left: f64,
    right: f64,
    count: usize,
}

impl Segment {
    fn len(&self) -> f64 {
        self.right - self.left
    }
}

/// Non-overlapping segments sorted by position.
#[derive(Debug, Clone, PartialEq)]
struct Lineage {
    segments: Vec<Segment>,
}

impl Lineage {
    /// Distance between the first and the last ancestral position, where a
    /// crossover changes what the two parental lineages carry.
    fn span(&self) -> f64 {
        match (self.segments.first(), self.segments.last()) {
            (Some(first), Some(last)) => last.right - first.left,
            _ => 0.0,
        }
    }

    fn material(&self) -> f64 {
        self.segments.iter().map(Segment::len).sum()
    }

    fn split_at(self, breakpoint: f64) -> (Lineage, Lineage) {
        let mut left = Vec::new();
        let mut right = Vec::new();
        for segment in self.segments {
            if segment.right <= breakpoint {
                left.push(segment);
            } else if segment.left >= breakpoint {
                right.push(segment);
            } else {
                left.push(Segment {
                    right: breakpoint,
                    ..segment
                });
                right.push(Segment {
                    left: breakpoint,
                    ..segment
                });
            }
        }
        (Lineage { segments: left }, Lineage { segments: right })
    }

    /// The common ancestor of two lineages, without material that has
    /// reached the MRCA of all `samples`. `None` when nothing is left.
    fn merge(&self, other: &Lineage, samples: usize) -> Option<Lineage> {
        let mut boundaries: Vec<f64> = self
            .segments
            .iter()
            .chain(other.segments.iter())
            .flat_map(|s| [s.left, s.right])
            .collect();
        boundaries.sort_by(f64::total_cmp);
        boundaries.dedup();

        let mut segments: Vec<Segment> = Vec::new();
        let (mut i, mut j) = (0, 0);
        for window in boundaries.windows(2) {
            let (left, right) = (window[0], window[1]);
            let count = count_over(&self.segments, &mut i, left, right)
                + count_over(&other.segments, &mut j, left, right);
            if count == 0 || count == samples {
                continue;
            }
            match segments.last_mut() {
                Some(last) if last.right == left && last.count == count => last.right = right,
                _ => segments.push(Segment { left, right, count }),
            }
        }
        (!segments.is_empty()).then_some(Lineage { segments })
    }
}

/// Sample count of the segment covering `[left, right)`, or 0 if none does.
/// `cursor` only moves forward, so a sweep over sorted intervals is linear.
fn count_over(segments: &[Segment], cursor: &mut usize, left: f64, right: f64) -> usize {
    while *cursor < segments.len() && segments[*cursor].right <= left {
        *cursor += 1;
    }
    match segments.get(*cursor) {
        Some(segment) if segment.left <= left && right <= segment.right => segment.count,
        _ => 0,
    }
}

/// Validated parameters of one coalescent simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct Coalescent {
    /// Sampled chromosome copies (individuals × ploidy)
    pub haplotypes: usize,
    pub ploidy: usize,
    pub sequence_length: f64,
    pub recombination_rate: f64,
    pub mutation_rate: f64,
    pub ne: f64,
}

impl Coalescent {
    /// Positions of the segregating sites of one replicate, sorted, in
    /// `[0, sequence_length)`.
    pub fn simulate<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vec<f64>, String> {
        if !(self.ne.is_finite() && self.ne > 0.0) {
            return Err(format!("population size must be positive, got {}", self.ne));
        }
        if !(self.sequence_length.is_finite() && self.sequence_length > 0.0) {
            return Err(format!(
                "sequence length must be positive, got {}",
                self.sequence_length
            ));
        }
        let gene_copies = self.ploidy as f64 * self.ne;

        let mut lineages: Vec<Lineage> = (0..self.haplotypes)
            .map(|_| Lineage {
                segments: vec![Segment {
                    left: 0.0,
                    right: self.sequence_length,
                    count: 1,
                }],
            })
            .collect();
        let mut positions = Vec::new();

        while lineages.len() > 1 {
            let k = lineages.len() as f64;
            let coalescence_rate = k * (k - 1.0) / 2.0 / gene_copies;
            let spans: Vec<f64> = lineages.iter().map(Lineage::span).collect();
            let recombination_rate = self.recombination_rate * spans.iter().sum::<f64>();
            let total_rate = coalescence_rate + recombination_rate;

            let waiting = Exp::new(total_rate)
                .map_err(|e| format!("bad event rate {total_rate}: {e}"))?
                .sample(rng);
            self.drop_mutations(&lineages, waiting, rng, &mut positions)?;

            if rng.gen::<f64>() * total_rate < coalescence_rate {
                let a = rng.gen_range(0..lineages.len());
                let mut b = rng.gen_range(0..lineages.len() - 1);
                if b >= a {
                    b += 1;
                }
                let (first, second) = (a.max(b), a.min(b));
                let x = lineages.swap_remove(first);
                let y = lineages.swap_remove(second);
                if let Some(parent) = x.merge(&y, self.haplotypes) {
                    lineages.push(parent);
                }
            } else {
                let mut target = rng.gen::<f64>() * spans.iter().sum::<f64>();
                let mut chosen = spans.len() - 1;
                for (i, span) in spans.iter().enumerate() {
                    if target < *span {
                        chosen = i;
                        break;
                    }
                    target -= span;
                }
                let lineage = lineages.swap_remove(chosen);
                let breakpoint = match (lineage.segments.first(), lineage.segments.last()) {
                    (Some(first), Some(last)) => rng.gen_range(first.left..last.right),
                    _ => continue,
                };
                let (left, right) = lineage.split_at(breakpoint);
                lineages.extend([left, right].into_iter().filter(|l| !l.segments.is_empty()));
            }
        }

        positions.sort_by(f64::total_cmp);
        Ok(positions)
    }

    /// Scatters Poisson(μ · material · dt) mutations over the ancestral
    /// material present during an interval of `dt` generations.
    fn drop_mutations<R: Rng + ?Sized>(
        &self,
        lineages: &[Lineage],
        dt: f64,
        rng: &mut R,
        positions: &mut Vec<f64>,
    ) -> Result<(), String> {
        if self.mutation_rate == 0.0 {
            return Ok(());
        }
        let material: f64 = lineages.iter().map(Lineage::material).sum();
        let mean = self.mutation_rate * material * dt;
        if mean <= 0.0 {
            return Ok(());
        }
        let mutations = Poisson::new(mean)
            .map_err(|e| format!("bad mutation mean {mean}: {e}"))?
            .sample(rng) as usize;
        for _ in 0..mutations {
            let mut offset = rng.gen::<f64>() * material;
            let segment = lineages
                .iter()
                .flat_map(|l| l.segments.iter())
                .find(|s| {
                    if offset < s.len() {
                        true
                    } else {
                        offset -= s.len();
                        false
                    }
                });
            if let Some(segment) = segment {
                let position = segment.left + offset;
                positions.push(if position < segment.right {
                    position
                } else {
                    segment.left
                });
            }
        }
        Ok(())
    }
}
