use crate::quantities::{Exemplar, Float};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// A leaf's partitioning predicate, once it has split. Axis-aligned: values
/// at or above the threshold on the given input axis go right.
#[derive(Clone, Debug)]
pub struct AxisThresholdSplitter {
    axis: usize,
    threshold: Float,
}

impl AxisThresholdSplitter {
    #[must_use]
    pub fn new(axis: usize, threshold: Float) -> AxisThresholdSplitter {
        AxisThresholdSplitter { axis, threshold }
    }

    #[must_use]
    pub fn classify(&self, input: &[Float]) -> Side {
        if input[self.axis] >= self.threshold {
            Side::Right
        } else {
            Side::Left
        }
    }

    #[must_use]
    pub fn axis(&self) -> usize {
        self.axis
    }

    #[must_use]
    pub fn threshold(&self) -> Float {
        self.threshold
    }
}

fn variance(values: &[Float]) -> Float {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<Float>() / values.len() as Float;
    values.iter().map(|v| (v - mean) * (v - mean)).sum::<Float>() / values.len() as Float
}

/// Total (summed across output dimensions) label variance of a set of
/// exemplars, used as the impurity measure a candidate split reduces.
fn total_label_variance(exemplars: &[&Exemplar]) -> Float {
    if exemplars.is_empty() {
        return 0.0;
    }
    let dims = exemplars[0].label.len();
    (0..dims)
        .map(|d| {
            let column: Vec<Float> = exemplars.iter().map(|e| e.label[d]).collect();
            variance(&column)
        })
        .sum()
}

/// Search every input axis for the threshold that best reduces weighted
/// label variance across the two children, equivalent to a single step of
/// CART regression-tree splitting. Returns `None` if no candidate axis
/// produces a non-empty split on both sides.
#[must_use]
pub fn fit_split(buffer: &[Exemplar]) -> Option<(AxisThresholdSplitter, Float)> {
    if buffer.len() < 2 {
        return None;
    }
    let dims = buffer[0].input.len();
    let parent_variance = total_label_variance(&buffer.iter().collect::<Vec<_>>());
    if parent_variance <= 0.0 {
        return None;
    }

    let mut best: Option<(AxisThresholdSplitter, Float)> = None;
    for axis in 0..dims {
        let mut values: Vec<Float> = buffer.iter().map(|e| e.input[axis]).collect();
        values.sort_by(Float::total_cmp);
        values.dedup_by(|a, b| (*a - *b).abs() < Float::EPSILON);
        for window in values.windows(2) {
            let threshold = (window[0] + window[1]) / 2.0;
            let splitter = AxisThresholdSplitter { axis, threshold };
            let (left, right): (Vec<&Exemplar>, Vec<&Exemplar>) = buffer
                .iter()
                .partition(|e| splitter.classify(&e.input) == Side::Left);
            if left.is_empty() || right.is_empty() {
                continue;
            }
            let weighted = (left.len() as Float * total_label_variance(&left)
                + right.len() as Float * total_label_variance(&right))
                / buffer.len() as Float;
            let quality = (parent_variance - weighted) / parent_variance;
            let improves = match &best {
                Some((_, best_quality)) => quality > *best_quality,
                None => true,
            };
            if improves {
                best = Some((splitter, quality));
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::{fit_split, Side};
    use crate::quantities::Exemplar;

    #[test]
    fn finds_bimodal_threshold() {
        let mut buffer = Vec::new();
        for m in 0..256 {
            let s1 = if m < 128 { 1.0 } else { 100.0 };
            buffer.push(Exemplar::new(&[], &[m as f64], &[s1]));
        }
        let (splitter, quality) = fit_split(&buffer).unwrap();
        assert_eq!(splitter.axis(), 0);
        assert!((120.0..136.0).contains(&splitter.threshold()));
        assert!(quality > 0.9);
    }

    #[test]
    fn pure_noise_yields_no_useful_split() {
        use crate::rand::{ContinuousDistribution, Rng};
        let mut rng = Rng::from_seed(7);
        let dist = ContinuousDistribution::Uniform {
            min: 0.0,
            max: 1.0,
        };
        let buffer: Vec<Exemplar> = (0..200)
            .map(|m| Exemplar::new(&[], &[m as f64], &[rng.sample(&dist)]))
            .collect();
        if let Some((_, quality)) = fit_split(&buffer) {
            assert!(quality < 0.3);
        }
    }

    #[test]
    fn classify_routes_by_threshold() {
        let splitter = super::AxisThresholdSplitter {
            axis: 0,
            threshold: 10.0,
        };
        assert_eq!(splitter.classify(&[9.9]), Side::Left);
        assert_eq!(splitter.classify(&[10.0]), Side::Right);
    }
}
