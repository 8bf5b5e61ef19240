use std::ops::{Add, Div, Mul};

use rand_distr::num_traits::Zero;

use crate::quantities::Float;

/// Running arithmetic mean of a stream of samples.
#[derive(Clone, Debug)]
pub struct Mean<T> {
    sum: T,
    count: u64,
}

impl<T> Mean<T>
where
    T: Copy + Add<T, Output = T> + Zero + Div<Float, Output = T>,
{
    #[must_use]
    pub fn new() -> Mean<T> {
        Mean {
            sum: T::zero(),
            count: 0,
        }
    }

    pub fn record(&mut self, value: T) {
        self.sum = self.sum + value;
        self.count += 1;
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn value(&self) -> Option<T> {
        if self.count.is_zero() {
            None
        } else {
            Some(self.sum / self.count as Float)
        }
    }
}

impl<T> Default for Mean<T>
where
    T: Copy + Add<T, Output = T> + Zero + Div<Float, Output = T>,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Exponentially weighted moving average, seeded with an initial value so it
/// is always defined (no bootstrap `Option`).
#[derive(Debug, Clone, Copy)]
pub struct EWMA<T> {
    update_weight: Float,
    current: T,
}

impl<T> EWMA<T>
where
    T: Add<T, Output = T> + Copy,
    Float: Mul<T, Output = T>,
{
    pub const fn new(update_weight: Float, current: T) -> EWMA<T> {
        EWMA {
            update_weight,
            current,
        }
    }

    pub fn update(&mut self, value: T) {
        self.current = (1. - self.update_weight) * self.current + self.update_weight * value;
    }

    pub const fn value(&self) -> T {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::{Mean, EWMA};
    use crate::quantities::Float;
    use pretty_assertions::assert_eq;

    #[test]
    fn mean_of_no_samples_is_none() {
        let mean = Mean::<Float>::new();
        assert_eq!(mean.value(), None);
    }

    #[test]
    fn mean_tracks_average() {
        let mut mean = Mean::<Float>::new();
        mean.record(1.);
        mean.record(2.);
        mean.record(3.);
        assert_eq!(mean.value(), Some(2.));
    }

    #[test]
    fn ewma_converges_towards_constant_input() {
        let mut ewma = EWMA::new(0.1, 0.0);
        for _ in 0..500 {
            ewma.update(1.0);
        }
        assert!((ewma.value() - 1.0).abs() < 1e-6);
    }
}
