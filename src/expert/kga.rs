use std::collections::VecDeque;

use crate::quantities::Float;

/// Knowledge-gain assessor: a rolling window of prediction errors used to
/// turn "how wrong was the last prediction" into "is the model still
/// improving here". The reward is the drop in mean error relative to a
/// lagged baseline, i.e. learning progress rather than raw accuracy.
#[derive(Clone, Debug)]
pub struct Kga {
    errors: VecDeque<Float>,
    delta: usize,
    tau: usize,
}

impl Kga {
    #[must_use]
    pub fn new(delta: usize, tau: usize) -> Kga {
        Kga {
            errors: VecDeque::new(),
            delta,
            tau,
        }
    }

    pub fn append_error(&mut self, error: Float) {
        self.errors.push_back(error);
    }

    /// Rebuilds a `Kga` from a previously persisted error window, e.g. when
    /// reloading a tree snapshot.
    #[must_use]
    pub fn restore(errors: VecDeque<Float>, delta: usize, tau: usize) -> Kga {
        Kga { errors, delta, tau }
    }

    #[must_use]
    pub fn errors(&self) -> &VecDeque<Float> {
        &self.errors
    }

    /// Mean of the most recent `delta` errors; `+inf` if no errors recorded.
    #[must_use]
    pub fn mean_error(&self) -> Float {
        if self.errors.is_empty() {
            return Float::INFINITY;
        }
        let n = self.delta.min(self.errors.len());
        let recent = self.errors.iter().rev().take(n);
        let sum: Float = recent.sum();
        sum / n as Float
    }

    /// Mean of the window lagged by `tau` samples behind the current one.
    #[must_use]
    fn meta_mean(&self) -> Float {
        let len = self.errors.len();
        if len == 0 {
            return Float::INFINITY;
        }
        if len <= self.tau {
            return self.errors[0];
        }
        let end = len - self.tau;
        let start = end.saturating_sub(self.delta);
        let window = &self.errors.make_contiguous()[start..end];
        if window.is_empty() {
            return self.errors[0];
        }
        window.iter().sum::<Float>() / window.len() as Float
    }

    /// Learning-progress reward: how much the recent mean error has dropped
    /// relative to the lagged baseline. Zero (not NaN) when both means are
    /// undefined or equal.
    pub fn reward(&mut self) -> Float {
        let reward = self.meta_mean() - self.mean_error();
        let cap = self.delta + self.tau;
        while self.errors.len() > cap {
            self.errors.pop_front();
        }
        if reward.is_nan() {
            0.0
        } else {
            reward
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Kga;

    #[test]
    fn reward_is_zero_on_constant_error() {
        let mut kga = Kga::new(5, 5);
        for _ in 0..30 {
            kga.append_error(0.5);
        }
        assert_eq!(kga.reward(), 0.0);
    }

    #[test]
    fn reward_is_positive_when_error_improves() {
        let mut kga = Kga::new(5, 5);
        for _ in 0..10 {
            kga.append_error(1.0);
        }
        for _ in 0..10 {
            kga.append_error(0.1);
        }
        assert!(kga.reward() > 0.0);
    }

    #[test]
    fn window_is_trimmed_to_delta_plus_tau() {
        let mut kga = Kga::new(3, 2);
        for i in 0..50 {
            kga.append_error(i as f64);
            kga.reward();
        }
        assert!(kga.errors.len() <= 5);
    }

    #[test]
    fn mean_error_is_infinite_when_empty() {
        let kga = Kga::new(5, 5);
        assert!(kga.mean_error().is_infinite());
    }
}
