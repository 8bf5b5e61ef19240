//! Scalar quantities shared across the expert tree, the engine loop and the
//! robot adapter. Kept deliberately thin: state and action vectors are plain
//! `Vec<Float>`, not newtyped per-axis units, since the axes are dynamically
//! sized and node-specific (unlike a fixed network `rtt`/`throughput` pair).

use serde::{Deserialize, Serialize};

pub type Float = f64;

/// A single exemplar routed through the expert tree: the concatenation of the
/// observed state and the action taken, plus the state observed afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Exemplar {
    pub input: Vec<Float>,
    pub label: Vec<Float>,
}

impl Exemplar {
    #[must_use]
    pub fn new(state: &[Float], action: &[Float], next_state: &[Float]) -> Exemplar {
        let mut input = Vec::with_capacity(state.len() + action.len());
        input.extend_from_slice(state);
        input.extend_from_slice(action);
        Exemplar {
            input,
            label: next_state.to_vec(),
        }
    }
}

/// Root-mean-square of the componentwise difference between two vectors of
/// equal length.
#[must_use]
pub fn rms_error(observed: &[Float], predicted: &[Float]) -> Float {
    assert_eq!(
        observed.len(),
        predicted.len(),
        "rms_error requires vectors of equal dimensionality"
    );
    if observed.is_empty() {
        return 0.0;
    }
    let sum_sq: Float = observed
        .iter()
        .zip(predicted)
        .map(|(a, b)| (a - b) * (a - b))
        .sum();
    (sum_sq / observed.len() as Float).sqrt()
}

#[cfg(test)]
mod tests {
    use super::rms_error;

    #[test]
    fn rms_error_of_identical_vectors_is_zero() {
        assert_eq!(rms_error(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn rms_error_matches_hand_computation() {
        let e = rms_error(&[0.0, 0.0], &[3.0, 4.0]);
        assert!((e - 3.535_533_905_932_738).abs() < 1e-9);
    }
}
