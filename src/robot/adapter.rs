use std::cell::RefCell;

use crate::quantities::Float;
use crate::robot::RobotAdapter;
use crate::transport::Snapshot;

/// A single continuous actuator/sensor pair: one state variable, one action
/// variable, action clamped to `[min, max]`. Candidates are `n` evenly
/// spaced points centred on the current action and clipped to range.
pub struct ScalarActuatorAdapter {
    pub sensor_var: String,
    pub actuator_var: String,
    pub device: String,
    pub min: Float,
    pub max: Float,
}

impl RobotAdapter for ScalarActuatorAdapter {
    fn state_dim(&self) -> usize {
        1
    }

    fn action_dim(&self) -> usize {
        1
    }

    fn read_state(&self, snapshot: &Snapshot) -> Vec<Float> {
        vec![snapshot.get(&self.sensor_var).unwrap_or(0.0)]
    }

    fn action_to_commands(&self, action: &[Float]) -> Vec<(String, Float)> {
        vec![(self.actuator_var.clone(), action[0].clamp(self.min, self.max))]
    }

    fn candidate_actions(&self, current: &[Float], n: usize) -> Vec<Vec<Float>> {
        let n = n.max(1);
        let span = self.max - self.min;
        let half_width = span / 2.0;
        (0..n)
            .map(|i| {
                let offset = half_width * (2.0 * i as Float / (n - 1).max(1) as Float - 1.0);
                vec![(current[0] + offset).clamp(self.min, self.max)]
            })
            .collect()
    }
}

/// A multi-axis discrete actuator (e.g. a tentacle with several independent
/// segments, each settable to one of `levels` positions). Candidates are the
/// base-`levels` enumeration of every combination of axis settings, except
/// that any axis currently marked busy (still completing a prior move) is
/// pinned to its current value so exploration never interrupts an
/// in-progress mechanical cycle. `busy` is refreshed by the engine from the
/// transport snapshot each tick, before `candidate_actions` is called.
pub struct DiscreteMultiAxisAdapter {
    pub axis_vars: Vec<String>,
    pub busy_vars: Vec<String>,
    pub device: String,
    pub levels: u32,
    busy: RefCell<Vec<bool>>,
}

impl DiscreteMultiAxisAdapter {
    #[must_use]
    pub fn new(axis_vars: Vec<String>, busy_vars: Vec<String>, device: String, levels: u32) -> Self {
        let width = axis_vars.len();
        DiscreteMultiAxisAdapter {
            axis_vars,
            busy_vars,
            device,
            levels,
            busy: RefCell::new(vec![false; width]),
        }
    }

    /// Called once per tick with the freshly read busy flags, one per axis.
    pub fn set_busy(&self, busy: &[bool]) {
        self.busy.borrow_mut().copy_from_slice(busy);
    }

    fn to_digits(mut value: u32, base: u32, width: usize) -> Vec<Float> {
        let mut digits = vec![0u32; width];
        for slot in digits.iter_mut().rev() {
            *slot = value % base;
            value /= base;
        }
        digits.into_iter().map(|d| d as Float).collect()
    }
}

impl RobotAdapter for DiscreteMultiAxisAdapter {
    fn state_dim(&self) -> usize {
        self.axis_vars.len()
    }

    fn action_dim(&self) -> usize {
        self.axis_vars.len()
    }

    fn read_state(&self, snapshot: &Snapshot) -> Vec<Float> {
        self.axis_vars
            .iter()
            .map(|v| snapshot.get(v).unwrap_or(0.0))
            .collect()
    }

    fn action_to_commands(&self, action: &[Float]) -> Vec<(String, Float)> {
        self.axis_vars
            .iter()
            .zip(action)
            .map(|(name, value)| (name.clone(), *value))
            .collect()
    }

    fn candidate_actions(&self, current: &[Float], _n: usize) -> Vec<Vec<Float>> {
        let width = self.axis_vars.len();
        let total = self.levels.pow(width as u32);
        let busy = self.busy.borrow();
        (0..total)
            .map(|combo| {
                let mut candidate = Self::to_digits(combo, self.levels, width);
                for axis in 0..width.min(current.len()) {
                    if busy.get(axis).copied().unwrap_or(false) {
                        candidate[axis] = current[axis];
                    }
                }
                candidate
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{DiscreteMultiAxisAdapter, ScalarActuatorAdapter};
    use crate::robot::RobotAdapter;

    #[test]
    fn scalar_candidates_are_clamped_to_range() {
        let adapter = ScalarActuatorAdapter {
            sensor_var: "s".into(),
            actuator_var: "m".into(),
            device: "dev".into(),
            min: 0.0,
            max: 255.0,
        };
        let candidates = adapter.candidate_actions(&[0.0], 5);
        assert_eq!(candidates.len(), 5);
        for c in &candidates {
            assert!(c[0] >= 0.0 && c[0] <= 255.0);
        }
    }

    #[test]
    fn scalar_candidates_span_centre() {
        let adapter = ScalarActuatorAdapter {
            sensor_var: "s".into(),
            actuator_var: "m".into(),
            device: "dev".into(),
            min: 0.0,
            max: 255.0,
        };
        let candidates = adapter.candidate_actions(&[128.0], 3);
        let first = candidates[0][0];
        let last = candidates[2][0];
        assert!(first < 128.0);
        assert!(last > 128.0 || last == 255.0);
    }

    #[test]
    fn discrete_enumerates_all_base_k_combinations() {
        let adapter = DiscreteMultiAxisAdapter::new(
            vec!["a".into(), "b".into()],
            vec![],
            "dev".into(),
            4,
        );
        let candidates = adapter.candidate_actions(&[0.0, 0.0], 100);
        assert_eq!(candidates.len(), 16);
    }
}
