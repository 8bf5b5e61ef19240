use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::quantities::{Exemplar, Float};

/// A leaf's local model of `next_state = f(state ++ action)`. Pluggable so a
/// node can swap in a richer model without touching the tree; the tree only
/// ever calls `fit`/`predict`.
pub trait Regressor: Send {
    /// Re-fit on the full training buffer. A regressor that cannot fit the
    /// data (e.g. a rank-deficient design matrix) returns
    /// `EngineError::RegressionFailure` and keeps its previous parameters.
    fn fit(&mut self, data: &[Exemplar]) -> Result<(), EngineError>;

    /// Predict the label for a given input. Before the first successful fit,
    /// implementations fall back to the identity (state unchanged).
    fn predict(&self, input: &[Float]) -> Vec<Float>;

    fn box_clone(&self) -> Box<dyn Regressor>;

    /// Serializable snapshot of this regressor's fitted parameters, used to
    /// persist and reload a tree without retraining.
    fn snapshot(&self) -> RegressorSnapshot;
}

/// A `Box<dyn Regressor>` cannot derive `Serialize`/`Deserialize` directly;
/// this is the DTO every concrete regressor converts to and from. Only one
/// variant exists today (`LinearRegressor`), but the enum leaves room for
/// others without changing the snapshot file format.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum RegressorSnapshot {
    Linear {
        input_dim: usize,
        output_dim: usize,
        ridge: Float,
        coefficients: Option<Vec<Vec<Float>>>,
    },
}

impl RegressorSnapshot {
    #[must_use]
    pub fn restore(self) -> Box<dyn Regressor> {
        match self {
            RegressorSnapshot::Linear {
                input_dim,
                output_dim,
                ridge,
                coefficients,
            } => Box::new(LinearRegressor {
                input_dim,
                output_dim,
                ridge,
                coefficients,
            }),
        }
    }
}

/// Ordinary least squares, one independent fit per output dimension, solved
/// by Gaussian elimination on the (ridge-regularized) normal equations. Small
/// leaves retrain cheaply; the ridge term keeps the system solvable when the
/// buffer is short or degenerate.
#[derive(Clone)]
pub struct LinearRegressor {
    input_dim: usize,
    output_dim: usize,
    ridge: Float,
    /// `coefficients[o]` is the length `input_dim + 1` weight vector
    /// (including a bias term) for output dimension `o`. `None` until the
    /// first successful fit.
    coefficients: Option<Vec<Vec<Float>>>,
}

impl LinearRegressor {
    #[must_use]
    pub fn new(input_dim: usize, output_dim: usize) -> LinearRegressor {
        LinearRegressor {
            input_dim,
            output_dim,
            ridge: 1e-6,
            coefficients: None,
        }
    }

    fn design_row(input: &[Float]) -> Vec<Float> {
        let mut row = Vec::with_capacity(input.len() + 1);
        row.push(1.0);
        row.extend_from_slice(input);
        row
    }

    fn solve_normal_equations(
        rows: &[Vec<Float>],
        targets: &[Float],
        ridge: Float,
    ) -> Option<Vec<Float>> {
        let dim = rows[0].len();
        // a = X^T X + ridge*I, b = X^T y
        let mut a = vec![vec![0.0; dim]; dim];
        let mut b = vec![0.0; dim];
        for (row, &target) in rows.iter().zip(targets) {
            for i in 0..dim {
                b[i] += row[i] * target;
                for j in 0..dim {
                    a[i][j] += row[i] * row[j];
                }
            }
        }
        for i in 0..dim {
            a[i][i] += ridge;
        }
        gaussian_solve(&mut a, &mut b)
    }
}

fn gaussian_solve(a: &mut [Vec<Float>], b: &mut [Float]) -> Option<Vec<Float>> {
    let n = b.len();
    for col in 0..n {
        let pivot_row = (col..n).max_by(|&r1, &r2| a[r1][col].abs().total_cmp(&a[r2][col].abs()))?;
        if a[pivot_row][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot_row);
        b.swap(col, pivot_row);
        let pivot = a[col][col];
        for k in col..n {
            a[col][k] /= pivot;
        }
        b[col] /= pivot;
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = a[row][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    Some(b.to_vec())
}

impl Regressor for LinearRegressor {
    fn fit(&mut self, data: &[Exemplar]) -> Result<(), EngineError> {
        if data.is_empty() {
            return Err(EngineError::RegressionFailure {
                reason: "empty training buffer".to_string(),
            });
        }
        let rows: Vec<Vec<Float>> = data.iter().map(|e| Self::design_row(&e.input)).collect();
        let mut fitted = Vec::with_capacity(self.output_dim);
        for out in 0..self.output_dim {
            let targets: Vec<Float> = data.iter().map(|e| e.label[out]).collect();
            match Self::solve_normal_equations(&rows, &targets, self.ridge) {
                Some(coeffs) => fitted.push(coeffs),
                None => {
                    return Err(EngineError::RegressionFailure {
                        reason: "normal equations were singular".to_string(),
                    })
                }
            }
        }
        self.coefficients = Some(fitted);
        Ok(())
    }

    fn predict(&self, input: &[Float]) -> Vec<Float> {
        match &self.coefficients {
            None => input[..self.output_dim.min(input.len())].to_vec(),
            Some(coefficients) => {
                let row = Self::design_row(input);
                coefficients
                    .iter()
                    .map(|coeffs| coeffs.iter().zip(&row).map(|(c, x)| c * x).sum())
                    .collect()
            }
        }
    }

    fn box_clone(&self) -> Box<dyn Regressor> {
        Box::new(self.clone())
    }

    fn snapshot(&self) -> RegressorSnapshot {
        RegressorSnapshot::Linear {
            input_dim: self.input_dim,
            output_dim: self.output_dim,
            ridge: self.ridge,
            coefficients: self.coefficients.clone(),
        }
    }
}

impl Clone for Box<dyn Regressor> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

#[cfg(test)]
mod tests {
    use super::{LinearRegressor, Regressor};
    use crate::quantities::Exemplar;

    #[test]
    fn unfit_regressor_predicts_identity_truncated_to_output_dim() {
        let regressor = LinearRegressor::new(2, 1);
        assert_eq!(regressor.predict(&[5.0, 9.0]), vec![5.0]);
    }

    #[test]
    fn fits_exact_linear_relationship() {
        let mut regressor = LinearRegressor::new(1, 1);
        let data: Vec<Exemplar> = (0..10)
            .map(|i| Exemplar::new(&[], &[i as f64], &[3.0 * i as f64 - 1.0]))
            .collect();
        regressor.fit(&data).unwrap();
        let prediction = regressor.predict(&[20.0]);
        assert!((prediction[0] - 59.0).abs() < 1e-6);
    }

    #[test]
    fn empty_buffer_is_a_regression_failure() {
        let mut regressor = LinearRegressor::new(1, 1);
        assert!(regressor.fit(&[]).is_err());
    }

    #[test]
    fn snapshot_restore_round_trips_predictions() {
        let mut regressor = LinearRegressor::new(1, 1);
        let data: Vec<Exemplar> = (0..10)
            .map(|i| Exemplar::new(&[], &[i as f64], &[3.0 * i as f64 - 1.0]))
            .collect();
        regressor.fit(&data).unwrap();
        let restored = regressor.snapshot().restore();
        assert_eq!(restored.predict(&[20.0]), regressor.predict(&[20.0]));
    }
}
