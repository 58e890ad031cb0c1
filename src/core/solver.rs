//! L2-regularized least squares for decoders.
//!
//! Solves `(AᵀA + m·σ²·I) D = AᵀY` where `A` holds neuron activities at the
//! evaluation points (rows) and `σ = reg · max(A)`.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::simulator::SimError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Solver {
    #[serde(default = "default_reg")]
    pub reg: f64,
}

fn default_reg() -> f64 {
    0.1
}

impl Default for Solver {
    fn default() -> Self {
        Self { reg: default_reg() }
    }
}

impl fmt::Display for Solver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LstsqL2(reg={})", self.reg)
    }
}

impl Solver {
    /// Decoders with shape `n_neurons × target_dims`.
    pub fn solve(&self, activities: &[Vec<f64>], targets: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, SimError> {
        let m = activities.len();
        let n = activities.first().map_or(0, Vec::len);
        let d = targets.first().map_or(0, Vec::len);
        if n == 0 || m == 0 {
            return Ok(vec![vec![0.0; d]; n]);
        }

        let a = to_matrix(activities, n);
        let y = to_matrix(targets, d);
        let amax = a.iter().fold(0.0f64, |acc, &x| acc.max(x));
        let sigma = if amax > 0.0 { self.reg * amax } else { self.reg };

        let mut gram = a.tr_mul(&a);
        for i in 0..n {
            gram[(i, i)] += m as f64 * sigma * sigma;
        }
        let rhs = a.tr_mul(&y);

        let chol = gram.cholesky().ok_or(SimError::Solver { n_neurons: n })?;
        Ok(from_matrix(&chol.solve(&rhs)))
    }
}

/// Row-major `Vec<Vec<f64>>` into a `rows × cols` matrix; short rows are zero padded.
pub fn to_matrix(rows: &[Vec<f64>], cols: usize) -> DMatrix<f64> {
    DMatrix::from_fn(rows.len(), cols, |i, j| rows[i].get(j).copied().unwrap_or(0.0))
}

pub fn from_matrix(m: &DMatrix<f64>) -> Vec<Vec<f64>> {
    m.row_iter().map(|row| row.iter().copied().collect()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoders_match_the_normal_equations() {
        let acts = vec![
            vec![1.0, 0.0, 0.5],
            vec![0.0, 2.0, 0.0],
            vec![0.3, 0.3, 1.0],
            vec![1.0, 1.0, 1.0],
        ];
        let ys = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.5, 0.5], vec![2.0, -1.0]];
        let solver = Solver { reg: 0.05 };
        let d = solver.solve(&acts, &ys).unwrap();
        assert_eq!(d.len(), 3);
        assert_eq!(d[0].len(), 2);

        let a = to_matrix(&acts, 3);
        let sigma = 0.05 * 2.0;
        let lhs = a.tr_mul(&a) + DMatrix::identity(3, 3) * (4.0 * sigma * sigma);
        let residual = lhs * to_matrix(&d, 2) - a.tr_mul(&to_matrix(&ys, 2));
        assert!(residual.iter().all(|r| r.abs() < 1e-9));
    }

    #[test]
    fn silent_neuron_without_regularization_fails_to_factor() {
        let acts = vec![vec![1.0, 0.0], vec![0.5, 0.0]];
        let ys = vec![vec![1.0], vec![0.0]];
        assert!(matches!(
            Solver { reg: 0.0 }.solve(&acts, &ys),
            Err(SimError::Solver { n_neurons: 2 })
        ));
    }

    #[test]
    fn small_regularization_recovers_linear_readout() {
        // Two "neurons" with activities x and 1 - x; target 2x.
        let xs: Vec<f64> = (0..50).map(|i| i as f64 / 49.0).collect();
        let acts: Vec<Vec<f64>> = xs.iter().map(|&x| vec![x, 1.0 - x]).collect();
        let ys: Vec<Vec<f64>> = xs.iter().map(|&x| vec![2.0 * x]).collect();
        let d = Solver { reg: 1e-6 }.solve(&acts, &ys).unwrap();
        assert!((d[0][0] - 2.0).abs() < 1e-3);
        assert!(d[1][0].abs() < 1e-3);
    }

    #[test]
    fn empty_population_has_empty_decoders() {
        let d = Solver::default().solve(&[], &[]).unwrap();
        assert!(d.is_empty());
    }
}
