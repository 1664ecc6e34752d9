//! Seeded synthetic datasets for demos, benches and tests.

use ndarray::Array1;
use rand::{rngs::StdRng, Rng, SeedableRng};

use super::SparseColumns;
use crate::Result;

/// Sparse regression data: each feature is non-zero with probability
/// `density`, drawn uniformly from `[0, 1)`. The response depends on the
/// first three features through a piecewise-constant function plus noise.
pub fn sparse_regression(
    n_rows: usize,
    n_cols: usize,
    density: f64,
    noise: f64,
    seed: u64,
) -> Result<(SparseColumns, Array1<f64>)> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut triplets = Vec::new();
    let mut y = Array1::zeros(n_rows);

    for row in 0..n_rows {
        let mut head = [0.0; 3];
        for col in 0..n_cols {
            if rng.gen::<f64>() < density {
                let value: f64 = rng.gen();
                if value != 0.0 {
                    triplets.push((row, col, value));
                    if col < head.len() {
                        head[col] = value;
                    }
                }
            }
        }
        let signal = if head[0] > 0.5 { 2.0 } else { -1.0 }
            + if head[1] > 0.3 { 1.5 } else { 0.0 }
            + 3.0 * head[2];
        y[row] = signal + noise * (rng.gen::<f64>() - 0.5);
    }

    let x = SparseColumns::from_triplets(n_rows, n_cols, &triplets)?;
    Ok((x, y))
}

/// Binary labels in `{-1, 1}` from thresholding [`sparse_regression`].
pub fn sparse_classification(
    n_rows: usize,
    n_cols: usize,
    density: f64,
    seed: u64,
) -> Result<(SparseColumns, Array1<f64>)> {
    let (x, y) = sparse_regression(n_rows, n_cols, density, 0.5, seed)?;
    let labels = y.mapv(|v| if v > 1.0 { 1.0 } else { -1.0 });
    Ok((x, labels))
}
