use ndarray::ArrayView2;

use crate::{RgfError, Result};

pub mod csv;
pub mod synthetic;

/// Column-oriented, read-only access to a (possibly sparse) feature matrix.
pub trait DataSource {
    fn row_count(&self) -> usize;
    fn column_count(&self) -> usize;

    /// Calls `f(point, value)` for every non-zero entry of `feature`, in
    /// ascending point order.
    fn for_each_nonzero<F: FnMut(usize, f64)>(&self, feature: usize, f: F);

    /// Row-major copy of the non-zero entries, used for routing points
    /// through saved trees.
    fn rows(&self) -> Vec<Vec<(usize, f64)>> {
        let mut rows = vec![Vec::new(); self.row_count()];
        for feature in 0..self.column_count() {
            self.for_each_nonzero(feature, |point, value| rows[point].push((feature, value)));
        }
        rows
    }
}

/// Compressed sparse column matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseColumns {
    n_rows: usize,
    col_ptr: Vec<usize>,
    row_idx: Vec<usize>,
    values: Vec<f64>,
}

impl SparseColumns {
    pub fn from_dense(x: ArrayView2<f64>) -> Self {
        let (n_rows, n_cols) = x.dim();
        let mut col_ptr = Vec::with_capacity(n_cols + 1);
        let mut row_idx = Vec::new();
        let mut values = Vec::new();
        col_ptr.push(0);
        for column in x.columns() {
            for (row, &value) in column.iter().enumerate() {
                if value != 0.0 {
                    row_idx.push(row);
                    values.push(value);
                }
            }
            col_ptr.push(row_idx.len());
        }
        Self {
            n_rows,
            col_ptr,
            row_idx,
            values,
        }
    }

    /// Builds the matrix from `(row, column, value)` triplets. Explicit zeros
    /// are dropped; duplicate coordinates are an error.
    pub fn from_triplets(
        n_rows: usize,
        n_cols: usize,
        triplets: &[(usize, usize, f64)],
    ) -> Result<Self> {
        let mut sorted: Vec<(usize, usize, f64)> = triplets
            .iter()
            .copied()
            .filter(|&(_, _, value)| value != 0.0)
            .collect();
        sorted.sort_by_key(|&(row, col, _)| (col, row));

        let mut col_ptr = vec![0; n_cols + 1];
        let mut row_idx = Vec::with_capacity(sorted.len());
        let mut values = Vec::with_capacity(sorted.len());
        let mut last: Option<(usize, usize)> = None;
        for &(row, col, value) in &sorted {
            if row >= n_rows || col >= n_cols {
                return Err(RgfError::Data(format!(
                    "entry ({row}, {col}) outside a {n_rows}x{n_cols} matrix"
                )));
            }
            if last == Some((row, col)) {
                return Err(RgfError::Data(format!("duplicate entry ({row}, {col})")));
            }
            last = Some((row, col));
            col_ptr[col + 1] += 1;
            row_idx.push(row);
            values.push(value);
        }
        for col in 0..n_cols {
            col_ptr[col + 1] += col_ptr[col];
        }
        Ok(Self {
            n_rows,
            col_ptr,
            row_idx,
            values,
        })
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Keeps only the given rows, renumbered in the order given.
    pub fn select_rows(&self, rows: &[usize]) -> Self {
        let mut new_index = vec![None; self.n_rows];
        for (new, &old) in rows.iter().enumerate() {
            new_index[old] = Some(new);
        }
        let mut col_ptr = Vec::with_capacity(self.col_ptr.len());
        let mut row_idx = Vec::new();
        let mut values = Vec::new();
        col_ptr.push(0);
        for col in 0..self.column_count() {
            let mut column: Vec<(usize, f64)> = (self.col_ptr[col]..self.col_ptr[col + 1])
                .filter_map(|k| new_index[self.row_idx[k]].map(|row| (row, self.values[k])))
                .collect();
            column.sort_by_key(|&(row, _)| row);
            for (row, value) in column {
                row_idx.push(row);
                values.push(value);
            }
            col_ptr.push(row_idx.len());
        }
        Self {
            n_rows: rows.len(),
            col_ptr,
            row_idx,
            values,
        }
    }
}

impl DataSource for SparseColumns {
    fn row_count(&self) -> usize {
        self.n_rows
    }

    fn column_count(&self) -> usize {
        self.col_ptr.len() - 1
    }

    fn for_each_nonzero<F: FnMut(usize, f64)>(&self, feature: usize, mut f: F) {
        let range = self.col_ptr[feature]..self.col_ptr[feature + 1];
        for k in range {
            f(self.row_idx[k], self.values[k]);
        }
    }
}
