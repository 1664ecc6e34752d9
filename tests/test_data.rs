use ndarray::{Array1, Array2};
use rgf::data::{
    synthetic::{sparse_classification, sparse_regression},
    DataSource, SparseColumns,
};

#[allow(dead_code)]
pub fn setup_regression() -> (SparseColumns, Array1<f64>) {
    sparse_regression(600, 10, 0.6, 0.5, 42).expect("Failed to generate data")
}

#[allow(dead_code)]
pub fn setup_classification() -> (SparseColumns, Array1<f64>) {
    sparse_classification(600, 10, 0.6, 7).expect("Failed to generate data")
}

/// First half for training, second half for testing.
#[allow(dead_code)]
pub fn split_halves(
    x: &SparseColumns,
    y: &Array1<f64>,
) -> ((SparseColumns, Array1<f64>), (SparseColumns, Array1<f64>)) {
    let n = x.row_count();
    let train: Vec<usize> = (0..n / 2).collect();
    let test: Vec<usize> = (n / 2..n).collect();
    (
        (x.select_rows(&train), y.select(ndarray::Axis(0), &train)),
        (x.select_rows(&test), y.select(ndarray::Axis(0), &test)),
    )
}

#[allow(dead_code)]
pub fn to_dense(x: &SparseColumns) -> Array2<f64> {
    let mut dense = Array2::zeros((x.row_count(), x.column_count()));
    for (i, row) in x.rows().iter().enumerate() {
        for &(f, v) in row {
            dense[[i, f]] = v;
        }
    }
    dense
}
