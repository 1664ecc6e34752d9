pub mod data;
pub mod error;
pub mod forest;
pub mod loss;
pub mod model;
pub mod optimizer;
pub mod regularizer;
pub mod tree;

use ndarray::{Array1, ArrayView2};

pub use error::{Result, RgfError};

#[derive(Debug)]
pub struct FitResult {
    pub err: f64,
    pub residuals: Array1<f64>,
    pub y_hat: Array1<f64>,
}

pub trait FittedModel {
    fn predict(&self, x: ArrayView2<f64>) -> Array1<f64>;
}
