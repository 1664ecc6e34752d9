use std::{env, time::Instant};

use ndarray::Array1;
use rgf::{
    data::{csv::read_csv, synthetic::sparse_regression, DataSource, SparseColumns},
    forest::{ForestGrower, ForestParams, GrowthStatus},
    Result,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// `rgf [data.csv|-] [key=value,...] [model-out]`
///
/// The CSV's last column is the target. Without a file a synthetic sparse
/// regression problem is used. The first half of the rows trains, the second
/// half is evaluated at every test checkpoint.
fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run() {
        error!("{e}");
        std::process::exit(1);
    }
}

fn load(path: Option<&str>) -> Result<(SparseColumns, Array1<f64>)> {
    match path {
        Some(p) if p != "-" => {
            let columns = csv_width(p)?;
            read_csv(p, false, columns - 1)
        }
        _ => sparse_regression(2000, 20, 0.5, 0.5, 42),
    }
}

/// Column count of the first record.
fn csv_width(path: &str) -> Result<usize> {
    let mut rdr = csv::ReaderBuilder::new().has_headers(false).from_path(path)?;
    let width = rdr.records().next().transpose()?.map_or(0, |r| r.len());
    if width < 2 {
        return Err(rgf::RgfError::Data(format!("{path}: need at least two columns")));
    }
    Ok(width)
}

fn mse(pred: &Array1<f64>, y: &Array1<f64>) -> f64 {
    (pred - y).mapv(|d| d * d).mean().unwrap_or(f64::NAN)
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let (x, y) = load(args.get(1).map(String::as_str))?;
    let params: ForestParams = match args.get(2) {
        Some(s) => s.parse()?,
        None => "test_interval=100,max_leaves=500".parse()?,
    };

    let n = x.row_count();
    let train: Vec<usize> = (0..n / 2).collect();
    let test: Vec<usize> = (n / 2..n).collect();
    let (x_train, y_train) = (x.select_rows(&train), y.select(ndarray::Axis(0), &train));
    let (x_test, y_test) = (x.select_rows(&test), y.select(ndarray::Axis(0), &test));
    info!(train = train.len(), test = test.len(), %params, "fitting");

    let start = Instant::now();
    let mut grower = ForestGrower::cold_start(&x_train, y_train, params)?;
    loop {
        match grower.proceed()? {
            GrowthStatus::Continuing => {}
            GrowthStatus::TestNow => {
                let model = grower.snapshot();
                info!(
                    leaves = grower.split_count(),
                    test_mse = mse(&model.predict_source(&x_test), &y_test),
                    "checkpoint"
                );
            }
            GrowthStatus::Done => break,
        }
    }

    let model = grower.snapshot();
    let fit = grower.fit_result();
    let mean = y_test.mean().unwrap_or(0.0);
    info!(
        elapsed = ?start.elapsed(),
        trees = model.trees.len(),
        leaves = model.leaf_count(),
        train_loss = fit.err,
        base_mse = mse(&Array1::from_elem(y_test.len(), mean), &y_test),
        test_mse = mse(&model.predict_source(&x_test), &y_test),
        "finished"
    );

    if let Some(out) = args.get(3) {
        model.save(out)?;
        info!(path = %out, "model saved");
    }
    Ok(())
}
