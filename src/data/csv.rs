use std::path::Path;

use csv::ReaderBuilder;
use ndarray::Array1;

use super::SparseColumns;
use crate::{RgfError, Result};

/// Reads a numeric CSV file. `target_column` holds the response; every other
/// column becomes a feature, with zeros stored implicitly.
pub fn read_csv<P: AsRef<Path>>(
    path: P,
    has_headers: bool,
    target_column: usize,
) -> Result<(SparseColumns, Array1<f64>)> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(has_headers)
        .from_path(path)?;

    let mut triplets = Vec::new();
    let mut y_data = Vec::new();
    let mut n_features = None;

    for (row, result) in rdr.records().enumerate() {
        let record = result?;
        if target_column >= record.len() {
            return Err(RgfError::Data(format!(
                "row {row}: target column {target_column} missing ({} columns)",
                record.len()
            )));
        }
        let width = record.len() - 1;
        match n_features {
            None => n_features = Some(width),
            Some(n) if n != width => {
                return Err(RgfError::Data(format!(
                    "row {row}: expected {} columns, found {}",
                    n + 1,
                    record.len()
                )))
            }
            Some(_) => {}
        }

        let mut feature = 0;
        for (col, field) in record.iter().enumerate() {
            let value: f64 = field.trim().parse().map_err(|_| {
                RgfError::Data(format!("row {row}, column {col}: not a number: {field:?}"))
            })?;
            if col == target_column {
                y_data.push(value);
                continue;
            }
            if value != 0.0 {
                triplets.push((row, feature, value));
            }
            feature += 1;
        }
    }

    let x = SparseColumns::from_triplets(y_data.len(), n_features.unwrap_or(0), &triplets)?;
    Ok((x, Array1::from(y_data)))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::data::DataSource;

    #[test]
    fn test_read_csv_with_header() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "y,x1,x2").unwrap();
        writeln!(file, "1.5,0,2").unwrap();
        writeln!(file, "-1,3,0").unwrap();

        let (x, y) = read_csv(file.path(), true, 0).unwrap();
        assert_eq!(y.to_vec(), vec![1.5, -1.0]);
        assert_eq!(x.row_count(), 2);
        assert_eq!(x.column_count(), 2);
        assert_eq!(x.nnz(), 2);
    }

    #[test]
    fn test_read_csv_rejects_text() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "1,abc").unwrap();
        assert!(matches!(read_csv(file.path(), false, 0), Err(RgfError::Data(_))));
    }
}
