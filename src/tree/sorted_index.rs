use crate::{data::DataSource, RgfError, Result};

/// A non-zero feature value of one data point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SortedEntry {
    pub point: usize,
    pub value: f64,
}

/// Per-feature orderings of one node's points by feature value.
///
/// Only non-zero values are stored. A point of the node that does not appear
/// in a feature's list has the value `0.0` for that feature. Equal values keep
/// ascending point order, which makes every scan deterministic.
#[derive(Debug, Clone, PartialEq)]
pub struct SortedFeatureIndex {
    features: Vec<Vec<SortedEntry>>,
    population: usize,
}

impl SortedFeatureIndex {
    /// Builds the index for `points` (ascending, no duplicates).
    pub fn build<D: DataSource>(data: &D, points: &[usize]) -> Self {
        let mut member = vec![false; data.row_count()];
        for &p in points {
            member[p] = true;
        }

        let features = (0..data.column_count())
            .map(|feature| {
                let mut entries = Vec::new();
                data.for_each_nonzero(feature, |point, value| {
                    if member[point] && value != 0.0 {
                        entries.push(SortedEntry { point, value });
                    }
                });
                // stable: the source yields ascending points, so ties stay ordered
                entries.sort_by(|a, b| a.value.total_cmp(&b.value));
                entries
            })
            .collect();

        Self {
            features,
            population: points.len(),
        }
    }

    pub fn feature_count(&self) -> usize {
        self.features.len()
    }

    /// Number of points of the node, zero-valued ones included.
    pub fn population(&self) -> usize {
        self.population
    }

    pub fn feature(&self, feature: usize) -> Result<&[SortedEntry]> {
        self.features
            .get(feature)
            .map(Vec::as_slice)
            .ok_or(RgfError::FeatureOutOfRange {
                feature,
                count: self.features.len(),
            })
    }

    /// Splits every ordering into the points accepted by `goes_left` and the
    /// rest, keeping relative order. `left_population` is the number of the
    /// node's points (zero-valued ones included) that go left.
    pub fn filter<F>(&self, goes_left: F, left_population: usize) -> (Self, Self)
    where
        F: Fn(usize) -> bool,
    {
        let mut left = Vec::with_capacity(self.features.len());
        let mut right = Vec::with_capacity(self.features.len());
        for entries in &self.features {
            let (l, r): (Vec<SortedEntry>, Vec<SortedEntry>) =
                entries.iter().partition(|e| goes_left(e.point));
            left.push(l);
            right.push(r);
        }
        (
            Self {
                features: left,
                population: left_population,
            },
            Self {
                features: right,
                population: self.population - left_population,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SparseColumns;
    use ndarray::array;

    fn index() -> SortedFeatureIndex {
        let x = array![[3.0, 0.0], [1.0, 2.0], [3.0, -1.0], [0.0, 2.0], [-2.0, 0.0]];
        let data = SparseColumns::from_dense(x.view());
        SortedFeatureIndex::build(&data, &[0, 1, 2, 3, 4])
    }

    #[test]
    fn test_build_orders_by_value_then_point() {
        let idx = index();
        let points: Vec<usize> = idx.feature(0).unwrap().iter().map(|e| e.point).collect();
        assert_eq!(points, vec![4, 1, 0, 2]);
        let points: Vec<usize> = idx.feature(1).unwrap().iter().map(|e| e.point).collect();
        assert_eq!(points, vec![2, 1, 3]);
        assert_eq!(idx.population(), 5);
    }

    #[test]
    fn test_build_on_subset() {
        let x = array![[3.0], [1.0], [2.0]];
        let data = SparseColumns::from_dense(x.view());
        let idx = SortedFeatureIndex::build(&data, &[0, 2]);
        let points: Vec<usize> = idx.feature(0).unwrap().iter().map(|e| e.point).collect();
        assert_eq!(points, vec![2, 0]);
        assert_eq!(idx.population(), 2);
    }

    #[test]
    fn test_filter_preserves_order() {
        let idx = index();
        let (left, right) = idx.filter(|p| p % 2 == 0, 3);
        let l: Vec<usize> = left.feature(0).unwrap().iter().map(|e| e.point).collect();
        let r: Vec<usize> = right.feature(0).unwrap().iter().map(|e| e.point).collect();
        assert_eq!(l, vec![4, 0, 2]);
        assert_eq!(r, vec![1]);
        assert_eq!(left.population(), 3);
        assert_eq!(right.population(), 2);
    }

    #[test]
    fn test_feature_out_of_range() {
        let idx = index();
        assert!(matches!(
            idx.feature(2),
            Err(RgfError::FeatureOutOfRange { feature: 2, count: 2 })
        ));
    }
}
