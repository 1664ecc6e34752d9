use std::sync::Arc;

use ndarray::{array, Array1};

use super::*;
use crate::{
    data::SparseColumns,
    loss::{LossKind, SquaredLoss},
    regularizer::{DepthDiscount, RegularizerKind},
    tree::{SortedFeatureIndex, SplitCandidate},
};

macro_rules! assert_float_eq {
    ($x:expr, $y:expr, $d:expr) => {
        assert!(($x - $y).abs() < $d, "{} vs {}", $x, $y);
    };
}

fn targets() -> Array1<f64> {
    array![0.0, 0.2, 0.1, 2.0, 2.2, 1.9]
}

fn empty_forest(kind: RegularizerKind) -> Forest {
    let x = array![[1.0], [2.0], [3.0], [4.0], [5.0], [6.0]];
    let data = SparseColumns::from_dense(x.view());
    let points: Vec<usize> = (0..6).collect();
    let index = Arc::new(SortedFeatureIndex::build(&data, &points));
    Forest::new(index, 6, 0.0, kind, DepthDiscount::Uniform, None)
}

/// One stump splitting at 3.5 with both leaves still at zero.
fn stump_forest(kind: RegularizerKind) -> Forest {
    let mut forest = empty_forest(kind);
    let t = forest.promote_placeholder().unwrap();
    let ft = forest.tree_mut(t).unwrap();
    let candidate = SplitCandidate {
        feature: 0,
        threshold: 3.5,
        gain: 1.0,
        loss_reduction: 1.0,
        penalty_increase: 0.0,
        left_weight: 0.0,
        right_weight: 0.0,
        left_count: 3,
        right_count: 3,
    };
    ft.tree.apply_split(0, &candidate, 1).unwrap();
    ft.regularizer.commit(&ft.tree);
    forest
}

fn objective(optimizer: &WeightOptimizer, forest: &Forest, lambda: f64) -> f64 {
    optimizer.training_loss()
        + lambda * forest.trees().iter().map(|ft| ft.regularizer.penalty()).sum::<f64>()
}

#[test]
fn test_cold_start_bias() {
    let o = WeightOptimizer::cold_start(Box::new(SquaredLoss), targets(), None, true).unwrap();
    assert_float_eq!(o.bias(), 6.4 / 6.0, 1e-12);
    assert!(o.predictions().iter().all(|&p| p == o.bias()));

    let weights = array![1.0, 0.0, 0.0, 0.0, 0.0, 1.0];
    let o = WeightOptimizer::cold_start(Box::new(SquaredLoss), targets(), Some(weights), true)
        .unwrap();
    assert_float_eq!(o.bias(), 0.95, 1e-12);

    let o = WeightOptimizer::cold_start(Box::new(SquaredLoss), targets(), None, false).unwrap();
    assert_eq!(o.bias(), 0.0);
}

#[test]
fn test_cold_start_rejects_bad_weights() {
    for weights in [array![1.0, 1.0], Array1::zeros(6), array![1.0, -1.0, 1.0, 1.0, 1.0, 1.0]] {
        assert!(matches!(
            WeightOptimizer::cold_start(Box::new(SquaredLoss), targets(), Some(weights), false),
            Err(RgfError::Data(_))
        ));
    }
    assert!(matches!(
        WeightOptimizer::cold_start(Box::new(SquaredLoss), Array1::zeros(0), None, false),
        Err(RgfError::Data(_))
    ));
}

#[test]
fn test_zero_tree_forest_is_a_no_op() {
    let mut forest = empty_forest(RegularizerKind::TreeStructured);
    let mut o = WeightOptimizer::cold_start(Box::new(SquaredLoss), targets(), None, false).unwrap();
    let before = o.predictions().to_owned();
    let report = o.iterate(&mut forest, &SweepSettings::default()).unwrap();
    assert_eq!(report.sweeps, 0);
    assert_eq!(o.predictions(), before);
    assert_eq!(forest.bias(), 0.0);
}

#[test]
fn test_zero_sweeps_change_nothing() {
    let mut forest = stump_forest(RegularizerKind::TreeStructured);
    let mut o = WeightOptimizer::cold_start(Box::new(SquaredLoss), targets(), None, false).unwrap();
    o.synchronize(&forest);
    let settings = SweepSettings {
        max_sweeps: 0,
        ..SweepSettings::default()
    };
    let before = o.predictions().to_owned();
    let report = o.iterate(&mut forest, &settings).unwrap();
    assert_eq!(report.sweeps, 0);
    assert_eq!(o.predictions(), before);
    assert_eq!(o.weights(), &[0.0, 0.0]);
}

#[test]
fn test_unsynchronized_forest_is_a_consistency_error() {
    let mut forest = stump_forest(RegularizerKind::TreeStructured);
    let mut o = WeightOptimizer::cold_start(Box::new(SquaredLoss), targets(), None, false).unwrap();
    assert!(matches!(
        o.iterate(&mut forest, &SweepSettings::default()),
        Err(RgfError::Consistency(_))
    ));
}

#[test]
fn test_iterate_decreases_objective() {
    for kind in [RegularizerKind::TreeStructured, RegularizerKind::Plain] {
        let mut forest = stump_forest(kind);
        let mut o =
            WeightOptimizer::cold_start(Box::new(SquaredLoss), targets(), None, false).unwrap();
        o.synchronize(&forest);
        let settings = SweepSettings {
            max_sweeps: 50,
            lambda: 0.01,
            ..SweepSettings::default()
        };
        let before = objective(&o, &forest, settings.lambda);
        let report = o.iterate(&mut forest, &settings).unwrap();
        let after = objective(&o, &forest, settings.lambda);
        assert!(after < before, "{after} >= {before}");
        assert_float_eq!(report.loss, o.training_loss(), 1e-12);
        assert!(report.sweeps >= 1);

        // predictions follow the leaf weights
        let tree = &forest.trees()[0].tree;
        for leaf in tree.leaves() {
            let w = tree.node(leaf).unwrap().weight;
            for &p in tree.points(leaf) {
                assert_float_eq!(o.predictions()[p], w, 1e-12);
            }
        }
        // left leaf near 0.1, right near 2.0
        assert!(o.weights()[0] < o.weights()[1]);
    }
}

#[test]
fn test_step_cap_bounds_every_step() {
    let mut forest = stump_forest(RegularizerKind::TreeStructured);
    let mut o = WeightOptimizer::cold_start(Box::new(SquaredLoss), targets(), None, false).unwrap();
    o.synchronize(&forest);
    let settings = SweepSettings {
        max_sweeps: 1,
        step_size: 1.0,
        step_cap: Some(0.05),
        lambda: 0.0,
        ..SweepSettings::default()
    };
    let report = o.iterate(&mut forest, &settings).unwrap();
    assert!(report.max_step <= 0.05 + 1e-15);
    assert!(o.weights().iter().all(|w| w.abs() <= 0.05 + 1e-15));
}

#[test]
fn test_logistic_uses_default_step_cap() {
    let mut forest = stump_forest(RegularizerKind::Plain);
    let labels = array![-1.0, -1.0, -1.0, 1.0, 1.0, 1.0];
    let loss = LossKind::Logistic.function();
    let mut o = WeightOptimizer::cold_start(loss, labels, None, false).unwrap();
    o.synchronize(&forest);
    let settings = SweepSettings {
        max_sweeps: 1,
        step_size: 1.0,
        lambda: 0.0,
        ..SweepSettings::default()
    };
    o.iterate(&mut forest, &settings).unwrap();
    assert!(o.weights().iter().all(|w| w.abs() <= 1.0 + 1e-15));
    assert!(o.weights()[0] < 0.0 && o.weights()[1] > 0.0);
}

#[test]
fn test_intercept_step_moves_bias() {
    let mut forest = stump_forest(RegularizerKind::TreeStructured);
    let shifted = targets() + 5.0;
    let mut o = WeightOptimizer::cold_start(Box::new(SquaredLoss), shifted, None, false).unwrap();
    o.synchronize(&forest);
    let settings = SweepSettings {
        max_sweeps: 1,
        lambda: 1.0,
        optimize_intercept: true,
        ..SweepSettings::default()
    };
    o.iterate(&mut forest, &settings).unwrap();
    assert!(forest.bias() > 0.0);
}

#[test]
fn test_weights_drive_the_tree_leaves() {
    let mut forest = stump_forest(RegularizerKind::TreeStructured);
    let mut o = WeightOptimizer::cold_start(Box::new(SquaredLoss), targets(), None, false).unwrap();
    o.synchronize(&forest);
    o.iterate(&mut forest, &SweepSettings::default()).unwrap();

    let tree = &forest.trees()[0].tree;
    let leaf_weights: Vec<f64> = tree.leaves().map(|l| tree.node(l).unwrap().weight).collect();
    assert_eq!(o.weights(), leaf_weights.as_slice());
    assert!(o.weights().iter().all(|&w| w != 0.0));

    // a second pass continues from the recorded weights
    o.iterate(&mut forest, &SweepSettings::default()).unwrap();
}

#[test]
fn test_weight_changed_behind_the_optimizer_is_a_consistency_error() {
    let mut forest = stump_forest(RegularizerKind::Plain);
    let mut o = WeightOptimizer::cold_start(Box::new(SquaredLoss), targets(), None, false).unwrap();
    o.synchronize(&forest);
    let ft = forest.tree_mut(0).unwrap();
    let leaf = ft.tree.leaves().next().unwrap();
    ft.tree.set_leaf_weight(leaf, 0.5).unwrap();
    assert!(matches!(
        o.iterate(&mut forest, &SweepSettings::default()),
        Err(RgfError::Consistency(_))
    ));

    o.synchronize(&forest);
    assert!(o.iterate(&mut forest, &SweepSettings::default()).is_ok());
}
