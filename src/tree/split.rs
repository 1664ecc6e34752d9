use itertools::Itertools;
use ndarray::{Array1, ArrayView1};

use super::{NodeId, SortedEntry, TrainableTree};
use crate::{
    loss::LossFunction,
    regularizer::{PenaltyDerivatives, Regularizer, SplitPenalty},
    Result,
};

/// Per-point loss derivatives at the current predictions, scaled by the
/// point weight over the total weight.
#[derive(Debug, Clone)]
pub struct Gradients {
    pub gradient: Array1<f64>,
    pub hessian: Array1<f64>,
}

impl Gradients {
    pub fn compute(
        loss: &dyn LossFunction,
        predictions: ArrayView1<f64>,
        targets: ArrayView1<f64>,
        point_weights: Option<ArrayView1<f64>>,
    ) -> Self {
        let n = predictions.len();
        let total = point_weights.map_or(n as f64, |w| w.sum());
        let mut gradient = Array1::zeros(n);
        let mut hessian = Array1::zeros(n);
        for i in 0..n {
            let dw = point_weights.map_or(1.0, |w| w[i]) / total;
            let e = loss.eval(predictions[i], targets[i]);
            gradient[i] = dw * e.gradient;
            hessian[i] = dw * e.hessian;
        }
        Self { gradient, hessian }
    }

    fn sum_over(&self, points: &[usize]) -> GradStats {
        points.iter().fold(GradStats::default(), |acc, &p| GradStats {
            count: acc.count + 1,
            gradient: acc.gradient + self.gradient[p],
            hessian: acc.hessian + self.hessian[p],
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct GradStats {
    count: usize,
    gradient: f64,
    hessian: f64,
}

impl GradStats {
    fn add(&mut self, gradient: f64, hessian: f64) {
        self.count += 1;
        self.gradient += gradient;
        self.hessian += hessian;
    }

    fn merge(&mut self, other: GradStats) {
        self.count += other.count;
        self.gradient += other.gradient;
        self.hessian += other.hessian;
    }

    fn minus(self, other: GradStats) -> GradStats {
        GradStats {
            count: self.count - other.count,
            gradient: self.gradient - other.gradient,
            hessian: self.hessian - other.hessian,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitConstraints {
    pub min_leaf_size: usize,
    pub max_depth: Option<usize>,
    pub max_leaves: Option<usize>,
}

impl Default for SplitConstraints {
    fn default() -> Self {
        Self {
            min_leaf_size: 10,
            max_depth: None,
            max_leaves: None,
        }
    }
}

/// Best split found for one leaf. Weights are absolute leaf weights.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitCandidate {
    pub feature: usize,
    pub threshold: f64,
    pub gain: f64,
    pub loss_reduction: f64,
    pub penalty_increase: f64,
    pub left_weight: f64,
    pub right_weight: f64,
    pub left_count: usize,
    pub right_count: usize,
}

/// Everything about the node that does not depend on the threshold.
struct NodeContext {
    weight: f64,
    total: GradStats,
    penalty: SplitPenalty,
    lambda: f64,
    /// objective change of the best unsplit update of the leaf, split into
    /// its loss and penalty parts
    base_loss: f64,
    base_penalty: f64,
}

impl NodeContext {
    fn new(weight: f64, total: GradStats, penalty: SplitPenalty, base: PenaltyDerivatives, lambda: f64) -> Self {
        let denom = total.hessian + lambda * base.hessian;
        let step = if denom > 0.0 {
            -(total.gradient + lambda * base.gradient) / denom
        } else {
            0.0
        };
        Self {
            weight,
            total,
            penalty,
            lambda,
            base_loss: total.gradient * step + 0.5 * total.hessian * step * step,
            base_penalty: lambda * (base.gradient * step + 0.5 * base.hessian * step * step),
        }
    }

    /// Joint Newton step for the two new leaves and the resulting gain, or
    /// `None` when the local quadratic is not positive definite.
    fn evaluate(&self, left: GradStats) -> Option<(f64, f64, f64, f64, f64)> {
        let right = self.total.minus(left);
        let lambda = self.lambda;
        let p = &self.penalty;

        let a11 = left.hessian + lambda * p.left_hessian;
        let a22 = right.hessian + lambda * p.right_hessian;
        let a12 = lambda * p.cross_hessian;
        let det = a11 * a22 - a12 * a12;
        if a11 <= 0.0 || a22 <= 0.0 || det <= 0.0 {
            return None;
        }
        let b1 = left.gradient + lambda * p.left_gradient;
        let b2 = right.gradient + lambda * p.right_gradient;
        let d1 = -(a22 * b1 - a12 * b2) / det;
        let d2 = -(a11 * b2 - a12 * b1) / det;

        let split_loss = left.gradient * d1
            + 0.5 * left.hessian * d1 * d1
            + right.gradient * d2
            + 0.5 * right.hessian * d2 * d2;
        let split_penalty = lambda * p.delta(d1, d2);

        let loss_reduction = self.base_loss - split_loss;
        let penalty_increase = split_penalty - self.base_penalty;
        let gain = loss_reduction - penalty_increase;
        gain.is_finite()
            .then_some((gain, loss_reduction, penalty_increase, d1, d2))
    }
}

/// Midpoint between two consecutive distinct values that still separates
/// them under `value <= threshold`.
fn threshold_between(lower: f64, upper: f64) -> f64 {
    let mid = lower + (upper - lower) * 0.5;
    if mid < upper {
        mid
    } else {
        lower
    }
}

impl TrainableTree {
    /// Best split of `leaf` over all features, or `None` when the node is
    /// excluded by `constraints` or no threshold has positive gain.
    ///
    /// `regularizer` must have been reset on this tree's current topology.
    pub fn find_best_split(
        &self,
        leaf: NodeId,
        constraints: &SplitConstraints,
        gradients: &Gradients,
        regularizer: &dyn Regularizer,
        lambda: f64,
    ) -> Result<Option<SplitCandidate>> {
        let node = self.node(leaf)?;
        if !node.is_leaf() {
            return Ok(None);
        }
        if constraints.max_depth.is_some_and(|d| node.depth >= d) {
            return Ok(None);
        }
        if constraints.max_leaves.is_some_and(|m| self.leaf_count() >= m) {
            return Ok(None);
        }
        let min_leaf = constraints.min_leaf_size.max(1);
        if node.population() < 2 * min_leaf {
            return Ok(None);
        }

        let index = self.sorted_index(leaf)?;
        let points = self.points(leaf);
        let total = gradients.sum_over(points);
        let context = NodeContext::new(
            node.weight,
            total,
            regularizer.split_penalty(self, leaf)?,
            regularizer.leaf_derivatives(self, leaf)?,
            lambda,
        );

        let mut best: Option<SplitCandidate> = None;
        for feature in 0..index.feature_count() {
            let entries = index.feature(feature)?;
            scan_feature(feature, entries, &context, gradients, min_leaf, &mut best);
        }
        Ok(best)
    }
}

/// Walks one feature's values in ascending order, the implicit zero block
/// included, and records the best positive-gain threshold into `best`.
fn scan_feature(
    feature: usize,
    entries: &[SortedEntry],
    context: &NodeContext,
    gradients: &Gradients,
    min_leaf: usize,
    best: &mut Option<SplitCandidate>,
) {
    let mut nonzero = GradStats::default();
    for e in entries {
        nonzero.add(gradients.gradient[e.point], gradients.hessian[e.point]);
    }
    let zero = context.total.minus(nonzero);
    let negatives = entries.partition_point(|e| e.value < 0.0);

    let value_groups = |slice: &[SortedEntry]| -> Vec<(f64, GradStats)> {
        slice
            .iter()
            .chunk_by(|e| e.value)
            .into_iter()
            .map(|(value, group)| {
                let mut stats = GradStats::default();
                for e in group {
                    stats.add(gradients.gradient[e.point], gradients.hessian[e.point]);
                }
                (value, stats)
            })
            .collect()
    };
    let mut groups = value_groups(&entries[..negatives]);
    if zero.count > 0 {
        groups.push((0.0, zero));
    }
    groups.extend(value_groups(&entries[negatives..]));

    let population = context.total.count;
    let mut left = GradStats::default();
    let mut previous: Option<f64> = None;
    for (value, stats) in groups {
        if let Some(lower) = previous {
            if left.count >= min_leaf && population - left.count >= min_leaf {
                if let Some((gain, loss_reduction, penalty_increase, d1, d2)) =
                    context.evaluate(left)
                {
                    if gain > 0.0 && best.map_or(true, |b| gain > b.gain) {
                        *best = Some(SplitCandidate {
                            feature,
                            threshold: threshold_between(lower, value),
                            gain,
                            loss_reduction,
                            penalty_increase,
                            left_weight: context.weight + d1,
                            right_weight: context.weight + d2,
                            left_count: left.count,
                            right_count: population - left.count,
                        });
                    }
                }
            }
        }
        left.merge(stats);
        previous = Some(value);
    }
}
