//! Structural penalties on tree weights.
//!
//! A regularizer keeps, per tree, whatever it derives from the topology
//! (cached until the tree's fingerprint changes) plus the weight-dependent
//! values needed to answer derivative queries in O(node count).

use std::{fmt, str::FromStr};

use crate::{
    tree::{NodeId, TrainableTree},
    RgfError, Result,
};

mod plain;
mod topology;
mod tree_structured;

pub use plain::PlainRegularizer;
pub use tree_structured::TreeStructuredRegularizer;


/// First and second derivative of the penalty in one leaf weight.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PenaltyDerivatives {
    pub gradient: f64,
    pub hessian: f64,
}

/// Penalty of a hypothetical split of a leaf, as an exact quadratic in the
/// weight changes `(dl, dr)` of the two new leaves, measured from the
/// current penalty. Both new leaves start at the parent's weight.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SplitPenalty {
    /// Penalty change of the split alone, before any weight moves.
    pub offset: f64,
    pub left_gradient: f64,
    pub right_gradient: f64,
    pub left_hessian: f64,
    pub right_hessian: f64,
    pub cross_hessian: f64,
}

impl SplitPenalty {
    #[inline]
    pub fn delta(&self, dl: f64, dr: f64) -> f64 {
        self.offset
            + self.left_gradient * dl
            + self.right_gradient * dr
            + 0.5 * self.left_hessian * dl * dl
            + 0.5 * self.right_hessian * dr * dr
            + self.cross_hessian * dl * dr
    }
}

/// How strongly a node's penalty term counts at a given depth.
///
/// The discount is strictly positive and non-increasing in depth; a node's
/// term is divided by it, so deeper nodes cost at least as much.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum DepthDiscount {
    #[default]
    Uniform,
    /// `discount(d) = factor^-d`, `factor >= 1`.
    Geometric { factor: f64 },
}

impl DepthDiscount {
    pub fn from_factor(factor: f64) -> Result<Self> {
        if !(factor.is_finite() && factor >= 1.0) {
            return Err(RgfError::Configuration(format!(
                "depth factor must be a finite number >= 1, got {factor}"
            )));
        }
        Ok(if factor == 1.0 {
            DepthDiscount::Uniform
        } else {
            DepthDiscount::Geometric { factor }
        })
    }

    pub fn factor(&self) -> f64 {
        match *self {
            DepthDiscount::Uniform => 1.0,
            DepthDiscount::Geometric { factor } => factor,
        }
    }

    #[inline]
    pub fn discount(&self, depth: usize) -> f64 {
        1.0 / self.coefficient(depth)
    }

    /// Multiplier of a squared deviation at `depth`.
    #[inline]
    pub fn coefficient(&self, depth: usize) -> f64 {
        match *self {
            DepthDiscount::Uniform => 1.0,
            DepthDiscount::Geometric { factor } => factor.powi(depth as i32),
        }
    }
}

pub trait Regularizer: Send + Sync + fmt::Debug {
    /// Brings the cache up to date with `tree`. Topology-derived state is
    /// recomputed only when the tree's fingerprint changed since the last
    /// reset; weight-dependent values are always refreshed.
    fn reset(&mut self, tree: &TrainableTree);

    /// Folds a split just applied to `tree` into the cache.
    fn commit(&mut self, tree: &TrainableTree);

    /// Penalty at the weights seen by the last reset, commit or update.
    fn penalty(&self) -> f64;

    fn leaf_derivatives(&self, tree: &TrainableTree, leaf: NodeId) -> Result<PenaltyDerivatives>;

    /// Records that the weight of `leaf` moved by `delta`.
    fn update_weight(&mut self, tree: &TrainableTree, leaf: NodeId, delta: f64) -> Result<()>;

    /// Penalty quadratic of splitting `node`. Does not touch the cache.
    fn split_penalty(&self, tree: &TrainableTree, node: NodeId) -> Result<SplitPenalty>;

    /// Penalty change if `node` were split into leaves weighted `weights`.
    fn evaluate_split_penalty_delta(
        &self,
        tree: &TrainableTree,
        node: NodeId,
        weights: (f64, f64),
    ) -> Result<f64> {
        let w = tree.node(node)?.weight;
        let penalty = self.split_penalty(tree, node)?;
        Ok(penalty.delta(weights.0 - w, weights.1 - w))
    }

    /// Number of topology recomputations so far.
    fn recomputations(&self) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegularizerKind {
    /// Penalizes parent/child deviations of aggregated node values.
    #[default]
    TreeStructured,
    /// Squared leaf weights only.
    Plain,
}

impl RegularizerKind {
    pub fn build(self, discount: DepthDiscount) -> Box<dyn Regularizer> {
        match self {
            RegularizerKind::TreeStructured => Box::new(TreeStructuredRegularizer::new(discount)),
            RegularizerKind::Plain => Box::new(PlainRegularizer::new(discount)),
        }
    }
}

impl fmt::Display for RegularizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RegularizerKind::TreeStructured => "tree",
            RegularizerKind::Plain => "none",
        })
    }
}

impl FromStr for RegularizerKind {
    type Err = RgfError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tree" => Ok(RegularizerKind::TreeStructured),
            "none" => Ok(RegularizerKind::Plain),
            other => Err(RgfError::Configuration(format!(
                "unknown regularizer {other:?}"
            ))),
        }
    }
}

fn stale(tree: &TrainableTree) -> RgfError {
    RgfError::Consistency(format!(
        "regularizer queried before a reset on the current topology ({:?})",
        tree.fingerprint()
    ))
}

fn not_a_leaf(node: NodeId) -> RgfError {
    RgfError::Consistency(format!("node {node} is not a leaf of the cached topology"))
}
