use crate::tree::{NodeId, TrainableTree};

use super::DepthDiscount;

/// Topology-only quantities of the aggregation solver.
///
/// A node's aggregated value is the one minimizing
/// `sum_n c(n) * (value(n) - value(parent(n)))^2` with leaf values fixed and
/// the root's parent value pinned at zero. For fixed leaves each subtree
/// contributes `curvature * (value(parent) - mean)^2` to its parent, which is
/// what makes a two-pass exact solve possible.
#[derive(Debug, Clone, Default)]
pub(super) struct Topology {
    parent: Vec<Option<NodeId>>,
    children: Vec<Option<(NodeId, NodeId)>>,
    depth: Vec<usize>,
    coefficient: Vec<f64>,
    /// summed curvature of the children, zero on leaves
    inner: Vec<f64>,
    curvature: Vec<f64>,
}

impl Topology {
    pub fn from_tree(tree: &TrainableTree, discount: DepthDiscount) -> Self {
        let nodes = tree.nodes();
        let mut topology = Self {
            parent: nodes.iter().map(|n| n.parent).collect(),
            children: nodes.iter().map(|n| n.children).collect(),
            depth: nodes.iter().map(|n| n.depth).collect(),
            coefficient: nodes.iter().map(|n| discount.coefficient(n.depth)).collect(),
            inner: vec![0.0; nodes.len()],
            curvature: vec![0.0; nodes.len()],
        };
        topology.compute_curvature();
        topology
    }

    /// Copy of `self` with `node` split into two new leaves, ids
    /// `node_count()` and `node_count() + 1`.
    pub fn with_split(&self, node: NodeId, discount: DepthDiscount) -> Self {
        let left = self.node_count();
        let depth = self.depth[node] + 1;
        let mut split = self.clone();
        split.children[node] = Some((left, left + 1));
        for _ in 0..2 {
            split.parent.push(Some(node));
            split.children.push(None);
            split.depth.push(depth);
            split.coefficient.push(discount.coefficient(depth));
            split.inner.push(0.0);
            split.curvature.push(0.0);
        }
        split.compute_curvature();
        split
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.parent.len()
    }

    #[inline]
    pub fn is_leaf(&self, node: NodeId) -> bool {
        self.children.get(node).is_some_and(|c| c.is_none())
    }

    fn compute_curvature(&mut self) {
        // children have larger ids than their parent
        for id in (0..self.node_count()).rev() {
            let c = self.coefficient[id];
            match self.children[id] {
                None => {
                    self.inner[id] = 0.0;
                    self.curvature[id] = c;
                }
                Some((l, r)) => {
                    let h = self.curvature[l] + self.curvature[r];
                    self.inner[id] = h;
                    self.curvature[id] = c * h / (c + h);
                }
            }
        }
    }

    /// Aggregated value of every node given the leaf values.
    pub fn solve<F>(&self, leaf_value: F) -> Vec<f64>
    where
        F: Fn(NodeId) -> f64,
    {
        let n = self.node_count();
        let mut mean = vec![0.0; n];
        for id in (0..n).rev() {
            mean[id] = match self.children[id] {
                None => leaf_value(id),
                Some((l, r)) => {
                    (self.curvature[l] * mean[l] + self.curvature[r] * mean[r]) / self.inner[id]
                }
            };
        }
        let mut value = vec![0.0; n];
        for id in 0..n {
            value[id] = match self.children[id] {
                None => mean[id],
                Some(_) => {
                    let above = self.parent[id].map_or(0.0, |p| value[p]);
                    let c = self.coefficient[id];
                    let h = self.inner[id];
                    (c * above + h * mean[id]) / (c + h)
                }
            };
        }
        value
    }

    /// `value(n) - value(parent(n))`, the root measured from zero.
    pub fn differences(&self, value: &[f64]) -> Vec<f64> {
        (0..self.node_count())
            .map(|id| value[id] - self.parent[id].map_or(0.0, |p| value[p]))
            .collect()
    }

    /// Deviation of every node per unit change of `leaf`'s value.
    pub fn sensitivity(&self, leaf: NodeId) -> Vec<f64> {
        let unit = self.solve(|id| if id == leaf { 1.0 } else { 0.0 });
        self.differences(&unit)
    }

    /// `sum_n c(n) * a[n] * b[n]`
    pub fn weighted_dot(&self, a: &[f64], b: &[f64]) -> f64 {
        self.coefficient
            .iter()
            .zip(a)
            .zip(b)
            .map(|((c, x), y)| c * x * y)
            .sum()
    }

    pub fn penalty(&self, deviations: &[f64]) -> f64 {
        self.weighted_dot(deviations, deviations)
    }
}
