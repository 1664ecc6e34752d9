use ndarray::{Array1, ArrayView2, Axis};

use crate::{data::DataSource, tree::NodeId, FittedModel};

pub mod io;

#[cfg(test)]
mod tests;

/// Saved node. Ids index into the owning [`ModelTree`].
#[derive(Debug, Clone, PartialEq)]
pub struct ModelNode {
    pub depth: usize,
    pub parent: Option<NodeId>,
    pub children: Option<(NodeId, NodeId)>,
    pub feature: Option<usize>,
    pub threshold: f64,
    pub weight: f64,
}

impl ModelNode {
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }
}

/// Read-only tree of a trained ensemble. Node 0 is the root.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelTree {
    nodes: Vec<ModelNode>,
}

impl ModelTree {
    pub fn new(nodes: Vec<ModelNode>) -> Self {
        ModelTree { nodes }
    }

    pub fn nodes(&self) -> &[ModelNode] {
        &self.nodes
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// Sum of the weights on the path of a point whose feature values are
    /// given by `value`.
    pub fn predict_with<F>(&self, value: F) -> f64
    where
        F: Fn(usize) -> f64,
    {
        let mut sum = 0.0;
        let mut id = 0;
        while let Some(node) = self.nodes.get(id) {
            sum += node.weight;
            match (node.children, node.feature) {
                (Some((left, right)), Some(feature)) => {
                    id = if value(feature) <= node.threshold {
                        left
                    } else {
                        right
                    };
                }
                _ => break,
            }
        }
        sum
    }
}

/// Trained forest: `bias + sum of tree outputs`.
#[derive(Debug, Clone, PartialEq)]
pub struct Ensemble {
    pub trees: Vec<ModelTree>,
    pub bias: f64,
    /// Number of feature columns of the training data.
    pub feature_count: usize,
    /// Parameter string the ensemble was trained with.
    pub config: String,
    pub signature: String,
}

impl Ensemble {
    pub fn leaf_count(&self) -> usize {
        self.trees.iter().map(ModelTree::leaf_count).sum()
    }

    /// Prediction for one row given as `(feature, value)` pairs sorted by
    /// feature. Absent features are zero.
    pub fn predict_row(&self, row: &[(usize, f64)]) -> f64 {
        let lookup = |feature: usize| {
            row.binary_search_by_key(&feature, |&(f, _)| f)
                .map_or(0.0, |k| row[k].1)
        };
        self.bias
            + self
                .trees
                .iter()
                .map(|t| t.predict_with(lookup))
                .sum::<f64>()
    }

    pub fn predict_source<D: DataSource>(&self, data: &D) -> Array1<f64> {
        data.rows()
            .iter()
            .map(|row| self.predict_row(row))
            .collect()
    }
}

impl FittedModel for Ensemble {
    /// Columns beyond the width of `x` read as zero.
    fn predict(&self, x: ArrayView2<f64>) -> Array1<f64> {
        let mut y_hat = Array1::from_elem(x.nrows(), self.bias);
        for (i, row) in x.axis_iter(Axis(0)).enumerate() {
            let lookup = |feature: usize| row.get(feature).copied().unwrap_or(0.0);
            for tree in &self.trees {
                y_hat[i] += tree.predict_with(lookup);
            }
        }
        y_hat
    }
}
