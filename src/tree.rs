use std::sync::Arc;

use crate::{
    data::DataSource,
    model::{ModelNode, ModelTree},
    RgfError, Result,
};

pub mod sorted_index;
pub mod split;

pub use sorted_index::{SortedEntry, SortedFeatureIndex};
pub use split::{Gradients, SplitCandidate, SplitConstraints};


/// Dense index into a tree's node arena.
pub type NodeId = usize;

#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub depth: usize,
    pub parent: Option<NodeId>,
    /// `(left, right)`; `None` for a leaf.
    pub children: Option<(NodeId, NodeId)>,
    pub feature: Option<usize>,
    pub threshold: f64,
    pub weight: f64,
    start: usize,
    len: usize,
}

impl TreeNode {
    fn leaf(depth: usize, parent: Option<NodeId>, weight: f64, start: usize, len: usize) -> Self {
        Self {
            depth,
            parent,
            children: None,
            feature: None,
            threshold: 0.0,
            weight,
            start,
            len,
        }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    /// Number of training points routed to this node.
    #[inline]
    pub fn population(&self) -> usize {
        self.len
    }
}

/// Identifies a tree topology. Any split changes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeFingerprint {
    pub node_count: usize,
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeStats {
    pub node_count: usize,
    pub leaf_count: usize,
    pub max_depth: usize,
    pub min_population: usize,
}

/// Result of [`TrainableTree::apply_split`]: the new leaves and how much the
/// prediction of their points moved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AppliedSplit {
    pub left: NodeId,
    pub right: NodeId,
    pub left_delta: f64,
    pub right_delta: f64,
}

/// A decision tree under construction.
///
/// Nodes live in an append-only arena; a child always has a larger id than
/// its parent. Each node owns a contiguous range of `points`, and the ranges
/// of two siblings partition the range of their parent.
#[derive(Debug, Clone)]
pub struct TrainableTree {
    nodes: Vec<TreeNode>,
    points: Vec<usize>,
    sorted: Vec<Option<Arc<SortedFeatureIndex>>>,
    /// side of each point in the split being applied; only the entries of
    /// the node being split are meaningful
    goes_left: Vec<bool>,
    leaf_count: usize,
    max_depth: usize,
    min_population: usize,
    version: u64,
}

impl TrainableTree {
    /// Single leaf holding every point of `index`.
    pub fn make_root(points: Vec<usize>, row_count: usize, index: Arc<SortedFeatureIndex>) -> Self {
        debug_assert_eq!(points.len(), index.population());
        let len = points.len();
        Self {
            nodes: vec![TreeNode::leaf(0, None, 0.0, 0, len)],
            points,
            sorted: vec![Some(index)],
            goes_left: vec![false; row_count],
            leaf_count: 1,
            max_depth: 0,
            min_population: len,
            version: 0,
        }
    }

    #[inline]
    pub fn root(&self) -> NodeId {
        0
    }

    #[inline]
    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Result<&TreeNode> {
        self.nodes
            .get(id)
            .ok_or_else(|| RgfError::Consistency(format!("node {id} does not exist")))
    }

    #[inline]
    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    pub fn leaves(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_leaf())
            .map(|(id, _)| id)
    }

    /// Points routed to `id`.
    pub fn points(&self, id: NodeId) -> &[usize] {
        let n = &self.nodes[id];
        &self.points[n.start..n.start + n.len]
    }

    pub fn fingerprint(&self) -> TreeFingerprint {
        TreeFingerprint {
            node_count: self.nodes.len(),
            version: self.version,
        }
    }

    pub fn stats(&self) -> TreeStats {
        TreeStats {
            node_count: self.nodes.len(),
            leaf_count: self.leaf_count,
            max_depth: self.max_depth,
            min_population: self.min_population,
        }
    }

    /// Overwrites a leaf weight. Predictions are the caller's business.
    pub fn set_leaf_weight(&mut self, leaf: NodeId, weight: f64) -> Result<()> {
        let node = self
            .nodes
            .get_mut(leaf)
            .ok_or_else(|| RgfError::Consistency(format!("node {leaf} does not exist")))?;
        if !node.is_leaf() {
            return Err(RgfError::Consistency(format!("node {leaf} is not a leaf")));
        }
        node.weight = weight;
        Ok(())
    }

    pub(crate) fn sorted_index(&self, id: NodeId) -> Result<&SortedFeatureIndex> {
        self.sorted
            .get(id)
            .and_then(|s| s.as_deref())
            .ok_or_else(|| RgfError::Consistency(format!("node {id} has no sorted index")))
    }

    /// Turns `leaf` into an internal node with two new leaves carrying the
    /// candidate's weights. The internal node's own weight is zeroed, so a
    /// point's prediction is still the weight sum along its path.
    pub fn apply_split(
        &mut self,
        leaf: NodeId,
        candidate: &SplitCandidate,
        min_leaf_size: usize,
    ) -> Result<AppliedSplit> {
        let node = self.node(leaf)?;
        if !node.is_leaf() {
            return Err(RgfError::Consistency(format!(
                "split requested on internal node {leaf}"
            )));
        }
        if node.len < 2 * min_leaf_size {
            return Err(RgfError::Consistency(format!(
                "node {leaf} holds {} points, a split needs {}",
                node.len,
                2 * min_leaf_size
            )));
        }
        let old_weight = node.weight;
        let (left, right) = self.split_node(
            leaf,
            candidate.feature,
            candidate.threshold,
            candidate.left_weight,
            candidate.right_weight,
            false,
        )?;
        Ok(AppliedSplit {
            left,
            right,
            left_delta: candidate.left_weight - old_weight,
            right_delta: candidate.right_weight - old_weight,
        })
    }

    fn split_node(
        &mut self,
        leaf: NodeId,
        feature: usize,
        threshold: f64,
        left_weight: f64,
        right_weight: f64,
        allow_empty: bool,
    ) -> Result<(NodeId, NodeId)> {
        let index = self.sorted[leaf]
            .take()
            .ok_or_else(|| RgfError::Consistency(format!("node {leaf} has no sorted index")))?;
        if feature >= index.feature_count() {
            let count = index.feature_count();
            self.sorted[leaf] = Some(index);
            return Err(RgfError::FeatureOutOfRange { feature, count });
        }
        let entries = index.feature(feature)?;

        let (depth, start, len) = {
            let n = &self.nodes[leaf];
            (n.depth, n.start, n.len)
        };
        let range = start..start + len;
        let goes_left = &mut self.goes_left;
        for &p in &self.points[range.clone()] {
            goes_left[p] = 0.0 <= threshold;
        }
        for e in entries {
            goes_left[e.point] = e.value <= threshold;
        }

        let (left_points, right_points): (Vec<usize>, Vec<usize>) = self.points[range.clone()]
            .iter()
            .copied()
            .partition(|&p| goes_left[p]);
        if !allow_empty && (left_points.is_empty() || right_points.is_empty()) {
            self.sorted[leaf] = Some(index);
            return Err(RgfError::Consistency(format!(
                "split of node {leaf} on feature {feature} at {threshold} leaves a side empty"
            )));
        }
        let n_left = left_points.len();
        self.points[start..start + n_left].copy_from_slice(&left_points);
        self.points[start + n_left..range.end].copy_from_slice(&right_points);

        let goes_left = &self.goes_left;
        let (left_index, right_index) = index.filter(|p| goes_left[p], n_left);

        let left = self.nodes.len();
        let right = left + 1;
        self.nodes.push(TreeNode::leaf(
            depth + 1,
            Some(leaf),
            left_weight,
            start,
            n_left,
        ));
        self.nodes.push(TreeNode::leaf(
            depth + 1,
            Some(leaf),
            right_weight,
            start + n_left,
            len - n_left,
        ));
        self.sorted.push(Some(Arc::new(left_index)));
        self.sorted.push(Some(Arc::new(right_index)));

        let parent = &mut self.nodes[leaf];
        parent.children = Some((left, right));
        parent.feature = Some(feature);
        parent.threshold = threshold;
        parent.weight = 0.0;

        self.leaf_count += 1;
        self.max_depth = self.max_depth.max(depth + 1);
        self.min_population = self.min_population.min(n_left).min(len - n_left);
        self.version += 1;
        Ok((left, right))
    }

    pub fn to_model(&self) -> ModelTree {
        let nodes = self
            .nodes
            .iter()
            .map(|n| ModelNode {
                depth: n.depth,
                parent: n.parent,
                children: n.children,
                feature: n.feature,
                threshold: n.threshold,
                weight: n.weight,
            })
            .collect();
        ModelTree::new(nodes)
    }

    /// Rebuilds a trainable tree from a saved one by replaying its splits in
    /// creation order, so node ids are preserved.
    pub fn from_model<D: DataSource>(
        model: &ModelTree,
        data: &D,
        root_index: Arc<SortedFeatureIndex>,
    ) -> Result<Self> {
        let saved = model.nodes();
        let points: Vec<usize> = (0..data.row_count()).collect();
        let mut tree = Self::make_root(points, data.row_count(), root_index);
        if saved.is_empty() {
            return Err(RgfError::Format("tree without nodes".to_string()));
        }

        let mut internal: Vec<(NodeId, (NodeId, NodeId))> = saved
            .iter()
            .enumerate()
            .filter_map(|(id, n)| n.children.map(|c| (id, c)))
            .collect();
        internal.sort_by_key(|&(_, (left, _))| left);

        for (id, (left, right)) in internal {
            if left != tree.nodes.len() || right != left + 1 {
                return Err(RgfError::Format(format!(
                    "node {id}: children ({left}, {right}) are not in creation order"
                )));
            }
            if tree.nodes.get(id).map_or(true, |n| !n.is_leaf()) {
                return Err(RgfError::Format(format!(
                    "node {id} is split before it exists"
                )));
            }
            let feature = saved[id]
                .feature
                .ok_or_else(|| RgfError::Format(format!("internal node {id} has no feature")))?;
            tree.split_node(id, feature, saved[id].threshold, 0.0, 0.0, true)
                .map_err(|e| match e {
                    RgfError::FeatureOutOfRange { .. } => RgfError::Data(e.to_string()),
                    other => other,
                })?;
        }
        if tree.nodes.len() != saved.len() {
            return Err(RgfError::Format(format!(
                "{} nodes saved but {} reachable",
                saved.len(),
                tree.nodes.len()
            )));
        }
        for (node, saved) in tree.nodes.iter_mut().zip(saved) {
            node.weight = saved.weight;
        }
        Ok(tree)
    }
}
