use std::sync::Arc;

use tracing::info;

use crate::{
    model::Ensemble,
    regularizer::{DepthDiscount, Regularizer, RegularizerKind},
    tree::{SortedFeatureIndex, TrainableTree},
    RgfError, Result,
};

pub mod grower;
pub mod params;
pub mod timer;

pub use grower::{fit, ForestGrower, GrowerState, GrowthStatus};
pub use params::{ForestParams, ForestParamsBuilder};
pub use timer::LeafTimer;

/// A tree paired with its regularizer cache.
#[derive(Debug)]
pub struct ForestTree {
    pub tree: TrainableTree,
    pub regularizer: Box<dyn Regularizer>,
}

impl ForestTree {
    pub fn new(tree: TrainableTree, kind: RegularizerKind, discount: DepthDiscount) -> Self {
        let mut regularizer = kind.build(discount);
        regularizer.reset(&tree);
        Self { tree, regularizer }
    }
}

/// The ensemble under construction.
///
/// Besides the trees it holds a single-leaf "next tree" that competes in the
/// split search like any other tree; splitting its root turns it into a real
/// tree. It is absent once the tree budget is spent.
#[derive(Debug)]
pub struct Forest {
    trees: Vec<ForestTree>,
    placeholder: Option<ForestTree>,
    bias: f64,
    root_index: Arc<SortedFeatureIndex>,
    row_count: usize,
    regularizer: RegularizerKind,
    discount: DepthDiscount,
    max_trees: Option<usize>,
}

impl Forest {
    pub fn new(
        root_index: Arc<SortedFeatureIndex>,
        row_count: usize,
        bias: f64,
        regularizer: RegularizerKind,
        discount: DepthDiscount,
        max_trees: Option<usize>,
    ) -> Self {
        let mut forest = Self {
            trees: Vec::new(),
            placeholder: None,
            bias,
            root_index,
            row_count,
            regularizer,
            discount,
            max_trees,
        };
        forest.refill_placeholder();
        forest
    }

    fn fresh_root(&self) -> ForestTree {
        let points: Vec<usize> = (0..self.row_count).collect();
        let tree = TrainableTree::make_root(points, self.row_count, Arc::clone(&self.root_index));
        ForestTree::new(tree, self.regularizer, self.discount)
    }

    fn refill_placeholder(&mut self) {
        self.placeholder = if self.max_trees.map_or(true, |m| self.trees.len() < m) {
            Some(self.fresh_root())
        } else {
            None
        };
    }

    pub fn trees(&self) -> &[ForestTree] {
        &self.trees
    }

    pub(crate) fn trees_mut(&mut self) -> &mut [ForestTree] {
        &mut self.trees
    }

    pub(crate) fn tree_mut(&mut self, index: usize) -> Result<&mut ForestTree> {
        let count = self.trees.len();
        self.trees
            .get_mut(index)
            .ok_or_else(|| RgfError::Consistency(format!("tree {index} of {count} does not exist")))
    }

    pub fn placeholder(&self) -> Option<&ForestTree> {
        self.placeholder.as_ref()
    }

    pub fn bias(&self) -> f64 {
        self.bias
    }

    pub(crate) fn set_bias(&mut self, bias: f64) {
        self.bias = bias;
    }

    pub fn root_index(&self) -> &Arc<SortedFeatureIndex> {
        &self.root_index
    }

    /// Leaves of the real trees; the placeholder does not count.
    pub fn leaf_count(&self) -> usize {
        self.trees.iter().map(|ft| ft.tree.leaf_count()).sum()
    }

    /// Appends a prebuilt tree, e.g. one restored from a saved model.
    pub(crate) fn push_tree(&mut self, tree: TrainableTree) {
        self.trees.push(ForestTree::new(tree, self.regularizer, self.discount));
        self.refill_placeholder();
    }

    /// Turns the placeholder into a real tree and returns its index.
    pub(crate) fn promote_placeholder(&mut self) -> Result<usize> {
        let tree = self.placeholder.take().ok_or_else(|| {
            RgfError::Consistency("no next tree: the tree budget is spent".to_string())
        })?;
        self.trees.push(tree);
        self.refill_placeholder();
        info!(trees = self.trees.len(), "started a new tree");
        Ok(self.trees.len() - 1)
    }

    pub fn to_ensemble(&self, feature_count: usize, config: String, signature: String) -> Ensemble {
        Ensemble {
            trees: self.trees.iter().map(|ft| ft.tree.to_model()).collect(),
            bias: self.bias,
            feature_count,
            config,
            signature,
        }
    }
}
