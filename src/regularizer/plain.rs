use super::{not_a_leaf, stale, DepthDiscount, PenaltyDerivatives, Regularizer, SplitPenalty};
use crate::{
    tree::{NodeId, TrainableTree, TreeFingerprint},
    Result,
};

#[derive(Debug, Clone)]
struct Cache {
    fingerprint: TreeFingerprint,
    /// `c(depth)` on leaves, `None` on internal nodes
    coefficients: Vec<Option<f64>>,
    weights: Vec<f64>,
    penalty: f64,
}

/// `sum over leaves of c(depth) * weight^2`.
#[derive(Debug, Clone)]
pub struct PlainRegularizer {
    discount: DepthDiscount,
    cache: Option<Cache>,
    recomputations: usize,
}

impl PlainRegularizer {
    pub fn new(discount: DepthDiscount) -> Self {
        Self {
            discount,
            cache: None,
            recomputations: 0,
        }
    }

    fn fresh(&self, tree: &TrainableTree) -> Result<&Cache> {
        self.cache
            .as_ref()
            .filter(|c| c.fingerprint == tree.fingerprint())
            .ok_or_else(|| stale(tree))
    }

    fn coefficient(cache: &Cache, leaf: NodeId) -> Result<f64> {
        cache
            .coefficients
            .get(leaf)
            .copied()
            .flatten()
            .ok_or_else(|| not_a_leaf(leaf))
    }
}

impl Regularizer for PlainRegularizer {
    fn reset(&mut self, tree: &TrainableTree) {
        let nodes = tree.nodes();
        let discount = self.discount;
        let outdated = self
            .cache
            .as_ref()
            .map_or(true, |c| c.fingerprint != tree.fingerprint());
        if outdated {
            self.recomputations += 1;
            self.cache = Some(Cache {
                fingerprint: tree.fingerprint(),
                coefficients: nodes
                    .iter()
                    .map(|n| n.is_leaf().then(|| discount.coefficient(n.depth)))
                    .collect(),
                weights: Vec::new(),
                penalty: 0.0,
            });
        }
        if let Some(cache) = self.cache.as_mut() {
            cache.weights = nodes.iter().map(|n| n.weight).collect();
            cache.penalty = cache
                .coefficients
                .iter()
                .zip(&cache.weights)
                .filter_map(|(c, w)| c.map(|c| c * w * w))
                .sum();
        }
    }

    fn commit(&mut self, tree: &TrainableTree) {
        self.reset(tree);
    }

    fn penalty(&self) -> f64 {
        self.cache.as_ref().map_or(0.0, |c| c.penalty)
    }

    fn leaf_derivatives(&self, tree: &TrainableTree, leaf: NodeId) -> Result<PenaltyDerivatives> {
        let cache = self.fresh(tree)?;
        let c = Self::coefficient(cache, leaf)?;
        Ok(PenaltyDerivatives {
            gradient: 2.0 * c * cache.weights[leaf],
            hessian: 2.0 * c,
        })
    }

    fn update_weight(&mut self, tree: &TrainableTree, leaf: NodeId, delta: f64) -> Result<()> {
        let c = Self::coefficient(self.fresh(tree)?, leaf)?;
        let Some(cache) = self.cache.as_mut() else {
            return Err(stale(tree));
        };
        let old = cache.weights[leaf];
        let new = old + delta;
        cache.weights[leaf] = new;
        cache.penalty += c * (new * new - old * old);
        Ok(())
    }

    fn split_penalty(&self, tree: &TrainableTree, node: NodeId) -> Result<SplitPenalty> {
        let cache = self.fresh(tree)?;
        let c = Self::coefficient(cache, node)?;
        let w = cache.weights[node];
        let child = self.discount.coefficient(tree.node(node)?.depth + 1);
        Ok(SplitPenalty {
            offset: 2.0 * child * w * w - c * w * w,
            left_gradient: 2.0 * child * w,
            right_gradient: 2.0 * child * w,
            left_hessian: 2.0 * child,
            right_hessian: 2.0 * child,
            cross_hessian: 0.0,
        })
    }

    fn recomputations(&self) -> usize {
        self.recomputations
    }
}
