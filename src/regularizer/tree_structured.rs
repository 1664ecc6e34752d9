use tracing::trace;

use super::{
    not_a_leaf, stale, topology::Topology, DepthDiscount, PenaltyDerivatives, Regularizer,
    SplitPenalty,
};
use crate::{
    tree::{NodeId, TrainableTree, TreeFingerprint},
    Result,
};

/// Per-leaf linear response of the node deviations. Depends on topology only.
#[derive(Debug, Clone)]
struct LeafResponse {
    deviation: Vec<f64>,
    hessian: f64,
}

#[derive(Debug, Clone)]
struct Cache {
    fingerprint: TreeFingerprint,
    topology: Topology,
    responses: Vec<Option<LeafResponse>>,
    deviations: Vec<f64>,
    penalty: f64,
}

/// Penalizes the deviation of every node's aggregated value from its
/// parent's, scaled by the depth discount. Leaf values are the leaf weights;
/// internal values are the exact penalty minimizers given the leaves.
///
/// The penalty is a quadratic form in the leaf weights, so every derivative
/// is exact and weight updates are folded in linearly.
#[derive(Debug, Clone)]
pub struct TreeStructuredRegularizer {
    discount: DepthDiscount,
    cache: Option<Cache>,
    recomputations: usize,
}

impl TreeStructuredRegularizer {
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

    fn rebuild(&mut self, tree: &TrainableTree) {
        let topology = Topology::from_tree(tree, self.discount);
        let responses = (0..topology.node_count())
            .map(|id| {
                topology.is_leaf(id).then(|| {
                    let deviation = topology.sensitivity(id);
                    let hessian = 2.0 * topology.penalty(&deviation);
                    LeafResponse { deviation, hessian }
                })
            })
            .collect();
        self.recomputations += 1;
        trace!(
            nodes = topology.node_count(),
            recomputations = self.recomputations,
            "rebuilt regularizer topology"
        );
        self.cache = Some(Cache {
            fingerprint: tree.fingerprint(),
            topology,
            responses,
            deviations: Vec::new(),
            penalty: 0.0,
        });
    }
}

impl Regularizer for TreeStructuredRegularizer {
    fn reset(&mut self, tree: &TrainableTree) {
        if self
            .cache
            .as_ref()
            .map_or(true, |c| c.fingerprint != tree.fingerprint())
        {
            self.rebuild(tree);
        }
        if let Some(cache) = self.cache.as_mut() {
            let nodes = tree.nodes();
            let values = cache.topology.solve(|id| nodes[id].weight);
            cache.deviations = cache.topology.differences(&values);
            cache.penalty = cache.topology.penalty(&cache.deviations);
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
        let response = cache
            .responses
            .get(leaf)
            .and_then(Option::as_ref)
            .ok_or_else(|| not_a_leaf(leaf))?;
        Ok(PenaltyDerivatives {
            gradient: 2.0 * cache.topology.weighted_dot(&cache.deviations, &response.deviation),
            hessian: response.hessian,
        })
    }

    fn update_weight(&mut self, tree: &TrainableTree, leaf: NodeId, delta: f64) -> Result<()> {
        self.fresh(tree)?;
        let Some(cache) = self.cache.as_mut() else {
            return Err(stale(tree));
        };
        let response = cache
            .responses
            .get(leaf)
            .and_then(Option::as_ref)
            .ok_or_else(|| not_a_leaf(leaf))?;
        for (v, dv) in cache.deviations.iter_mut().zip(&response.deviation) {
            *v += delta * dv;
        }
        cache.penalty = cache.topology.penalty(&cache.deviations);
        Ok(())
    }

    fn split_penalty(&self, tree: &TrainableTree, node: NodeId) -> Result<SplitPenalty> {
        let cache = self.fresh(tree)?;
        if !cache.topology.is_leaf(node) {
            return Err(not_a_leaf(node));
        }
        let nodes = tree.nodes();
        let existing = nodes.len();
        let weight = nodes[node].weight;

        let split = cache.topology.with_split(node, self.discount);
        let values = split.solve(|id| if id < existing { nodes[id].weight } else { weight });
        let deviations = split.differences(&values);
        let left = split.sensitivity(existing);
        let right = split.sensitivity(existing + 1);

        Ok(SplitPenalty {
            offset: split.penalty(&deviations) - cache.penalty,
            left_gradient: 2.0 * split.weighted_dot(&deviations, &left),
            right_gradient: 2.0 * split.weighted_dot(&deviations, &right),
            left_hessian: 2.0 * split.penalty(&left),
            right_hessian: 2.0 * split.penalty(&right),
            cross_hessian: 2.0 * split.weighted_dot(&left, &right),
        })
    }

    fn recomputations(&self) -> usize {
        self.recomputations
    }
}
