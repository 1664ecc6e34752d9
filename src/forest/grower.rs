use std::{collections::HashMap, sync::Arc};

use ndarray::Array1;
use tracing::{debug, info};

#[cfg(feature = "use-rayon")]
use rayon::prelude::*;

use super::{Forest, ForestParams, ForestTree, LeafTimer};
use crate::{
    data::DataSource,
    model::Ensemble,
    optimizer::{SweepReport, WeightOptimizer},
    tree::{Gradients, NodeId, SortedFeatureIndex, SplitCandidate, TrainableTree},
    FitResult, RgfError, Result,
};


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrowerState {
    Growing,
    Optimizing,
    AwaitingTest,
    Done,
}

/// Outcome of one [`ForestGrower::proceed`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrowthStatus {
    Continuing,
    /// The test interval was crossed; the caller may evaluate a snapshot
    /// before calling `proceed` again.
    TestNow,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Target {
    Tree(usize),
    NextTree,
}

/// Best split found per leaf of one tree; `None` when the leaf had no
/// positive-gain split.
type LeafCandidates = HashMap<NodeId, Option<SplitCandidate>>;

#[derive(Debug, Clone, Copy)]
struct BestSplit {
    target: Target,
    leaf: NodeId,
    candidate: SplitCandidate,
}

/// Grows a forest one split per [`proceed`](Self::proceed) call and
/// re-optimizes all leaf weights every `optimize_interval` splits.
///
/// A leaf is searched once between two weight optimizations: its best split
/// is kept and competes with the candidates of newer leaves until the next
/// optimization clears every cached candidate.
pub struct ForestGrower {
    params: ForestParams,
    forest: Forest,
    candidates: Vec<LeafCandidates>,
    next_tree_candidates: LeafCandidates,
    optimizer: WeightOptimizer,
    state: GrowerState,
    feature_count: usize,
    split_count: usize,
    splits_since_optimization: usize,
    optimization_count: usize,
    optimize_timer: LeafTimer,
    test_timer: Option<LeafTimer>,
    last_report: Option<SweepReport>,
}

fn root_index<D: DataSource>(data: &D, targets: &Array1<f64>) -> Result<Arc<SortedFeatureIndex>> {
    if data.row_count() != targets.len() {
        return Err(RgfError::Data(format!(
            "{} rows but {} targets",
            data.row_count(),
            targets.len()
        )));
    }
    if data.row_count() == 0 {
        return Err(RgfError::Data("no training points".to_string()));
    }
    if let Some(i) = targets.iter().position(|t| !t.is_finite()) {
        return Err(RgfError::Data(format!("target of point {i} is not finite")));
    }
    for feature in 0..data.column_count() {
        let mut bad = None;
        data.for_each_nonzero(feature, |point, value| {
            if bad.is_none() && !value.is_finite() {
                bad = Some(point);
            }
        });
        if let Some(point) = bad {
            return Err(RgfError::Data(format!(
                "feature {feature} of point {point} is not finite"
            )));
        }
    }
    let points: Vec<usize> = (0..data.row_count()).collect();
    Ok(Arc::new(SortedFeatureIndex::build(data, &points)))
}

impl ForestGrower {
    pub fn cold_start<D: DataSource>(
        data: &D,
        targets: Array1<f64>,
        params: ForestParams,
    ) -> Result<Self> {
        Self::cold_start_weighted(data, targets, None, params)
    }

    pub fn cold_start_weighted<D: DataSource>(
        data: &D,
        targets: Array1<f64>,
        point_weights: Option<Array1<f64>>,
        params: ForestParams,
    ) -> Result<Self> {
        params.validate()?;
        let index = root_index(data, &targets)?;
        let optimizer = WeightOptimizer::cold_start(
            params.loss.function(),
            targets,
            point_weights,
            params.use_average,
        )?;
        let forest = Forest::new(
            index,
            data.row_count(),
            optimizer.bias(),
            params.regularizer,
            params.discount()?,
            params.max_trees,
        );
        info!(
            rows = data.row_count(),
            features = data.column_count(),
            bias = optimizer.bias(),
            "cold start"
        );
        Ok(Self::assemble(params, forest, optimizer, data.column_count(), 0))
    }

    /// Continues training `prior` on `data`. The prior's trees are rebuilt
    /// on the new points and the leaf counter resumes from their split count.
    pub fn warm_start<D: DataSource>(
        data: &D,
        targets: Array1<f64>,
        params: ForestParams,
        prior: &Ensemble,
    ) -> Result<Self> {
        Self::warm_start_weighted(data, targets, None, params, prior)
    }

    pub fn warm_start_weighted<D: DataSource>(
        data: &D,
        targets: Array1<f64>,
        point_weights: Option<Array1<f64>>,
        params: ForestParams,
        prior: &Ensemble,
    ) -> Result<Self> {
        params.validate()?;
        if prior.feature_count != data.column_count() {
            return Err(RgfError::Data(format!(
                "model expects {} features, data has {}",
                prior.feature_count,
                data.column_count()
            )));
        }
        let index = root_index(data, &targets)?;
        let mut forest = Forest::new(
            Arc::clone(&index),
            data.row_count(),
            prior.bias,
            params.regularizer,
            params.discount()?,
            params.max_trees,
        );
        let mut split_count = 0;
        for model_tree in &prior.trees {
            let tree = TrainableTree::from_model(model_tree, data, Arc::clone(&index))?;
            split_count += tree.leaf_count() - 1;
            forest.push_tree(tree);
        }
        let optimizer =
            WeightOptimizer::warm_start(params.loss.function(), targets, point_weights, &forest)?;
        info!(
            trees = forest.trees().len(),
            splits = split_count,
            "warm start"
        );
        Ok(Self::assemble(
            params,
            forest,
            optimizer,
            data.column_count(),
            split_count,
        ))
    }

    fn assemble(
        params: ForestParams,
        forest: Forest,
        optimizer: WeightOptimizer,
        feature_count: usize,
        split_count: usize,
    ) -> Self {
        let optimize_timer = LeafTimer::new(params.optimize_interval, split_count);
        let test_timer = params.test_interval.map(|i| LeafTimer::new(i, split_count));
        Self {
            params,
            forest,
            candidates: Vec::new(),
            next_tree_candidates: LeafCandidates::new(),
            optimizer,
            state: GrowerState::Growing,
            feature_count,
            split_count,
            splits_since_optimization: 0,
            optimization_count: 0,
            optimize_timer,
            test_timer,
            last_report: None,
        }
    }

    pub fn state(&self) -> GrowerState {
        self.state
    }

    pub fn forest(&self) -> &Forest {
        &self.forest
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    /// Leaf counter: number of splits applied, prior model included.
    pub fn split_count(&self) -> usize {
        self.split_count
    }

    pub fn optimization_count(&self) -> usize {
        self.optimization_count
    }

    pub fn last_report(&self) -> Option<SweepReport> {
        self.last_report
    }

    /// One growth step.
    pub fn proceed(&mut self) -> Result<GrowthStatus> {
        match self.state {
            GrowerState::Done => return Ok(GrowthStatus::Done),
            GrowerState::AwaitingTest | GrowerState::Optimizing => self.state = GrowerState::Growing,
            GrowerState::Growing => {}
        }
        if self.forest.leaf_count() >= self.params.max_leaves {
            return self.finish();
        }

        let gradients = self.optimizer.gradients();
        let Some(best) = self.search(&gradients)? else {
            info!(splits = self.split_count, "no split with positive gain");
            return self.finish();
        };
        self.apply(best)?;

        if self.forest.leaf_count() >= self.params.max_leaves {
            info!(
                splits = self.split_count,
                leaves = self.forest.leaf_count(),
                "leaf budget reached"
            );
            return self.finish();
        }
        if self.optimize_timer.fires(self.split_count) {
            self.state = GrowerState::Optimizing;
            self.optimize()?;
            self.state = GrowerState::Growing;
        }
        if self.test_timer.as_mut().is_some_and(|t| t.fires(self.split_count)) {
            self.state = GrowerState::AwaitingTest;
            return Ok(GrowthStatus::TestNow);
        }
        Ok(GrowthStatus::Continuing)
    }

    fn finish(&mut self) -> Result<GrowthStatus> {
        if self.splits_since_optimization > 0 {
            self.state = GrowerState::Optimizing;
            self.optimize()?;
        }
        self.state = GrowerState::Done;
        info!(
            trees = self.forest.trees().len(),
            leaves = self.forest.leaf_count(),
            loss = self.optimizer.training_loss(),
            "training done"
        );
        Ok(GrowthStatus::Done)
    }

    fn optimize(&mut self) -> Result<()> {
        self.optimizer.synchronize(&self.forest);
        let report = self
            .optimizer
            .iterate(&mut self.forest, &self.params.sweep_settings())?;
        self.optimization_count += 1;
        self.splits_since_optimization = 0;
        for cache in &mut self.candidates {
            cache.clear();
        }
        self.next_tree_candidates.clear();
        self.last_report = Some(report);
        info!(
            splits = self.split_count,
            sweeps = report.sweeps,
            loss = report.loss,
            penalty = report.penalty,
            "optimized weights"
        );
        Ok(())
    }

    /// Best split over every tree and the next-tree root. Only leaves
    /// without a cached candidate are searched. Earlier trees win ties, then
    /// lower node ids.
    fn search(&mut self, gradients: &Gradients) -> Result<Option<BestSplit>> {
        let constraints = self.params.split_constraints();
        let lambda = self.params.search_lambda();
        let at_budget =
            |ft: &ForestTree| constraints.max_leaves.is_some_and(|m| ft.tree.leaf_count() >= m);
        let search_new = |ft: &ForestTree,
                          cache: &LeafCandidates|
         -> Result<Vec<(NodeId, Option<SplitCandidate>)>> {
            if at_budget(ft) {
                return Ok(Vec::new());
            }
            ft.tree
                .leaves()
                .filter(|leaf| !cache.contains_key(leaf))
                .map(|leaf| -> Result<(NodeId, Option<SplitCandidate>)> {
                    let found = ft.tree.find_best_split(
                        leaf,
                        &constraints,
                        gradients,
                        ft.regularizer.as_ref(),
                        lambda,
                    )?;
                    Ok((leaf, found))
                })
                .collect()
        };

        let trees = self.forest.trees();
        self.candidates.resize_with(trees.len(), LeafCandidates::new);
        let found: Vec<Vec<(NodeId, Option<SplitCandidate>)>>;

        #[cfg(not(feature = "use-rayon"))]
        {
            found = trees
                .iter()
                .zip(&self.candidates)
                .map(|(ft, cache)| search_new(ft, cache))
                .collect::<Result<_>>()?;
        }
        #[cfg(feature = "use-rayon")]
        {
            found = trees
                .par_iter()
                .zip(self.candidates.par_iter())
                .map(|(ft, cache)| search_new(ft, cache))
                .collect::<Result<_>>()?;
        }

        for (cache, new) in self.candidates.iter_mut().zip(found) {
            cache.extend(new);
        }
        if let Some(ft) = self.forest.placeholder() {
            let new = search_new(ft, &self.next_tree_candidates)?;
            self.next_tree_candidates.extend(new);
        }

        let mut best: Option<BestSplit> = None;
        let next_tree = self
            .forest
            .placeholder()
            .map(|ft| (Target::NextTree, ft, &self.next_tree_candidates));
        let all = trees
            .iter()
            .zip(&self.candidates)
            .enumerate()
            .map(|(t, (ft, cache))| (Target::Tree(t), ft, cache))
            .chain(next_tree);
        for (target, ft, cache) in all {
            if at_budget(ft) {
                continue;
            }
            for leaf in ft.tree.leaves() {
                if let Some(Some(candidate)) = cache.get(&leaf) {
                    if best.map_or(true, |b| candidate.gain > b.candidate.gain) {
                        best = Some(BestSplit {
                            target,
                            leaf,
                            candidate: *candidate,
                        });
                    }
                }
            }
        }
        Ok(best)
    }

    fn apply(&mut self, best: BestSplit) -> Result<()> {
        let index = match best.target {
            Target::Tree(t) => t,
            Target::NextTree => {
                let t = self.forest.promote_placeholder()?;
                self.candidates.resize_with(t, LeafCandidates::new);
                self.candidates
                    .push(std::mem::take(&mut self.next_tree_candidates));
                t
            }
        };
        if let Some(cache) = self.candidates.get_mut(index) {
            cache.remove(&best.leaf);
        }
        let min_leaf_size = self.params.min_leaf_size;
        let ft = self.forest.tree_mut(index)?;
        let applied = ft.tree.apply_split(best.leaf, &best.candidate, min_leaf_size)?;
        ft.regularizer.commit(&ft.tree);
        self.optimizer
            .shift_predictions(ft.tree.points(applied.left), applied.left_delta);
        self.optimizer
            .shift_predictions(ft.tree.points(applied.right), applied.right_delta);

        self.split_count += 1;
        self.splits_since_optimization += 1;
        debug!(
            tree = index,
            node = best.leaf,
            feature = best.candidate.feature,
            threshold = best.candidate.threshold,
            gain = best.candidate.gain,
            splits = self.split_count,
            "applied split"
        );
        Ok(())
    }

    /// Read-only copy of the current forest.
    pub fn snapshot(&self) -> Ensemble {
        self.forest.to_ensemble(
            self.feature_count,
            self.params.to_string(),
            format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        )
    }

    /// Training loss and predictions at the current state.
    pub fn fit_result(&self) -> FitResult {
        let y_hat = self.optimizer.predictions().to_owned();
        FitResult {
            err: self.optimizer.training_loss(),
            residuals: &self.optimizer.targets() - &y_hat,
            y_hat,
        }
    }
}

/// Grows a forest to completion, ignoring test checkpoints.
pub fn fit<D: DataSource>(
    data: &D,
    targets: Array1<f64>,
    params: ForestParams,
) -> Result<(FitResult, Ensemble)> {
    let mut grower = ForestGrower::cold_start(data, targets, params)?;
    while grower.proceed()? != GrowthStatus::Done {}
    Ok((grower.fit_result(), grower.snapshot()))
}
