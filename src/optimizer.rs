use ndarray::{Array1, ArrayView1};
use tracing::debug;

use crate::{
    forest::Forest,
    loss::LossFunction,
    tree::{Gradients, NodeId},
    RgfError, Result,
};

#[cfg(test)]
mod tests;

/// One optimizer pass worth of settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepSettings {
    pub max_sweeps: usize,
    pub step_size: f64,
    pub step_cap: Option<f64>,
    pub lambda: f64,
    pub exit_threshold: f64,
    pub optimize_intercept: bool,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            max_sweeps: 10,
            step_size: 0.5,
            step_cap: None,
            lambda: 0.1,
            exit_threshold: 1e-3,
            optimize_intercept: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SweepReport {
    pub sweeps: usize,
    /// Largest absolute step of the last sweep.
    pub max_step: f64,
    pub loss: f64,
    pub penalty: f64,
}

/// A leaf of the forest seen as one coordinate of the weight vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LeafFeature {
    tree: usize,
    leaf: NodeId,
}

/// Coordinate descent over every leaf weight of a forest whose structure is
/// held fixed, minimizing weighted mean loss plus `lambda` times the summed
/// tree penalties.
pub struct WeightOptimizer {
    loss: Box<dyn LossFunction>,
    targets: Array1<f64>,
    /// point weight over the total point weight
    scale: Array1<f64>,
    predictions: Array1<f64>,
    leaf_features: Vec<LeafFeature>,
    weights: Vec<f64>,
    bias: f64,
}

fn normalized_weights(n: usize, point_weights: Option<&Array1<f64>>) -> Result<Array1<f64>> {
    if n == 0 {
        return Err(RgfError::Data("no training points".to_string()));
    }
    let Some(w) = point_weights else {
        return Ok(Array1::from_elem(n, 1.0 / n as f64));
    };
    if w.len() != n {
        return Err(RgfError::Data(format!(
            "{} point weights for {n} targets",
            w.len()
        )));
    }
    if w.iter().any(|&v| !(v.is_finite() && v >= 0.0)) {
        return Err(RgfError::Data("point weights must be finite and non-negative".to_string()));
    }
    let total = w.sum();
    if total <= 0.0 {
        return Err(RgfError::Data("point weights sum to zero".to_string()));
    }
    Ok(w / total)
}

impl WeightOptimizer {
    /// Empty forest state: every prediction is the starting constant, the
    /// weighted target average when `use_average` is set and zero otherwise.
    pub fn cold_start(
        loss: Box<dyn LossFunction>,
        targets: Array1<f64>,
        point_weights: Option<Array1<f64>>,
        use_average: bool,
    ) -> Result<Self> {
        let scale = normalized_weights(targets.len(), point_weights.as_ref())?;
        let bias = if use_average { scale.dot(&targets) } else { 0.0 };
        Ok(Self {
            loss,
            predictions: Array1::from_elem(targets.len(), bias),
            targets,
            scale,
            leaf_features: Vec::new(),
            weights: Vec::new(),
            bias,
        })
    }

    /// Predictions and weights taken from an existing forest.
    pub fn warm_start(
        loss: Box<dyn LossFunction>,
        targets: Array1<f64>,
        point_weights: Option<Array1<f64>>,
        forest: &Forest,
    ) -> Result<Self> {
        let scale = normalized_weights(targets.len(), point_weights.as_ref())?;
        let mut predictions = Array1::from_elem(targets.len(), forest.bias());
        for ft in forest.trees() {
            for (id, node) in ft.tree.nodes().iter().enumerate() {
                if node.weight != 0.0 {
                    for &p in ft.tree.points(id) {
                        predictions[p] += node.weight;
                    }
                }
            }
        }
        let mut optimizer = Self {
            loss,
            targets,
            scale,
            predictions,
            leaf_features: Vec::new(),
            weights: Vec::new(),
            bias: forest.bias(),
        };
        optimizer.synchronize(forest);
        Ok(optimizer)
    }

    /// Starting constant chosen by [`cold_start`](Self::cold_start).
    pub fn bias(&self) -> f64 {
        self.bias
    }

    pub fn predictions(&self) -> ArrayView1<f64> {
        self.predictions.view()
    }

    pub fn targets(&self) -> ArrayView1<f64> {
        self.targets.view()
    }

    pub fn leaf_feature_count(&self) -> usize {
        self.leaf_features.len()
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Moves the prediction of `points` by `delta`.
    pub fn shift_predictions(&mut self, points: &[usize], delta: f64) {
        for &p in points {
            self.predictions[p] += delta;
        }
    }

    pub fn gradients(&self) -> Gradients {
        Gradients::compute(
            self.loss.as_ref(),
            self.predictions.view(),
            self.targets.view(),
            Some(self.scale.view()),
        )
    }

    /// Weighted mean loss at the current predictions.
    pub fn training_loss(&self) -> f64 {
        self.predictions
            .iter()
            .zip(&self.targets)
            .zip(&self.scale)
            .map(|((&p, &y), &s)| s * self.loss.eval(p, y).loss)
            .sum()
    }

    /// Re-reads the leaf list and weights after the forest's structure
    /// changed.
    pub fn synchronize(&mut self, forest: &Forest) {
        self.leaf_features.clear();
        self.weights.clear();
        for (t, ft) in forest.trees().iter().enumerate() {
            for leaf in ft.tree.leaves() {
                self.leaf_features.push(LeafFeature { tree: t, leaf });
                self.weights.push(ft.tree.nodes()[leaf].weight);
            }
        }
    }

    /// The leaf list and weights read by the last `synchronize` must still
    /// describe `forest`.
    fn check_consistency(&self, forest: &Forest) -> Result<()> {
        if forest.leaf_count() != self.leaf_features.len() {
            return Err(RgfError::Consistency(format!(
                "forest has {} leaves, optimizer knows {}",
                forest.leaf_count(),
                self.leaf_features.len()
            )));
        }
        for (f, &w) in self.leaf_features.iter().zip(&self.weights) {
            let node = forest
                .trees()
                .get(f.tree)
                .map(|ft| ft.tree.node(f.leaf))
                .transpose()?
                .filter(|n| n.is_leaf())
                .ok_or_else(|| {
                    RgfError::Consistency(format!("tree {} has no leaf {}", f.tree, f.leaf))
                })?;
            if node.weight.to_bits() != w.to_bits() {
                return Err(RgfError::Consistency(format!(
                    "leaf {} of tree {} moved from {w} to {} since the last synchronize",
                    f.leaf, f.tree, node.weight
                )));
            }
        }
        if self.predictions.len() != self.targets.len() {
            return Err(RgfError::Consistency(format!(
                "{} predictions for {} points",
                self.predictions.len(),
                self.targets.len()
            )));
        }
        Ok(())
    }

    /// Runs up to `settings.max_sweeps` sweeps over every leaf of every tree.
    /// Each coordinate takes a damped Newton step on loss plus penalty and
    /// the predictions of the leaf's points follow it.
    pub fn iterate(&mut self, forest: &mut Forest, settings: &SweepSettings) -> Result<SweepReport> {
        if forest.trees().is_empty() {
            return Ok(SweepReport {
                loss: self.training_loss(),
                ..SweepReport::default()
            });
        }
        self.check_consistency(forest)?;

        let lambda = settings.lambda;
        let cap = settings.step_cap.or_else(|| self.loss.default_step_cap());
        let clamp = |step: f64| cap.map_or(step, |c| step.clamp(-c, c));

        let mut report = SweepReport::default();
        for sweep in 0..settings.max_sweeps {
            let mut max_step: f64 = 0.0;
            let trees = forest.trees_mut();
            for ft in trees.iter_mut() {
                ft.regularizer.reset(&ft.tree);
            }
            for (&LeafFeature { tree, leaf }, weight) in
                self.leaf_features.iter().zip(self.weights.iter_mut())
            {
                let ft = &mut trees[tree];
                let (mut g, mut h) = (0.0, 0.0);
                for &p in ft.tree.points(leaf) {
                    let e = self.loss.eval(self.predictions[p], self.targets[p]);
                    g += self.scale[p] * e.gradient;
                    h += self.scale[p] * e.hessian;
                }
                let r = ft.regularizer.leaf_derivatives(&ft.tree, leaf)?;
                let denom = h + lambda * r.hessian;
                if denom <= 0.0 {
                    continue;
                }
                let step = clamp(-settings.step_size * (g + lambda * r.gradient) / denom);
                if step == 0.0 || !step.is_finite() {
                    continue;
                }
                *weight += step;
                ft.tree.set_leaf_weight(leaf, *weight)?;
                ft.regularizer.update_weight(&ft.tree, leaf, step)?;
                for &p in ft.tree.points(leaf) {
                    self.predictions[p] += step;
                }
                max_step = max_step.max(step.abs());
            }

            if settings.optimize_intercept {
                let step = clamp(self.intercept_step(settings.step_size));
                if step != 0.0 && step.is_finite() {
                    forest.set_bias(forest.bias() + step);
                    self.predictions += step;
                    max_step = max_step.max(step.abs());
                }
            }

            report.sweeps = sweep + 1;
            report.max_step = max_step;
            debug!(sweep, max_step, "optimizer sweep");
            if max_step < settings.exit_threshold {
                break;
            }
        }

        report.loss = self.training_loss();
        report.penalty = forest.trees().iter().map(|ft| ft.regularizer.penalty()).sum();
        Ok(report)
    }

    fn intercept_step(&self, step_size: f64) -> f64 {
        let (mut g, mut h) = (0.0, 0.0);
        for ((&p, &y), &s) in self.predictions.iter().zip(&self.targets).zip(&self.scale) {
            let e = self.loss.eval(p, y);
            g += s * e.gradient;
            h += s * e.hessian;
        }
        if h > 0.0 {
            -step_size * g / h
        } else {
            0.0
        }
    }
}
