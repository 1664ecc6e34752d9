use std::{fmt, str::FromStr};

use crate::{
    loss::LossKind,
    optimizer::SweepSettings,
    regularizer::{DepthDiscount, RegularizerKind},
    tree::SplitConstraints,
    RgfError, Result,
};

#[derive(Debug, Clone, PartialEq)]
pub struct ForestParams {
    pub loss: LossKind,
    pub regularizer: RegularizerKind,
    /// Penalty weight in the weight optimizer.
    pub lambda: f64,
    /// Penalty weight during split search; `lambda` when unset.
    pub search_lambda: Option<f64>,
    /// Penalty coefficient growth per depth level, `>= 1`.
    pub depth_factor: f64,
    pub min_leaf_size: usize,
    pub max_depth: Option<usize>,
    pub max_leaves_per_tree: Option<usize>,
    /// Leaf budget of the whole forest. Growth stops once the trees hold
    /// this many leaves; the last split may overshoot it by one.
    pub max_leaves: usize,
    pub max_trees: Option<usize>,
    pub optimize_interval: usize,
    pub test_interval: Option<usize>,
    pub optimizer_sweeps: usize,
    pub step_size: f64,
    /// Per-step bound on a weight change; the loss's default when unset.
    pub step_cap: Option<f64>,
    pub exit_threshold: f64,
    pub use_average: bool,
    pub optimize_intercept: bool,
}

impl Default for ForestParams {
    fn default() -> Self {
        ForestParamsBuilder::new().build_unchecked()
    }
}

impl ForestParams {
    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(RgfError::Configuration(msg));
        let non_negative = |name: &str, v: f64| -> Result<()> {
            if v.is_finite() && v >= 0.0 {
                Ok(())
            } else {
                bad(format!("{name} must be a finite non-negative number, got {v}"))
            }
        };
        let positive = |name: &str, v: f64| -> Result<()> {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                bad(format!("{name} must be a finite positive number, got {v}"))
            }
        };

        non_negative("lambda", self.lambda)?;
        if let Some(l) = self.search_lambda {
            non_negative("search_lambda", l)?;
        }
        DepthDiscount::from_factor(self.depth_factor)?;
        positive("step_size", self.step_size)?;
        if let Some(c) = self.step_cap {
            positive("step_cap", c)?;
        }
        non_negative("exit_threshold", self.exit_threshold)?;

        if self.min_leaf_size == 0 {
            return bad("min_leaf_size must be at least 1".to_string());
        }
        if self.max_leaves == 0 {
            return bad("max_leaves must be at least 1".to_string());
        }
        if self.optimize_interval == 0 {
            return bad("optimize_interval must be at least 1".to_string());
        }
        if self.test_interval == Some(0) {
            return bad("test_interval must be at least 1".to_string());
        }
        if self.max_depth == Some(0) {
            return bad("max_depth must be at least 1".to_string());
        }
        if self.max_trees == Some(0) {
            return bad("max_trees must be at least 1".to_string());
        }
        if self.max_leaves_per_tree.is_some_and(|m| m < 2) {
            return bad("max_leaves_per_tree must be at least 2".to_string());
        }
        Ok(())
    }

    pub fn discount(&self) -> Result<DepthDiscount> {
        DepthDiscount::from_factor(self.depth_factor)
    }

    pub fn search_lambda(&self) -> f64 {
        self.search_lambda.unwrap_or(self.lambda)
    }

    pub fn split_constraints(&self) -> SplitConstraints {
        SplitConstraints {
            min_leaf_size: self.min_leaf_size,
            max_depth: self.max_depth,
            max_leaves: self.max_leaves_per_tree,
        }
    }

    pub fn sweep_settings(&self) -> SweepSettings {
        SweepSettings {
            max_sweeps: self.optimizer_sweeps,
            step_size: self.step_size,
            step_cap: self.step_cap,
            lambda: self.lambda,
            exit_threshold: self.exit_threshold,
            optimize_intercept: self.optimize_intercept,
        }
    }
}

/// `key=value` pairs joined by commas; unset options are omitted.
impl fmt::Display for ForestParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "loss={},regularizer={},lambda={},depth_factor={},min_leaf_size={},max_leaves={},\
             optimize_interval={},optimizer_sweeps={},step_size={},exit_threshold={},\
             use_average={},optimize_intercept={}",
            self.loss,
            self.regularizer,
            self.lambda,
            self.depth_factor,
            self.min_leaf_size,
            self.max_leaves,
            self.optimize_interval,
            self.optimizer_sweeps,
            self.step_size,
            self.exit_threshold,
            self.use_average,
            self.optimize_intercept,
        )?;
        if let Some(v) = self.search_lambda {
            write!(f, ",search_lambda={v}")?;
        }
        if let Some(v) = self.max_depth {
            write!(f, ",max_depth={v}")?;
        }
        if let Some(v) = self.max_leaves_per_tree {
            write!(f, ",max_leaves_per_tree={v}")?;
        }
        if let Some(v) = self.max_trees {
            write!(f, ",max_trees={v}")?;
        }
        if let Some(v) = self.test_interval {
            write!(f, ",test_interval={v}")?;
        }
        if let Some(v) = self.step_cap {
            write!(f, ",step_cap={v}")?;
        }
        Ok(())
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| RgfError::Configuration(format!("bad value {value:?} for {key}")))
}

impl FromStr for ForestParams {
    type Err = RgfError;

    /// Starts from the defaults and overrides every listed key.
    fn from_str(s: &str) -> Result<Self> {
        let mut p = ForestParamsBuilder::new().build_unchecked();
        for item in s.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            let (key, value) = item
                .split_once('=')
                .ok_or_else(|| RgfError::Configuration(format!("expected key=value, got {item:?}")))?;
            let (key, value) = (key.trim(), value.trim());
            match key {
                "loss" => p.loss = value.parse()?,
                "regularizer" => p.regularizer = value.parse()?,
                "lambda" => p.lambda = parse_value(key, value)?,
                "search_lambda" => p.search_lambda = Some(parse_value(key, value)?),
                "depth_factor" => p.depth_factor = parse_value(key, value)?,
                "min_leaf_size" => p.min_leaf_size = parse_value(key, value)?,
                "max_depth" => p.max_depth = Some(parse_value(key, value)?),
                "max_leaves_per_tree" => p.max_leaves_per_tree = Some(parse_value(key, value)?),
                "max_leaves" => p.max_leaves = parse_value(key, value)?,
                "max_trees" => p.max_trees = Some(parse_value(key, value)?),
                "optimize_interval" => p.optimize_interval = parse_value(key, value)?,
                "test_interval" => p.test_interval = Some(parse_value(key, value)?),
                "optimizer_sweeps" => p.optimizer_sweeps = parse_value(key, value)?,
                "step_size" => p.step_size = parse_value(key, value)?,
                "step_cap" => p.step_cap = Some(parse_value(key, value)?),
                "exit_threshold" => p.exit_threshold = parse_value(key, value)?,
                "use_average" => p.use_average = parse_value(key, value)?,
                "optimize_intercept" => p.optimize_intercept = parse_value(key, value)?,
                other => {
                    return Err(RgfError::Configuration(format!("unknown parameter {other:?}")))
                }
            }
        }
        p.validate()?;
        Ok(p)
    }
}

pub struct ForestParamsBuilder {
    params: ForestParams,
}

impl ForestParamsBuilder {
    pub fn new() -> Self {
        Self {
            params: ForestParams {
                loss: LossKind::Squared,
                regularizer: RegularizerKind::TreeStructured,
                lambda: 0.1,
                search_lambda: None,
                depth_factor: 1.0,
                min_leaf_size: 10,
                max_depth: None,
                max_leaves_per_tree: None,
                max_leaves: 500,
                max_trees: None,
                optimize_interval: 100,
                test_interval: None,
                optimizer_sweeps: 10,
                step_size: 0.5,
                step_cap: None,
                exit_threshold: 1e-3,
                use_average: false,
                optimize_intercept: false,
            },
        }
    }

    pub fn loss(mut self, loss: LossKind) -> Self {
        self.params.loss = loss;
        self
    }

    pub fn regularizer(mut self, regularizer: RegularizerKind) -> Self {
        self.params.regularizer = regularizer;
        self
    }

    pub fn lambda(mut self, lambda: f64) -> Self {
        self.params.lambda = lambda;
        self
    }

    pub fn search_lambda(mut self, search_lambda: f64) -> Self {
        self.params.search_lambda = Some(search_lambda);
        self
    }

    pub fn depth_factor(mut self, depth_factor: f64) -> Self {
        self.params.depth_factor = depth_factor;
        self
    }

    pub fn min_leaf_size(mut self, min_leaf_size: usize) -> Self {
        self.params.min_leaf_size = min_leaf_size;
        self
    }

    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.params.max_depth = Some(max_depth);
        self
    }

    pub fn max_leaves_per_tree(mut self, max_leaves_per_tree: usize) -> Self {
        self.params.max_leaves_per_tree = Some(max_leaves_per_tree);
        self
    }

    pub fn max_leaves(mut self, max_leaves: usize) -> Self {
        self.params.max_leaves = max_leaves;
        self
    }

    pub fn max_trees(mut self, max_trees: usize) -> Self {
        self.params.max_trees = Some(max_trees);
        self
    }

    pub fn optimize_interval(mut self, optimize_interval: usize) -> Self {
        self.params.optimize_interval = optimize_interval;
        self
    }

    pub fn test_interval(mut self, test_interval: usize) -> Self {
        self.params.test_interval = Some(test_interval);
        self
    }

    pub fn optimizer_sweeps(mut self, optimizer_sweeps: usize) -> Self {
        self.params.optimizer_sweeps = optimizer_sweeps;
        self
    }

    pub fn step_size(mut self, step_size: f64) -> Self {
        self.params.step_size = step_size;
        self
    }

    pub fn step_cap(mut self, step_cap: f64) -> Self {
        self.params.step_cap = Some(step_cap);
        self
    }

    pub fn exit_threshold(mut self, exit_threshold: f64) -> Self {
        self.params.exit_threshold = exit_threshold;
        self
    }

    pub fn use_average(mut self, use_average: bool) -> Self {
        self.params.use_average = use_average;
        self
    }

    pub fn optimize_intercept(mut self, optimize_intercept: bool) -> Self {
        self.params.optimize_intercept = optimize_intercept;
        self
    }

    fn build_unchecked(self) -> ForestParams {
        self.params
    }

    pub fn build(self) -> Result<ForestParams> {
        self.params.validate()?;
        Ok(self.params)
    }
}

impl Default for ForestParamsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
