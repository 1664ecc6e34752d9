use std::{fmt, str::FromStr};

use crate::RgfError;

/// Loss value with its first and second derivative in the prediction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossEval {
    pub loss: f64,
    pub gradient: f64,
    pub hessian: f64,
}

pub trait LossFunction: Send + Sync {
    fn eval(&self, prediction: f64, target: f64) -> LossEval;

    /// Default step cap for the weight optimizer when none is configured.
    fn default_step_cap(&self) -> Option<f64> {
        None
    }
}

/// `(p - y)^2 / 2`
#[derive(Debug, Clone, Copy, Default)]
pub struct SquaredLoss;

impl LossFunction for SquaredLoss {
    #[inline]
    fn eval(&self, prediction: f64, target: f64) -> LossEval {
        let r = prediction - target;
        LossEval {
            loss: 0.5 * r * r,
            gradient: r,
            hessian: 1.0,
        }
    }
}

/// `ln(1 + exp(-y p))` with `y = 1` for positive targets and `-1` otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogisticLoss;

impl LossFunction for LogisticLoss {
    #[inline]
    fn eval(&self, prediction: f64, target: f64) -> LossEval {
        let y = if target > 0.0 { 1.0 } else { -1.0 };
        let margin = y * prediction;
        // stable ln(1 + e^-m)
        let loss = if margin > 0.0 {
            (-margin).exp().ln_1p()
        } else {
            -margin + margin.exp().ln_1p()
        };
        let sigma = 1.0 / (1.0 + margin.exp());
        LossEval {
            loss,
            gradient: -y * sigma,
            hessian: sigma * (1.0 - sigma),
        }
    }

    fn default_step_cap(&self) -> Option<f64> {
        Some(1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LossKind {
    #[default]
    Squared,
    Logistic,
}

impl LossKind {
    pub fn function(self) -> Box<dyn LossFunction> {
        match self {
            LossKind::Squared => Box::new(SquaredLoss),
            LossKind::Logistic => Box::new(LogisticLoss),
        }
    }
}

impl fmt::Display for LossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LossKind::Squared => "squared",
            LossKind::Logistic => "logistic",
        })
    }
}

impl FromStr for LossKind {
    type Err = RgfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "squared" | "ls" => Ok(LossKind::Squared),
            "logistic" | "log" => Ok(LossKind::Logistic),
            other => Err(RgfError::Configuration(format!("unknown loss kind {other:?}"))),
        }
    }
}
