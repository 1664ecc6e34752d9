use thiserror::Error;

/// Errors surfaced by the forest trainer.
#[derive(Debug, Error)]
pub enum RgfError {
    /// Invalid hyperparameters; raised before any training state exists.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// An internal invariant was violated; training state can not be trusted.
    #[error("consistency error: {0}")]
    Consistency(String),
    /// Features, targets or a prior model do not fit together.
    #[error("data error: {0}")]
    Data(String),
    #[error("feature {feature} out of range (feature count {count})")]
    FeatureOutOfRange { feature: usize, count: usize },
    /// Malformed model file.
    #[error("model format error: {0}")]
    Format(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, RgfError>;
