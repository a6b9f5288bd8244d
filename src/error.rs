use thiserror::Error;

/// Fatal error kinds for the diagnosis engine.
///
/// Non-fatal outcomes are values, not errors: a calibration that hits the
/// iteration cap is returned with `converged: false`, a learner without
/// usable responses gets an undetermined profile, and an exhausted item
/// pool makes selection return `None`.
#[derive(Debug, Error)]
pub enum CdmError {
    #[error("invalid q-matrix: {0}")]
    InvalidQMatrix(String),
    #[error("attribute space too large: k={k} exceeds supported maximum {max}")]
    AttributeSpaceTooLarge { k: usize, max: usize },
    #[error("invalid response matrix: {0}")]
    InvalidResponseMatrix(String),
    #[error("invalid item parameters: {0}")]
    InvalidItemParameters(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
