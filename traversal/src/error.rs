//! Errors raised while configuring or pulling from steps.

use thiserror::Error;

/// Step result type.
pub type Result<T> = std::result::Result<T, StepError>;

/// Step errors.
///
/// Exhaustion is never an error: `next` returns `Ok(None)` for that.
#[derive(Debug, Error)]
pub enum StepError {
    /// Pulled from a repeat step before its loop body was attached.
    #[error("{step}: no loop body attached")]
    LoopBodyNotAttached { step: String },

    /// The loop body of a repeat step is immutable once assigned.
    #[error("{step}: loop body already attached")]
    LoopBodyAlreadyAttached { step: String },

    /// Steps were added after the pipeline's end step was resolved.
    #[error("pipeline {pipeline} is already linked")]
    PipelineLinked { pipeline: String },

    /// Failure raised by a predicate or user-supplied step logic.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl StepError {
    /// True for misconfiguration, as opposed to failures raised mid-pull.
    pub fn is_configuration(&self) -> bool {
        !matches!(self, StepError::Failed(_))
    }
}
