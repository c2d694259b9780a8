//! Error and diagnostic types

/// Result type used throughout the codec.
pub type Result<T> = std::result::Result<T, AclError>;

/// Errors that abort compression or decompression.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AclError {
    /// Raw input is inconsistent (frame counts disagree, skeleton binding missing,
    /// hierarchy not topologically sorted, non-finite samples)
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// Settings or bit rates that make no sense (threshold <= 0, rate > 32, ...)
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Compressed stream failed validation (magic, version, hash, bounds)
    #[error("corrupt stream: {0}")]
    CorruptStream(String),
}

impl AclError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedInput(msg.into())
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        Self::CorruptStream(msg.into())
    }
}

/// Why the compression driver reported a convergence problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ConvergenceReason {
    /// Iteration cap reached before every track settled; rates were frozen
    IterationCap,
    /// Full precision plus constant/default substitution already exceeds the threshold
    ThresholdUnreachable,
    /// Measured error of the final clip exceeds the threshold (after any fallback)
    ThresholdExceeded,
}

/// Non-fatal diagnostic: the clip is usable but the search did not finish cleanly.
///
/// Carries the worst observed error so callers know by how much the bound is missed.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize, thiserror::Error)]
#[error(
    "{reason:?}: worst error {error:.6} on bone {bone_index} at {sample_time:.3}s (threshold {threshold})"
)]
pub struct ConvergenceWarning {
    pub reason: ConvergenceReason,
    /// Worst object-space error observed
    pub error: f32,
    /// Bone where the worst error was observed
    pub bone_index: usize,
    /// Sample time (seconds) of the worst error
    pub sample_time: f32,
    /// Threshold that was requested
    pub threshold: f32,
}

impl ConvergenceWarning {
    /// Amount by which the threshold is exceeded (0 if it is met)
    pub fn excess(&self) -> f32 {
        (self.error - self.threshold).max(0.0)
    }
}
