//! Typed error kinds for the engine/tree boundary (see the error handling
//! section of the design). Call sites branch on the kind, so this is a
//! `thiserror` enum rather than an `anyhow::Error` chain: recoverable kinds
//! are caught and absorbed at the engine loop, fatal kinds propagate to the
//! supervisor.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("exemplar dimensionality {got} does not match expected {expected}")]
    ContractViolation { expected: usize, got: usize },

    #[error("internal expert {id} has only one child populated")]
    TreeCorruption { id: u64 },

    #[error("input refresh for {device} timed out after {timeout_secs}s")]
    TransportTimeout { device: String, timeout_secs: f64 },

    #[error("transport reported stale state for {device}")]
    StaleSample { device: String },

    #[error("regressor rejected training buffer: {reason}")]
    RegressionFailure { reason: String },
}

impl EngineError {
    /// Whether the engine loop should absorb this error and continue (log +
    /// reuse previous state), as opposed to propagating it to the supervisor
    /// as fatal.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::TransportTimeout { .. }
                | EngineError::StaleSample { .. }
                | EngineError::RegressionFailure { .. }
        )
    }
}
