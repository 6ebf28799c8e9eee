//! Error types for quorum-core

use thiserror::Error;

/// Core orchestration error type
#[derive(Debug, Error)]
pub enum Error {
    /// Routing exhausted: surfaced to the host, never auto-retried
    #[error(transparent)]
    Llm(#[from] quorum_llm::Error),

    /// The request was rejected before routing
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// One-shot or queued execution exceeded the wall-clock deadline
    #[error("task timed out after {0}s")]
    TaskTimeout(u64),

    /// A queued task finished in the failed state
    #[error("task failed: {0}")]
    TaskFailed(String),

    /// Execution or session was cancelled by the caller
    #[error("cancelled")]
    Cancelled,

    /// No valid personas were selected for a consensus session
    #[error("no valid expert personas selected")]
    NoPersonas,

    /// Every persona failed to produce an insight; no safe fallback exists
    #[error("all expert personas failed, no insights collected")]
    AllPersonasFailed,

    /// The security audit blocked the consensus; terminal and non-retryable
    #[error("security block: {}", threats.join(", "))]
    SecurityBlock {
        /// Threats the audit identified
        threats: Vec<String>,
    },

    /// The consensus session ended without producing a result
    #[error("session ended unexpectedly: {0}")]
    SessionAborted(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
