//! Custom error types for the orchestrator.
//!
//! This module defines the primary error type, `RigError`, for the entire crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to
//! handle the rejection taxonomy of the test session orchestrator.
//!
//! ## Error Hierarchy
//!
//! `RigError` is an enum that consolidates the typed rejections of the session
//! state machine:
//!
//! - **`AlreadyPending`**: a second `begin_test` for an item whose confirmation
//!   is still in flight. Rejected with no state change.
//! - **`NotAwaiting`**: a manual verdict for an item whose test was never
//!   started this run. Guards against stray operator input.
//! - **`SessionLocked`**: manual navigation away from the active category while
//!   a run is in progress, or a second `start_test` without a reset between.
//! - **`SessionNotRunning`**: starting a test item outside an active run.
//! - **`Config`**: wraps errors from configuration loading and validation.
//!
//! Collaborator failures never surface as errors of this type: a failed
//! command dispatch is tolerated (the attempt stays open for the operator)
//! and a failed condition query resolves fail-closed as Abnormal.
//!
//! No condition here is fatal to the process; the worst case is a stuck
//! Awaiting item, which a session reset always clears.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, RigError>;

/// The crate-wide error type.
#[derive(Error, Debug)]
pub enum RigError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Invalid test plan: {0}")]
    InvalidPlan(String),

    #[error("A confirmation is already pending for item '{0}'")]
    AlreadyPending(String),

    #[error("Item '{0}' is not awaiting a verdict")]
    NotAwaiting(String),

    #[error("A manual verdict must be Normal or Abnormal")]
    InvalidVerdict,

    #[error("Test session is running; navigation is locked")]
    SessionLocked,

    #[error("No test session is running")]
    SessionNotRunning,

    #[error("Unknown category '{0}'")]
    UnknownCategory(String),

    #[error("Unknown item '{item}' in category '{category}'")]
    UnknownItem { category: String, item: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RigError::AlreadyPending("front_light".to_string());
        assert_eq!(
            err.to_string(),
            "A confirmation is already pending for item 'front_light'"
        );
    }

    #[test]
    fn test_unknown_item_display() {
        let err = RigError::UnknownItem {
            category: "light".into(),
            item: "side".into(),
        };
        assert!(err.to_string().contains("side"));
        assert!(err.to_string().contains("light"));
    }
}
