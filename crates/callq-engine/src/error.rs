use thiserror::Error;

/// Error types for call distribution operations
///
/// Covers the failure modes of queueing, agent management and dispatch.
/// Call-level failures (`Timeout`, `Abandoned`) are delivered through the
/// call's own answer future; bookkeeping failures (`NotFound`,
/// `InvariantViolation`) are returned from the management operations that
/// caused them and never affect unrelated calls or agents.
///
/// # Examples
///
/// ```
/// use callq_engine::{AcdError, Result};
///
/// fn bind_agent() -> Result<()> {
///     Err(AcdError::not_found("fifo 'support' does not exist in domain 'example.com'"))
/// }
///
/// match bind_agent() {
///     Ok(_) => println!("agent bound"),
///     Err(AcdError::NotFound(msg)) => println!("bind failed: {}", msg),
///     Err(e) => println!("other error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum AcdError {
    /// A referenced domain, fifo or agent does not exist where the
    /// operation requires it to.
    ///
    /// `queue()` never produces this: enqueueing creates missing
    /// domains/fifos lazily by design. `addagent()` on a fifo that was
    /// never created does.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A queued call exceeded its configured wait and was evicted from
    /// the queue unanswered. Delivered through the call's answer future;
    /// the call is not retried.
    #[error("Call timed out in queue: {0}")]
    Timeout(String),

    /// The caller hung up while the call was still waiting. Delivered
    /// through the call's answer future.
    #[error("Call abandoned by caller: {0}")]
    Abandoned(String),

    /// An agent declined or failed to answer an offered call. Internal:
    /// drives re-queueing and rotation, never surfaced to the caller.
    #[error("Offer rejected: {0}")]
    Rejected(String),

    /// Internal consistency violation, e.g. a fifo-level bind failure
    /// during `addagent` after the agent record was already created.
    /// Triggers rollback of the tentative record and is always logged.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Configuration validation failure.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The distribution manager has shut down; the operation cannot
    /// complete and pending answer futures resolve with this error
    /// instead of hanging.
    #[error("Manager shut down")]
    Shutdown,
}

impl AcdError {
    /// Create a new `NotFound` error with the provided message.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new `Timeout` error with the provided message.
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a new `Abandoned` error with the provided message.
    pub fn abandoned<S: Into<String>>(msg: S) -> Self {
        Self::Abandoned(msg.into())
    }

    /// Create a new `Rejected` error with the provided message.
    pub fn rejected<S: Into<String>>(msg: S) -> Self {
        Self::Rejected(msg.into())
    }

    /// Create a new `InvariantViolation` error with the provided message.
    pub fn invariant<S: Into<String>>(msg: S) -> Self {
        Self::InvariantViolation(msg.into())
    }

    /// Create a new `Configuration` error with the provided message.
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
}

/// Result type for call distribution operations
///
/// Type alias for `std::result::Result<T, AcdError>` used throughout the
/// engine.
pub type Result<T> = std::result::Result<T, AcdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructor_helpers_build_matching_variants() {
        assert!(matches!(AcdError::not_found("x"), AcdError::NotFound(_)));
        assert!(matches!(AcdError::timeout("x"), AcdError::Timeout(_)));
        assert!(matches!(AcdError::abandoned("x"), AcdError::Abandoned(_)));
        assert!(matches!(AcdError::rejected("x"), AcdError::Rejected(_)));
        assert!(matches!(AcdError::invariant("x"), AcdError::InvariantViolation(_)));
        assert!(matches!(AcdError::configuration("x"), AcdError::Configuration(_)));
    }

    #[test]
    fn display_includes_message() {
        let err = AcdError::not_found("fifo 'sales' in domain 'example.com'");
        assert_eq!(err.to_string(), "Not found: fifo 'sales' in domain 'example.com'");
    }
}
