//! Error taxonomy for the delegation core.
//!
//! Every variant carries the stable `code()` string from the error taxonomy
//! so that callers (an HTTP layer, a CLI) can surface it as a typed API
//! error without re-deriving a code from the message text.

/// Result type for delegation core operations.
pub type Result<T> = std::result::Result<T, DelegationError>;

/// Error types for the delegation core.
#[derive(Debug, thiserror::Error)]
pub enum DelegationError {
    /// A plan failed to compile into a DAG (see `plan::compile`).
    #[error("delegation plan invalid: {detail}")]
    DelegationPlanInvalid { detail: String },

    /// A structurally valid plan violated a semantic rule downstream
    /// (e.g. colocation parameters, record-type mismatch).
    #[error("validation error: {0}")]
    ValidationError(String),

    /// The active strategy is not in a state the requested operation expects.
    #[error("invalid strategy: {0}")]
    InvalidStrategy(String),

    /// A referenced resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A combine node could not resolve one or more of its inputs to a
    /// created step.
    #[error("missing combine inputs: {0:?}")]
    MissingCombineInputs(Vec<String>),

    /// A combine tool invocation returned a failure response.
    #[error("combine failed: {0}")]
    CombineFailed(String),

    /// A task node exhausted its attempts without creating any steps.
    #[error("no steps created for task {0}")]
    NoStepsCreated(String),

    /// A sub-agent invocation panicked or returned an unexpected error.
    #[error("sub-task failed: {0}")]
    SubkaniFailed(String),

    /// The upstream WDK query service returned an error.
    #[error("WDK error: {0}")]
    WdkError(String),

    /// Caller lacks authorization.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Caller is authenticated but forbidden from this operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Caller exceeded a rate limit.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unexpected internal invariant failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DelegationError {
    /// The stable, machine-readable error code for this variant.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DelegationPlanInvalid { .. } => "DELEGATION_PLAN_INVALID",
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::InvalidStrategy(_) => "INVALID_STRATEGY",
            Self::NotFound(_) => "NOT_FOUND",
            Self::MissingCombineInputs(_) => "MISSING_COMBINE_INPUTS",
            Self::CombineFailed(_) => "COMBINE_FAILED",
            Self::NoStepsCreated(_) => "NO_STEPS_CREATED",
            Self::SubkaniFailed(_) => "SUBKANI_FAILED",
            Self::WdkError(_) => "WDK_ERROR",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::RateLimited(_) => "RATE_LIMITED",
            Self::Serialization(_) | Self::Io(_) | Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Build a `DELEGATION_PLAN_INVALID` error, logging at the point of
    /// construction per the crate's boundary-logging convention.
    pub fn plan_invalid(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        tracing::warn!(code = "DELEGATION_PLAN_INVALID", detail = %detail, "plan compilation rejected");
        Self::DelegationPlanInvalid { detail }
    }
}

impl From<String> for DelegationError {
    fn from(s: String) -> Self {
        DelegationError::Internal(s)
    }
}

impl From<&str> for DelegationError {
    fn from(s: &str) -> Self {
        DelegationError::Internal(s.to_string())
    }
}

impl From<anyhow::Error> for DelegationError {
    fn from(err: anyhow::Error) -> Self {
        DelegationError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_matches_taxonomy() {
        assert_eq!(
            DelegationError::plan_invalid("cycle detected in delegation graph").code(),
            "DELEGATION_PLAN_INVALID"
        );
        assert_eq!(
            DelegationError::CombineFailed("x".into()).code(),
            "COMBINE_FAILED"
        );
        assert_eq!(DelegationError::from("oops").code(), "INTERNAL_ERROR");
    }
}
