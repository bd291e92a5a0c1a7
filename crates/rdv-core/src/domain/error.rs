//! Error taxonomy for rendezvous evaluation.
//!
//! Only [`EvalError::Config`] is fatal to a session; every other variant is
//! scoped to a single pair or trajectory and is logged, not propagated.

use std::path::PathBuf;
use std::time::Duration;

/// Transport or API failure while talking to the model endpoint.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("model request failed (status {status:?}): {message}")]
pub struct RequestError {
    /// HTTP status, if a response was received at all.
    pub status: Option<u16>,

    /// Human-readable failure description.
    pub message: String,

    /// Server-provided wait hint (HTTP 429 bodies).
    pub retry_after: Option<Duration>,
}

impl RequestError {
    /// Failure before any HTTP status was observed.
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Failure carrying an HTTP status code.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
            retry_after: None,
        }
    }

    /// Attach a server-provided retry hint.
    pub fn with_retry_after(mut self, wait: Duration) -> Self {
        self.retry_after = Some(wait);
        self
    }

    /// Whether the endpoint signalled rate limiting.
    pub fn is_rate_limited(&self) -> bool {
        self.status == Some(429)
    }
}

/// Model reply could not be mapped onto the discrete action vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("no JSON object found in model response")]
    NoJson,

    #[error("malformed JSON in model response: {0}")]
    Json(String),

    #[error("model response missing field: {0}")]
    MissingField(&'static str),

    #[error("unknown action: {0:?}")]
    UnknownAction(String),
}

/// Evaluation errors.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("trajectory {trajectory} has no ground truth at {path:?}")]
    MissingGroundTruth { trajectory: u32, path: PathBuf },

    #[error("invalid ground truth for trajectory {trajectory}: {reason}")]
    InvalidGroundTruth { trajectory: u32, reason: String },

    #[error("invalid trajectory {trajectory}: {reason}")]
    InvalidTrajectory { trajectory: u32, reason: String },

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("merge invariant violated for trajectory {trajectory}: {detail}")]
    MergeInvariantViolation { trajectory: u32, detail: String },

    #[error("image resolution failed: {0}")]
    Image(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EvalError {
    /// Configuration-level failures abort the session; everything else is
    /// isolated to the pair or trajectory that produced it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EvalError::Config(_))
    }
}

/// Result type for evaluation operations.
pub type Result<T> = std::result::Result<T, EvalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_config_errors_are_fatal() {
        assert!(EvalError::Config("bad path".into()).is_fatal());
        assert!(!EvalError::MissingGroundTruth {
            trajectory: 2,
            path: PathBuf::from("textdata/traj2/answer.json"),
        }
        .is_fatal());
        assert!(!EvalError::Request(RequestError::transport("reset")).is_fatal());
        assert!(!EvalError::Parse(ParseError::NoJson).is_fatal());
        assert!(!EvalError::MergeInvariantViolation {
            trajectory: 0,
            detail: "x".into(),
        }
        .is_fatal());
    }

    #[test]
    fn test_request_error_display_and_rate_limit() {
        let err = RequestError::http(429, "slow down").with_retry_after(Duration::from_secs(3));
        assert!(err.is_rate_limited());
        assert_eq!(err.retry_after, Some(Duration::from_secs(3)));
        assert!(err.to_string().contains("slow down"));
        assert!(!RequestError::transport("dns").is_rate_limited());
    }

    #[test]
    fn test_missing_ground_truth_mentions_trajectory() {
        let err = EvalError::MissingGroundTruth {
            trajectory: 7,
            path: PathBuf::from("/data/traj7/answer.json"),
        };
        let msg = err.to_string();
        assert!(msg.contains("trajectory 7"));
        assert!(msg.contains("answer.json"));
    }
}
