//! Shared error type across praetor crates.

use std::fmt;

use thiserror::Error;

/// Stable error codes (diagnostics only, never an allow/deny signal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Malformed expression.
    Parse,
    /// Runtime expression failure (missing attribute, null dereference, budget).
    Evaluation,
    /// Operator/function type mismatch.
    Type,
    /// Anything else raised by the evaluator.
    Unknown,
    /// Check or per-action evaluation exceeded its deadline.
    Timeout,
    /// Internal cache failure (treated as a miss).
    Cache,
    /// Structurally invalid check request.
    InvalidRequest,
    /// Policy rejected at load time.
    InvalidPolicy,
    /// Engine configuration rejected.
    Config,
    /// Unsupported config/schema version.
    UnsupportedVersion,
}

impl ErrorCode {
    /// String representation used in logs, metrics and serialized stats.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Parse => "PARSE",
            ErrorCode::Evaluation => "EVALUATION",
            ErrorCode::Type => "TYPE",
            ErrorCode::Unknown => "UNKNOWN",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Cache => "CACHE",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::InvalidPolicy => "INVALID_POLICY",
            ErrorCode::Config => "CONFIG",
            ErrorCode::UnsupportedVersion => "UNSUPPORTED_VERSION",
        }
    }
}

/// Expression error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExprErrorKind {
    Parse,
    Evaluation,
    Type,
    Unknown,
}

impl ExprErrorKind {
    pub const ALL: [ExprErrorKind; 4] = [
        ExprErrorKind::Parse,
        ExprErrorKind::Evaluation,
        ExprErrorKind::Type,
        ExprErrorKind::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ExprErrorKind::Parse => "parse",
            ExprErrorKind::Evaluation => "evaluation",
            ExprErrorKind::Type => "type",
            ExprErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ExprErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error raised while compiling or evaluating an expression.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind} error: {message}")]
pub struct ExprError {
    pub kind: ExprErrorKind,
    pub message: String,
}

impl ExprError {
    pub fn parse(message: impl Into<String>) -> Self {
        Self { kind: ExprErrorKind::Parse, message: message.into() }
    }

    pub fn eval(message: impl Into<String>) -> Self {
        Self { kind: ExprErrorKind::Evaluation, message: message.into() }
    }

    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self { kind: ExprErrorKind::Type, message: message.into() }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self { kind: ExprErrorKind::Unknown, message: message.into() }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, PdpError>;

/// Unified error type used by core and engine.
#[derive(Debug, Error)]
pub enum PdpError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("evaluation error: {0}")]
    Evaluation(String),
    #[error("type error: {0}")]
    Type(String),
    #[error("unknown error: {0}")]
    Unknown(String),
    #[error("timed out after {0} ms")]
    Timeout(u64),
    #[error("cache: {0}")]
    Cache(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid policy `{policy}`: {reason}")]
    InvalidPolicy { policy: String, reason: String },
    #[error("config: {0}")]
    Config(String),
    #[error("unsupported config version")]
    UnsupportedVersion,
}

impl PdpError {
    /// Map internal error to a stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            PdpError::Parse(_) => ErrorCode::Parse,
            PdpError::Evaluation(_) => ErrorCode::Evaluation,
            PdpError::Type(_) => ErrorCode::Type,
            PdpError::Unknown(_) => ErrorCode::Unknown,
            PdpError::Timeout(_) => ErrorCode::Timeout,
            PdpError::Cache(_) => ErrorCode::Cache,
            PdpError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            PdpError::InvalidPolicy { .. } => ErrorCode::InvalidPolicy,
            PdpError::Config(_) => ErrorCode::Config,
            PdpError::UnsupportedVersion => ErrorCode::UnsupportedVersion,
        }
    }

    pub fn invalid_policy(policy: impl Into<String>, reason: impl Into<String>) -> Self {
        PdpError::InvalidPolicy { policy: policy.into(), reason: reason.into() }
    }
}

impl From<ExprError> for PdpError {
    fn from(e: ExprError) -> Self {
        match e.kind {
            ExprErrorKind::Parse => PdpError::Parse(e.message),
            ExprErrorKind::Evaluation => PdpError::Evaluation(e.message),
            ExprErrorKind::Type => PdpError::Type(e.message),
            ExprErrorKind::Unknown => PdpError::Unknown(e.message),
        }
    }
}
