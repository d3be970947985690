//! Error types for spacehost.
//!
//! All errors are strongly typed using thiserror so callers can match on
//! the failing stage (plan validation, typecheck, compile, lookup) and
//! report actionable diagnostics upstream.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while parsing and validating a deployment plan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("Plan is not valid JSON: {reason}")]
    Malformed {
        reason: String,
    },

    #[error("Plan field '{path}' has the wrong shape: expected {expected}")]
    WrongShape {
        path: String,
        expected: &'static str,
    },

    #[error("Plan field '{path}' has unknown member '{field}'")]
    UnknownField {
        path: String,
        field: String,
    },

    #[error("Plan does not declare any versions")]
    MissingVersions,

    #[error("Plan declares an empty 'versions' object")]
    EmptyVersions,

    #[error("Plan does not name a default version")]
    MissingDefault,

    #[error("Plan default '{version}' is not a declared version")]
    UnknownDefault {
        version: String,
    },

    #[error("Plan stage {index} references unknown version '{version}'")]
    UnknownStageVersion {
        index: usize,
        version: String,
    },
}

/// A single front-end diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// 1-based line, 0 when unknown.
    pub line: u32,
    /// 1-based column, 0 when unknown.
    pub column: u32,
    /// Human readable message.
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.column, self.message)
    }
}

/// The DSL front end rejected a version's source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Typecheck failed with {} diagnostic(s)", .diagnostics.len())]
pub struct TypeCheckError {
    /// Structured diagnostics, in the order the front end produced them.
    pub diagnostics: Vec<Diagnostic>,
}

impl TypeCheckError {
    /// Builds an error from a single message with no position.
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            diagnostics: vec![Diagnostic {
                line: 0,
                column: 0,
                message: message.into(),
            }],
        }
    }

    /// Serializes the diagnostics as JSON for upstream reporting.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.diagnostics).unwrap_or_else(|_| "[]".to_string())
    }
}

/// Errors produced by a compiler capability.
///
/// Cloneable because one inner compile result is fanned out to every
/// coalesced waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("Compilation of '{artifact}' was rejected:\n{diagnostics}")]
    Rejected {
        artifact: String,
        diagnostics: String,
    },

    #[error("Compiler unavailable: {reason}")]
    Unavailable {
        reason: String,
    },
}

/// Errors raised by an external artifact store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Artifact store backend error: {0}")]
    Backend(String),

    #[error("Artifact store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Artifact '{0}' is corrupt")]
    Corrupt(String),
}

/// Top-level error type for spacehost.
#[derive(Debug, Clone, Error)]
pub enum HostError {
    #[error("Invalid plan: {0}")]
    Plan(#[from] PlanError),

    #[error("Version '{version}' failed to typecheck: {source}")]
    TypeCheck {
        version: String,
        #[source]
        source: TypeCheckError,
    },

    #[error("Version '{version}' failed to compile: {source}")]
    Compile {
        version: String,
        #[source]
        source: CompileError,
    },

    #[error("Space not found: {space}")]
    NotFound {
        space: String,
    },

    #[error("Plan source failed for space '{space}': {reason}")]
    PlanSource {
        space: String,
        reason: String,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl HostError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a not-found error for a space.
    #[must_use]
    pub fn not_found(space: impl Into<String>) -> Self {
        Self::NotFound {
            space: space.into(),
        }
    }

    /// Returns true if this is a plan validation error.
    #[must_use]
    pub const fn is_plan(&self) -> bool {
        matches!(self, Self::Plan(_))
    }

    /// Returns true if a version failed to typecheck.
    #[must_use]
    pub const fn is_typecheck(&self) -> bool {
        matches!(self, Self::TypeCheck { .. })
    }

    /// Returns true if a version failed to compile.
    #[must_use]
    pub const fn is_compile(&self) -> bool {
        matches!(self, Self::Compile { .. })
    }

    /// Returns true if the requested space is not deployed.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if retrying the same request may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Compile { source, .. } => matches!(source, CompileError::Unavailable { .. }),
            Self::PlanSource { .. } => true,
            Self::Plan(_) | Self::TypeCheck { .. } | Self::NotFound { .. } | Self::Internal { .. } => {
                false
            }
        }
    }
}

/// Result type alias for spacehost operations.
pub type HostResult<T> = Result<T, HostError>;
