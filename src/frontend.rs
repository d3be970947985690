//! Contract for the DSL front end.
//!
//! The front end parses and typechecks a version's DSL source and generates
//! target source plus reflection metadata for it. Its language semantics are
//! outside this crate; the forge only needs this narrow capability.

use crate::error::TypeCheckError;
use crate::plan::DeployedVersion;

/// Input to one front-end run.
#[derive(Debug, Clone, Copy)]
pub struct FrontEndRequest<'a> {
    /// Space being deployed.
    pub space: &'a str,
    /// Version name within the plan.
    pub version_name: &'a str,
    /// Source to typecheck.
    pub version: &'a DeployedVersion,
    /// Content-addressed name the generated class must use.
    pub artifact_name: &'a str,
    /// Whether to emit instrumented code.
    pub instrument: bool,
}

/// Output of a successful front-end run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generated {
    /// Target source handed to the compiler.
    pub source: String,
    /// Structural schema for downstream consumers.
    pub reflection: String,
}

/// Parse + typecheck + code generation.
pub trait FrontEnd: Send + Sync {
    /// Typechecks `request.version` and generates target source for it.
    fn typecheck_and_generate(&self, request: &FrontEndRequest<'_>) -> Result<Generated, TypeCheckError>;
}
