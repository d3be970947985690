//! Direct compilation on the caller's thread.

use std::sync::Arc;

use tracing::debug;

use crate::artifact::CompiledArtifact;
use crate::completion::Callback;
use crate::error::CompileError;

use super::{CompileRequest, CompileResult, Compiler, Toolchain};

/// Runs the toolchain synchronously and completes `done` before returning.
#[derive(Debug)]
pub struct DirectCompiler<T> {
    toolchain: T,
}

impl<T: Toolchain> DirectCompiler<T> {
    /// Wraps a toolchain.
    pub const fn new(toolchain: T) -> Self {
        Self { toolchain }
    }

    /// Compiles `request` and returns the outcome.
    pub fn compile(&self, request: CompileRequest) -> CompileResult {
        match self.toolchain.compile(&request.artifact_name, &request.source) {
            Ok(blobs) => {
                debug!(
                    space = %request.space,
                    artifact = %request.artifact_name,
                    blobs = blobs.len(),
                    "compiled artifact"
                );
                Ok(Arc::new(CompiledArtifact::new(
                    request.space,
                    request.artifact_name,
                    request.reflection,
                    blobs,
                )))
            }
            Err(diagnostics) => Err(CompileError::Rejected {
                artifact: request.artifact_name,
                diagnostics: diagnostics.join("\n"),
            }),
        }
    }
}

impl<T: Toolchain> Compiler for DirectCompiler<T> {
    fn fetch_or_compile(&self, request: CompileRequest, done: Callback<CompileResult>) {
        done(self.compile(request));
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    struct Picky;

    impl Toolchain for Picky {
        fn compile(&self, artifact_name: &str, source: &str) -> Result<BTreeMap<String, Vec<u8>>, Vec<String>> {
            if source.contains("bad") {
                return Err(vec!["1:1 unexpected 'bad'".to_string(), "1:5 giving up".to_string()]);
            }
            let mut blobs = BTreeMap::new();
            blobs.insert(format!("{artifact_name}.class"), vec![0xCA, 0xFE]);
            Ok(blobs)
        }
    }

    fn request(source: &str) -> CompileRequest {
        CompileRequest {
            space: "s".to_string(),
            artifact_name: "s_1".to_string(),
            source: source.to_string(),
            reflection: "{}".to_string(),
        }
    }

    #[test]
    fn test_success_builds_artifact_from_blobs() {
        let artifact = DirectCompiler::new(Picky).compile(request("ok")).unwrap();
        assert_eq!(artifact.artifact_name(), "s_1");
        assert_eq!(artifact.blobs()["s_1.class"], vec![0xCA, 0xFE]);
    }

    #[test]
    fn test_rejection_concatenates_all_diagnostics() {
        let err = DirectCompiler::new(Picky).compile(request("bad")).unwrap_err();
        let CompileError::Rejected { artifact, diagnostics } = err else {
            panic!("expected rejection");
        };
        assert_eq!(artifact, "s_1");
        assert_eq!(diagnostics, "1:1 unexpected 'bad'\n1:5 giving up");
    }

    #[test]
    fn test_callback_runs_on_calling_thread() {
        let caller = std::thread::current().id();
        let compiler = DirectCompiler::new(Picky);
        let observed = Arc::new(std::sync::Mutex::new(None));
        let slot = Arc::clone(&observed);
        compiler.fetch_or_compile(
            request("ok"),
            Box::new(move |result| {
                assert!(result.is_ok());
                *slot.lock().unwrap() = Some(std::thread::current().id());
            }),
        );
        assert_eq!(*observed.lock().unwrap(), Some(caller));
    }
}
