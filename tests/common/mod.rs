//! Fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use spacehost::compiler::{self, CacheConfig, ManagedConfig};
use spacehost::{
    ArtifactStore, Compiler, CompilerConfig, Diagnostic, DocumentKey, FrontEnd, FrontEndRequest,
    Generated, HostResult, Metrics, NoopListener, Pending, Plan, Registry, RoutingSecrets,
    SpaceBundle, SpaceFactory, Toolchain, TypeCheckError,
};

/// Front end that wraps the DSL source in a class named after the artifact.
/// Any source containing `@error` fails to typecheck.
#[derive(Default)]
pub struct FakeFrontEnd {
    pub calls: AtomicUsize,
}

impl FrontEnd for FakeFrontEnd {
    fn typecheck_and_generate(&self, request: &FrontEndRequest<'_>) -> Result<Generated, TypeCheckError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(offset) = request.version.main.find("@error") {
            return Err(TypeCheckError {
                diagnostics: vec![Diagnostic {
                    line: 1,
                    column: u32::try_from(offset + 1).unwrap_or(u32::MAX),
                    message: "unexpected '@error'".to_string(),
                }],
            });
        }
        let mut body = request.version.main.clone();
        for (name, include) in &request.version.includes {
            body.push_str(&format!("\n// include {name}\n{include}"));
        }
        Ok(Generated {
            source: format!("class {} {{\n{body}\n}}", request.artifact_name),
            reflection: format!(r#"{{"version":"{}","instrument":{}}}"#, request.version_name, request.instrument),
        })
    }
}

/// Toolchain that "compiles" by copying the source into a single blob.
/// Sources containing `@nocompile` are rejected. Clones share the counter.
#[derive(Clone, Default)]
pub struct FakeToolchain {
    pub calls: Arc<AtomicUsize>,
    pub delay: Duration,
}

impl FakeToolchain {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Toolchain for FakeToolchain {
    fn compile(&self, artifact_name: &str, source: &str) -> Result<BTreeMap<String, Vec<u8>>, Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if source.contains("@nocompile") {
            return Err(vec![format!("{artifact_name}: refused to compile")]);
        }
        let mut blobs = BTreeMap::new();
        blobs.insert(format!("{artifact_name}.class"), source.as_bytes().to_vec());
        Ok(blobs)
    }
}

/// Everything a test needs to drive the pipeline.
pub struct Harness {
    pub registry: Registry,
    pub compiler: Arc<dyn Compiler>,
    pub front_end: Arc<FakeFrontEnd>,
    pub toolchain: FakeToolchain,
    pub metrics: Arc<Metrics>,
}

pub fn test_config() -> CompilerConfig {
    CompilerConfig {
        cache: CacheConfig {
            sweep_min: Duration::from_millis(50),
            sweep_max: Duration::from_millis(100),
            ..CacheConfig::default()
        },
        managed: ManagedConfig {
            workers: 4,
            queue_capacity: 64,
            submit_timeout: Duration::from_secs(10),
        },
    }
}

pub fn harness(toolchain: FakeToolchain, store: Arc<dyn ArtifactStore>) -> Harness {
    let metrics = Arc::new(Metrics::new());
    let compiler = compiler::assemble(toolchain.clone(), store, &test_config(), Arc::clone(&metrics))
        .expect("compiler stack");
    let front_end = Arc::new(FakeFrontEnd::default());
    let registry = Registry::new(
        front_end.clone(),
        Arc::clone(&compiler),
        Arc::new(NoopListener),
        Arc::clone(&metrics),
    );
    Harness {
        registry,
        compiler,
        front_end,
        toolchain,
        metrics,
    }
}

pub fn deploy(registry: &Registry, space: &str, plan: &str) -> HostResult<Arc<SpaceBundle>> {
    let plan = Plan::parse(plan)?;
    let (done, pending) = Pending::new("deploy");
    registry.deploy(space, plan, RoutingSecrets::new(), done);
    pending.join_timeout(Duration::from_secs(10))?
}

pub fn fetch(registry: &Registry, space: &str, key: &str) -> HostResult<Arc<SpaceFactory>> {
    let (done, pending) = Pending::new("fetch");
    registry.fetch(&DocumentKey::new(space, key), done);
    pending.join_timeout(Duration::from_secs(10))?
}

/// Source text carried by a factory's single blob.
pub fn compiled_source(factory: &SpaceFactory) -> String {
    let blob = factory.artifact.blobs().values().next().expect("one blob");
    String::from_utf8(blob.clone()).expect("utf-8 blob")
}

/// Thread-safe event log.
#[derive(Default)]
pub struct Log(pub Mutex<Vec<String>>);

impl Log {
    pub fn push(&self, line: impl Into<String>) {
        self.0.lock().unwrap().push(line.into());
    }

    pub fn lines(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}
