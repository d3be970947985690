//! Live routing state: the space → bundle map.
//!
//! The registry owns the currently active [`SpaceBundle`] of every space.
//! Deploys run the forge with the active bundle as prior and swap the new
//! bundle in with a single map insert; readers therefore always see either
//! the old bundle or the new one, never a mixture. A failed deploy leaves
//! the active bundle untouched.
//!
//! No lock is held across forge, front-end or compiler work, so spaces
//! deploy and serve independently of one another.

pub mod listener;
pub mod on_demand;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tracing::{debug, info};

use crate::compiler::Compiler;
use crate::completion::Callback;
use crate::error::{HostError, HostResult};
use crate::forge::{Forge, ForgeRequest, RoutingSecrets, SpaceBundle, SpaceFactory};
use crate::frontend::FrontEnd;
use crate::metrics::Metrics;
use crate::plan::Plan;

pub use listener::{DeferredListener, DeploymentEvent, DeploymentListener, NoopListener};
pub use on_demand::{DeploySync, FoundPlan, OnDemand, PlanFetcher};

/// Addresses one document instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentKey {
    /// Owning space.
    pub space: String,
    /// Document key within the space.
    pub key: String,
}

impl DocumentKey {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new(space: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            space: space.into(),
            key: key.into(),
        }
    }

    /// Key fed to canary routing.
    #[must_use]
    pub fn routing_id(&self) -> &str {
        &self.key
    }
}

/// Memory usage accumulated for one space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SpaceUsage {
    /// Sum of sampled bundle memory, in bytes.
    pub memory_bytes: u64,
    /// Number of samples folded into `memory_bytes`.
    pub samples: u64,
}

/// Caller-owned metering aggregate, keyed by space.
pub type MeteringMap = HashMap<String, SpaceUsage>;

struct Shared {
    spaces: RwLock<HashMap<String, Arc<SpaceBundle>>>,
    listener: Arc<dyn DeploymentListener>,
    metrics: Arc<Metrics>,
}

impl Shared {
    // The map holds no cross-entry invariants; a poisoned lock is recovered.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<SpaceBundle>>> {
        self.spaces.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<SpaceBundle>>> {
        self.spaces.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Hot-swappable registry of deployed spaces. Cheap to clone.
#[derive(Clone)]
pub struct Registry {
    forge: Arc<Forge>,
    shared: Arc<Shared>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(
        front_end: Arc<dyn FrontEnd>,
        compiler: Arc<dyn Compiler>,
        listener: Arc<dyn DeploymentListener>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            forge: Arc::new(Forge::new(front_end, compiler)),
            shared: Arc::new(Shared {
                spaces: RwLock::new(HashMap::new()),
                listener,
                metrics,
            }),
        }
    }

    /// Builds `plan` for `space` and makes it live on success.
    ///
    /// Versions whose source is unchanged from the active bundle are reused.
    /// When deploys of one space race, the last one to complete wins.
    pub fn deploy(
        &self,
        space: &str,
        plan: Plan,
        secrets: RoutingSecrets,
        done: Callback<HostResult<Arc<SpaceBundle>>>,
    ) {
        let prior = self.bundle(space);
        debug!(space, reused_prior = prior.is_some(), "deploying space");

        let shared = Arc::clone(&self.shared);
        let space_name = space.to_string();
        self.forge.build(
            ForgeRequest {
                space: space.to_string(),
                prior,
                plan: Arc::new(plan),
                secrets,
            },
            Box::new(move |result| match result {
                Ok(bundle) => {
                    let bundle = Arc::new(bundle);
                    let replaced = shared.write().insert(space_name.clone(), Arc::clone(&bundle));
                    info!(
                        space = %space_name,
                        plan = %bundle.plan().content_hash(),
                        replaced = replaced.is_some(),
                        "space deployed"
                    );
                    shared.listener.deployed(&space_name, &bundle);
                    done(Ok(bundle));
                }
                Err(err) => {
                    shared.listener.failed(&space_name, &err);
                    done(Err(err));
                }
            }),
        );
    }

    /// Resolves the factory serving `key`.
    pub fn resolve(&self, key: &DocumentKey) -> HostResult<Arc<SpaceFactory>> {
        let bundle = self
            .bundle(&key.space)
            .ok_or_else(|| HostError::not_found(key.space.clone()))?;
        let version = bundle.plan().pick_version(key.routing_id());
        bundle.factory(version).cloned().ok_or_else(|| {
            HostError::internal(format!(
                "space '{}' has no factory for version '{version}'",
                key.space
            ))
        })
    }

    /// Delivers the factory serving `key`, or `NotFound` if its space is
    /// not deployed.
    pub fn fetch(&self, key: &DocumentKey, done: Callback<HostResult<Arc<SpaceFactory>>>) {
        done(self.resolve(key));
    }

    /// Removes `space`. Returns false if it was not deployed.
    pub fn undeploy(&self, space: &str) -> bool {
        let removed = self.shared.write().remove(space);
        if removed.is_none() {
            return false;
        }
        self.shared.metrics.undeploys.inc();
        info!(space, "space undeployed");
        self.shared.listener.undeployed(space);
        true
    }

    /// Adds one memory sample per deployed space into `metering`.
    pub fn account(&self, metering: &mut MeteringMap) {
        let spaces = self.shared.read();
        for (space, bundle) in spaces.iter() {
            let usage = metering.entry(space.clone()).or_default();
            usage.memory_bytes += bundle.total_memory();
            usage.samples += 1;
        }
    }

    /// True if `space` is deployed.
    #[must_use]
    pub fn contains(&self, space: &str) -> bool {
        self.shared.read().contains_key(space)
    }

    /// Content hash of the active plan for `space`.
    #[must_use]
    pub fn hash_of(&self, space: &str) -> Option<String> {
        self.shared
            .read()
            .get(space)
            .map(|bundle| bundle.plan().content_hash().to_string())
    }

    /// Names of every deployed space, sorted.
    #[must_use]
    pub fn spaces_available(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Active bundle for `space`.
    #[must_use]
    pub fn bundle(&self, space: &str) -> Option<Arc<SpaceBundle>> {
        self.shared.read().get(space).cloned()
    }

    /// Counters shared with the compile stack.
    #[must_use]
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.shared.metrics
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::artifact::CompiledArtifact;
    use crate::compiler::{CompileRequest, CompileResult};
    use crate::completion::Pending;
    use crate::error::TypeCheckError;
    use crate::frontend::{FrontEndRequest, Generated};

    struct EchoFrontEnd;

    impl FrontEnd for EchoFrontEnd {
        fn typecheck_and_generate(&self, request: &FrontEndRequest<'_>) -> Result<Generated, TypeCheckError> {
            if request.version.main.contains("error") {
                return Err(TypeCheckError::message("rejected"));
            }
            Ok(Generated {
                source: request.version.main.clone(),
                reflection: "{}".to_string(),
            })
        }
    }

    #[derive(Default)]
    struct InlineCompiler {
        calls: AtomicUsize,
    }

    impl Compiler for InlineCompiler {
        fn fetch_or_compile(&self, request: CompileRequest, done: Callback<CompileResult>) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut blobs = BTreeMap::new();
            blobs.insert("code".to_string(), request.source.into_bytes());
            done(Ok(Arc::new(CompiledArtifact::new(
                request.space,
                request.artifact_name,
                request.reflection,
                blobs,
            ))));
        }
    }

    #[derive(Default)]
    struct Events(Mutex<Vec<String>>);

    impl DeploymentListener for Events {
        fn deployed(&self, space: &str, _bundle: &Arc<SpaceBundle>) {
            self.0.lock().unwrap().push(format!("+{space}"));
        }

        fn undeployed(&self, space: &str) {
            self.0.lock().unwrap().push(format!("-{space}"));
        }

        fn failed(&self, space: &str, _error: &HostError) {
            self.0.lock().unwrap().push(format!("!{space}"));
        }
    }

    fn registry(events: &Arc<Events>) -> Registry {
        Registry::new(
            Arc::new(EchoFrontEnd),
            Arc::new(InlineCompiler::default()),
            events.clone(),
            Arc::new(Metrics::new()),
        )
    }

    fn deploy(registry: &Registry, space: &str, plan: &str) -> HostResult<Arc<SpaceBundle>> {
        let (done, pending) = Pending::new("deploy");
        registry.deploy(space, Plan::parse(plan).unwrap(), RoutingSecrets::new(), done);
        pending.join().unwrap()
    }

    fn fetch(registry: &Registry, space: &str, key: &str) -> HostResult<Arc<SpaceFactory>> {
        let (done, pending) = Pending::new("fetch");
        registry.fetch(&DocumentKey::new(space, key), done);
        pending.join().unwrap()
    }

    #[test]
    fn test_fetch_routes_by_plan_and_reports_missing_spaces() {
        let events = Arc::new(Events::default());
        let registry = registry(&events);
        deploy(
            &registry,
            "acme",
            r#"{"versions":{"old":"a","new":"b"},"default":"old",
                "plan":[{"version":"new","keys":["vip"]}]}"#,
        )
        .unwrap();

        assert_eq!(fetch(&registry, "acme", "vip").unwrap().version, "new");
        assert_eq!(fetch(&registry, "acme", "regular").unwrap().version, "old");
        assert!(fetch(&registry, "nope", "k").unwrap_err().is_not_found());
        assert_eq!(*events.0.lock().unwrap(), vec!["+acme"]);
    }

    #[test]
    fn test_failed_deploy_keeps_prior_bundle_live() {
        let events = Arc::new(Events::default());
        let registry = registry(&events);
        let first = deploy(&registry, "acme", r#"{"versions":{"v":"good"},"default":"v"}"#).unwrap();
        let hash = registry.hash_of("acme").unwrap();

        let err = deploy(&registry, "acme", r#"{"versions":{"v":"error"},"default":"v"}"#).unwrap_err();
        assert!(err.is_typecheck());

        assert_eq!(registry.hash_of("acme").unwrap(), hash);
        assert!(Arc::ptr_eq(&registry.bundle("acme").unwrap(), &first));
        assert_eq!(fetch(&registry, "acme", "k").unwrap().version, "v");
        assert_eq!(*events.0.lock().unwrap(), vec!["+acme", "!acme"]);
    }

    #[test]
    fn test_undeploy_removes_and_counts() {
        let events = Arc::new(Events::default());
        let registry = registry(&events);
        deploy(&registry, "acme", r#"{"versions":{"v":"x"},"default":"v"}"#).unwrap();

        assert!(registry.undeploy("acme"));
        assert!(!registry.undeploy("acme"));
        assert!(!registry.contains("acme"));
        assert_eq!(registry.hash_of("acme"), None);
        assert_eq!(registry.metrics().snapshot().undeploys, 1);
        assert_eq!(*events.0.lock().unwrap(), vec!["+acme", "-acme"]);
    }

    #[test]
    fn test_account_accumulates_across_calls() {
        let events = Arc::new(Events::default());
        let registry = registry(&events);
        let a = deploy(&registry, "a", r#"{"versions":{"v":"xx"},"default":"v"}"#).unwrap();
        let b = deploy(&registry, "b", r#"{"versions":{"v":"yyyy"},"default":"v"}"#).unwrap();

        let mut metering = MeteringMap::new();
        registry.account(&mut metering);
        registry.account(&mut metering);

        assert_eq!(
            metering["a"],
            SpaceUsage {
                memory_bytes: 2 * a.total_memory(),
                samples: 2
            }
        );
        assert_eq!(metering["b"].memory_bytes, 2 * b.total_memory());
        assert_eq!(registry.spaces_available(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_redeploy_swaps_bundle_and_hash() {
        let events = Arc::new(Events::default());
        let registry = registry(&events);
        deploy(&registry, "acme", r#"{"versions":{"v":"one"},"default":"v"}"#).unwrap();
        let before = registry.hash_of("acme").unwrap();
        deploy(&registry, "acme", r#"{"versions":{"v":"two"},"default":"v"}"#).unwrap();
        let after = registry.hash_of("acme").unwrap();
        assert_ne!(before, after);
        assert_eq!(registry.spaces_available(), vec!["acme".to_string()]);
    }
}
