//! Lazy deployment in front of a [`Registry`].
//!
//! A space that is not yet deployed is fetched from the plan source on
//! first use, deployed, and registered with the change-notification
//! service so later plan edits are pushed. Concurrent misses for one space
//! are not coalesced; the redundant deploys are harmless because the
//! registry keeps whichever completes last.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::completion::Callback;
use crate::error::HostResult;
use crate::forge::{RoutingSecrets, SpaceBundle, SpaceFactory};
use crate::metrics::Metrics;
use crate::plan::Plan;

use super::{DocumentKey, Registry};

/// A space's plan as stored by the plan source.
#[derive(Debug, Clone)]
pub struct FoundPlan {
    /// Raw plan JSON.
    pub plan: String,
    /// Secrets to deploy alongside.
    pub secrets: RoutingSecrets,
}

/// Where plans come from.
pub trait PlanFetcher: Send + Sync {
    /// Looks up the current plan of `space`.
    fn find(&self, space: &str, done: Callback<HostResult<FoundPlan>>);
}

/// Change-notification subscriptions.
pub trait DeploySync: Send + Sync {
    /// Start pushing plan changes for `space`.
    fn watch(&self, space: &str);

    /// Stop pushing plan changes for `space`.
    fn unwatch(&self, space: &str);
}

/// Registry wrapper that deploys spaces on first fetch. Cheap to clone.
#[derive(Clone)]
pub struct OnDemand {
    registry: Registry,
    fetcher: Arc<dyn PlanFetcher>,
    sync: Arc<dyn DeploySync>,
    metrics: Arc<Metrics>,
}

impl OnDemand {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new(
        registry: Registry,
        fetcher: Arc<dyn PlanFetcher>,
        sync: Arc<dyn DeploySync>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            registry,
            fetcher,
            sync,
            metrics,
        }
    }

    /// The wrapped registry.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Serves `key`, deploying its space first if needed.
    pub fn fetch(&self, key: DocumentKey, done: Callback<HostResult<Arc<SpaceFactory>>>) {
        if self.registry.contains(&key.space) {
            self.metrics.cache_hits.inc();
            self.registry.fetch(&key, done);
            return;
        }

        self.metrics.cache_misses.inc();
        debug!(space = %key.space, "space not deployed; fetching plan");
        let registry = self.registry.clone();
        let space = key.space.clone();
        self.deploy(
            &space,
            Box::new(move |deployed| match deployed {
                Ok(_) => registry.fetch(&key, done),
                Err(err) => done(Err(err)),
            }),
        );
    }

    /// Fetches the current plan for `space`, deploys it and (re)watches it.
    pub fn deploy(&self, space: &str, done: Callback<HostResult<Arc<SpaceBundle>>>) {
        let this = self.clone();
        let fetch_started = Instant::now();
        let space_name = space.to_string();
        self.fetcher.find(
            space,
            Box::new(move |found| {
                let space = space_name;
                this.metrics.plan_fetch.record(fetch_started.elapsed());
                let found = match found {
                    Ok(found) => found,
                    Err(err) => {
                        warn!(space = %space, error = %err, "plan fetch failed");
                        done(Err(err));
                        return;
                    }
                };
                let plan = match Plan::parse(&found.plan) {
                    Ok(plan) => plan,
                    Err(err) => {
                        warn!(space = %space, error = %err, "fetched plan is invalid");
                        done(Err(err.into()));
                        return;
                    }
                };

                let push_started = Instant::now();
                let registry = this.registry.clone();
                registry.deploy(
                    &space,
                    plan,
                    found.secrets,
                    Box::new(move |result| {
                        this.metrics.plan_push.record(push_started.elapsed());
                        if let Ok(bundle) = &result {
                            this.sync.watch(bundle.space());
                        }
                        done(result);
                    }),
                );
            }),
        );
    }

    /// Removes `space` and stops watching it.
    pub fn undeploy(&self, space: &str) -> bool {
        let removed = self.registry.undeploy(space);
        self.sync.unwatch(space);
        removed
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Mutex;

    use super::*;
    use crate::artifact::CompiledArtifact;
    use crate::compiler::{CompileRequest, CompileResult, Compiler};
    use crate::completion::Pending;
    use crate::error::{HostError, TypeCheckError};
    use crate::frontend::{FrontEnd, FrontEndRequest, Generated};
    use crate::registry::NoopListener;

    struct EchoFrontEnd;

    impl FrontEnd for EchoFrontEnd {
        fn typecheck_and_generate(&self, request: &FrontEndRequest<'_>) -> Result<Generated, TypeCheckError> {
            Ok(Generated {
                source: request.version.main.clone(),
                reflection: String::new(),
            })
        }
    }

    struct InlineCompiler;

    impl Compiler for InlineCompiler {
        fn fetch_or_compile(&self, request: CompileRequest, done: Callback<CompileResult>) {
            done(Ok(Arc::new(CompiledArtifact::new(
                request.space,
                request.artifact_name,
                request.reflection,
                BTreeMap::new(),
            ))));
        }
    }

    #[derive(Default)]
    struct Plans(Mutex<HashMap<String, String>>);

    impl PlanFetcher for Plans {
        fn find(&self, space: &str, done: Callback<HostResult<FoundPlan>>) {
            let plan = self.0.lock().unwrap().get(space).cloned();
            done(match plan {
                Some(plan) => Ok(FoundPlan {
                    plan,
                    secrets: RoutingSecrets::new(),
                }),
                None => Err(HostError::PlanSource {
                    space: space.to_string(),
                    reason: "no such space".to_string(),
                }),
            });
        }
    }

    #[derive(Default)]
    struct Watches(Mutex<Vec<String>>);

    impl DeploySync for Watches {
        fn watch(&self, space: &str) {
            self.0.lock().unwrap().push(format!("watch {space}"));
        }

        fn unwatch(&self, space: &str) {
            self.0.lock().unwrap().push(format!("unwatch {space}"));
        }
    }

    fn setup() -> (OnDemand, Arc<Plans>, Arc<Watches>, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        let registry = Registry::new(
            Arc::new(EchoFrontEnd),
            Arc::new(InlineCompiler),
            Arc::new(NoopListener),
            Arc::clone(&metrics),
        );
        let plans = Arc::new(Plans::default());
        let watches = Arc::new(Watches::default());
        let on_demand = OnDemand::new(registry, plans.clone(), watches.clone(), Arc::clone(&metrics));
        (on_demand, plans, watches, metrics)
    }

    fn fetch(on_demand: &OnDemand, space: &str) -> HostResult<Arc<SpaceFactory>> {
        let (done, pending) = Pending::new("fetch");
        on_demand.fetch(DocumentKey::new(space, "doc-1"), done);
        pending.join().unwrap()
    }

    #[test]
    fn test_miss_deploys_then_hit_serves_directly() {
        let (on_demand, plans, watches, metrics) = setup();
        plans
            .0
            .lock()
            .unwrap()
            .insert("acme".to_string(), r#"{"versions":{"v":"x"},"default":"v"}"#.to_string());

        assert_eq!(fetch(&on_demand, "acme").unwrap().version, "v");
        assert_eq!(fetch(&on_demand, "acme").unwrap().version, "v");

        let snap = metrics.snapshot();
        assert_eq!(snap.cache_misses, 1);
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.plan_fetch.count, 1);
        assert_eq!(snap.plan_push.count, 1);
        assert_eq!(*watches.0.lock().unwrap(), vec!["watch acme"]);
    }

    #[test]
    fn test_fetcher_errors_propagate_without_deploying() {
        let (on_demand, _plans, watches, _metrics) = setup();
        let err = fetch(&on_demand, "ghost").unwrap_err();
        assert!(matches!(err, HostError::PlanSource { .. }));
        assert!(err.is_retryable());
        assert!(!on_demand.registry().contains("ghost"));
        assert!(watches.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_fetched_plan_is_a_plan_error() {
        let (on_demand, plans, _watches, _metrics) = setup();
        plans
            .0
            .lock()
            .unwrap()
            .insert("acme".to_string(), r#"{"versions":{}}"#.to_string());
        assert!(fetch(&on_demand, "acme").unwrap_err().is_plan());
    }

    #[test]
    fn test_deploy_refreshes_and_undeploy_unwatches() {
        let (on_demand, plans, watches, _metrics) = setup();
        plans
            .0
            .lock()
            .unwrap()
            .insert("acme".to_string(), r#"{"versions":{"v":"one"},"default":"v"}"#.to_string());
        fetch(&on_demand, "acme").unwrap();
        let before = on_demand.registry().hash_of("acme").unwrap();

        plans
            .0
            .lock()
            .unwrap()
            .insert("acme".to_string(), r#"{"versions":{"v":"two"},"default":"v"}"#.to_string());
        let (done, pending) = Pending::new("deploy");
        on_demand.deploy("acme", done);
        pending.join().unwrap().unwrap();
        assert_ne!(on_demand.registry().hash_of("acme").unwrap(), before);

        assert!(on_demand.undeploy("acme"));
        assert!(!on_demand.registry().contains("acme"));
        assert_eq!(
            *watches.0.lock().unwrap(),
            vec!["watch acme", "watch acme", "unwatch acme"]
        );
    }
}
