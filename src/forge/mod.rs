//! Per-space orchestration: plan in, immutable bundle out.
//!
//! The forge turns a validated [`Plan`] into a [`SpaceBundle`]. Every
//! declared version is handled independently:
//!
//! 1. a version whose source and instrument flag equal the prior bundle's
//!    is reused as is;
//! 2. otherwise it is typechecked by the [`FrontEnd`], named by content
//!    and handed to the [`Compiler`].
//!
//! Results are joined by a fan-in gate: the bundle is produced once every
//! version is ready, and the first failure (typecheck or compile) is
//! reported exactly once.

mod fan_in;
pub mod naming;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::artifact::CompiledArtifact;
use crate::compiler::{CompileRequest, Compiler};
use crate::completion::Callback;
use crate::error::{HostError, HostResult};
use crate::frontend::{FrontEnd, FrontEndRequest};
use crate::plan::{DeployedVersion, Plan};

use fan_in::FanIn;

/// Named secrets a space's routing and runtime may use.
///
/// Values never appear in `Debug` output.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct RoutingSecrets(BTreeMap<String, String>);

impl RoutingSecrets {
    /// Empty secret set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a secret.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Looks up a secret.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Secret names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for RoutingSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.0.keys().map(|name| (name, "<redacted>")))
            .finish()
    }
}

impl FromIterator<(String, String)> for RoutingSecrets {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Everything the document runtime needs to instantiate one version.
#[derive(Debug, Clone)]
pub struct SpaceFactory {
    /// Owning space.
    pub space: String,
    /// Version name within the plan.
    pub version: String,
    /// Compiled code for the version.
    pub artifact: Arc<CompiledArtifact>,
    /// Whether the plan asked for instrumentation.
    pub instrument: bool,
    /// Secrets deployed with the plan.
    pub secrets: Arc<RoutingSecrets>,
}

/// A deployed space: its plan and one factory per declared version.
///
/// Produced only by the forge and never mutated; redeploys replace the
/// whole bundle.
#[derive(Debug)]
pub struct SpaceBundle {
    space: String,
    plan: Arc<Plan>,
    secrets: Arc<RoutingSecrets>,
    total_memory: u64,
    factories: BTreeMap<String, Arc<SpaceFactory>>,
    deployed_at: DateTime<Utc>,
    deploy_id: Uuid,
}

impl SpaceBundle {
    fn assemble(
        space: String,
        plan: Arc<Plan>,
        secrets: Arc<RoutingSecrets>,
        factories: Vec<Arc<SpaceFactory>>,
        deploy_id: Uuid,
    ) -> Self {
        let total_memory = factories.iter().map(|f| f.artifact.size_estimate()).sum();
        Self {
            space,
            plan,
            secrets,
            total_memory,
            factories: factories
                .into_iter()
                .map(|factory| (factory.version.clone(), factory))
                .collect(),
            deployed_at: Utc::now(),
            deploy_id,
        }
    }

    /// Space name.
    #[must_use]
    pub fn space(&self) -> &str {
        &self.space
    }

    /// Plan this bundle was built from.
    #[must_use]
    pub fn plan(&self) -> &Arc<Plan> {
        &self.plan
    }

    /// Secrets deployed with the plan.
    #[must_use]
    pub fn secrets(&self) -> &Arc<RoutingSecrets> {
        &self.secrets
    }

    /// Sum of the size estimates of every version's artifact.
    #[must_use]
    pub const fn total_memory(&self) -> u64 {
        self.total_memory
    }

    /// Factories by version name.
    #[must_use]
    pub fn factories(&self) -> &BTreeMap<String, Arc<SpaceFactory>> {
        &self.factories
    }

    /// Factory for one version.
    #[must_use]
    pub fn factory(&self, version: &str) -> Option<&Arc<SpaceFactory>> {
        self.factories.get(version)
    }

    /// Factory serving `routing_key` under this bundle's plan.
    #[must_use]
    pub fn factory_for(&self, routing_key: &str) -> Option<&Arc<SpaceFactory>> {
        self.factory(self.plan.pick_version(routing_key))
    }

    /// When the forge finished this bundle.
    #[must_use]
    pub const fn deployed_at(&self) -> DateTime<Utc> {
        self.deployed_at
    }

    /// Identifier of the deploy that produced this bundle (appears in logs).
    #[must_use]
    pub const fn deploy_id(&self) -> Uuid {
        self.deploy_id
    }
}

/// Input to one forge run.
#[derive(Debug, Clone)]
pub struct ForgeRequest {
    /// Space being deployed.
    pub space: String,
    /// Currently active bundle, if any; its versions may be reused.
    pub prior: Option<Arc<SpaceBundle>>,
    /// Validated plan to build.
    pub plan: Arc<Plan>,
    /// Secrets to deploy with the plan.
    pub secrets: RoutingSecrets,
}

/// Shared state of one forge run.
struct Job {
    space: String,
    plan: Arc<Plan>,
    secrets: Arc<RoutingSecrets>,
    prior: Option<Arc<SpaceBundle>>,
    deploy_id: Uuid,
}

/// Builds space bundles from plans.
pub struct Forge {
    front_end: Arc<dyn FrontEnd>,
    compiler: Arc<dyn Compiler>,
}

impl Forge {
    /// Creates a forge over a front end and a compiler stack.
    #[must_use]
    pub fn new(front_end: Arc<dyn FrontEnd>, compiler: Arc<dyn Compiler>) -> Self {
        Self { front_end, compiler }
    }

    /// Builds a bundle for `request`, completing `done` exactly once.
    ///
    /// Front-end work runs on the calling thread; compiles complete on
    /// whatever thread the compiler uses. No version is started after the
    /// first failure has been reported.
    pub fn build(&self, request: ForgeRequest, done: Callback<HostResult<SpaceBundle>>) {
        let ForgeRequest {
            space,
            prior,
            plan,
            secrets,
        } = request;
        let job = Job {
            space,
            plan,
            secrets: Arc::new(secrets),
            prior,
            deploy_id: Uuid::new_v4(),
        };
        let names: Vec<String> = job.plan.versions().keys().cloned().collect();

        info!(
            space = %job.space,
            deploy_id = %job.deploy_id,
            plan = %job.plan.content_hash(),
            versions = names.len(),
            "forging space"
        );

        let space = job.space.clone();
        let plan = Arc::clone(&job.plan);
        let secrets = Arc::clone(&job.secrets);
        let deploy_id = job.deploy_id;
        let gate: Arc<FanIn<Arc<SpaceFactory>, HostError>> = Arc::new(FanIn::new(
            names.len(),
            Box::new(move |outcome: HostResult<Vec<Arc<SpaceFactory>>>| match outcome {
                Ok(factories) => {
                    let bundle = SpaceBundle::assemble(space, plan, secrets, factories, deploy_id);
                    info!(
                        space = %bundle.space,
                        deploy_id = %deploy_id,
                        total_memory = bundle.total_memory,
                        "space forged"
                    );
                    done(Ok(bundle));
                }
                Err(err) => {
                    warn!(space = %space, deploy_id = %deploy_id, error = %err, "forge failed");
                    done(Err(err));
                }
            }),
        ));

        for (index, name) in names.iter().enumerate() {
            if gate.is_closed() {
                debug!(space = %job.space, version = %name, "skipping version after failure");
                break;
            }
            self.forge_version(&job, index, name, &gate);
        }
    }

    fn forge_version(
        &self,
        job: &Job,
        index: usize,
        name: &str,
        gate: &Arc<FanIn<Arc<SpaceFactory>, HostError>>,
    ) {
        let Some(version) = job.plan.version(name) else {
            gate.complete(index, Err(HostError::internal(format!("version '{name}' vanished from plan"))));
            return;
        };

        if let Some(factory) = reusable(job, name, version) {
            debug!(space = %job.space, version = %name, "reusing compiled version");
            gate.complete(index, Ok(factory));
            return;
        }

        let artifact_name = match naming::artifact_name(&job.space, version, job.plan.instrument()) {
            Ok(artifact_name) => artifact_name,
            Err(err) => {
                gate.complete(index, Err(err));
                return;
            }
        };

        let generated = match self.front_end.typecheck_and_generate(&FrontEndRequest {
            space: &job.space,
            version_name: name,
            version,
            artifact_name: &artifact_name,
            instrument: job.plan.instrument(),
        }) {
            Ok(generated) => generated,
            Err(source) => {
                gate.complete(
                    index,
                    Err(HostError::TypeCheck {
                        version: name.to_string(),
                        source,
                    }),
                );
                return;
            }
        };

        debug!(space = %job.space, version = %name, artifact = %artifact_name, "compiling version");
        let request = CompileRequest {
            space: job.space.clone(),
            artifact_name,
            source: generated.source,
            reflection: generated.reflection,
        };
        let gate = Arc::clone(gate);
        let space = job.space.clone();
        let version_name = name.to_string();
        let instrument = job.plan.instrument();
        let secrets = Arc::clone(&job.secrets);
        self.compiler.fetch_or_compile(
            request,
            Box::new(move |result| {
                let outcome = match result {
                    Ok(artifact) => Ok(Arc::new(SpaceFactory {
                        space,
                        version: version_name,
                        artifact,
                        instrument,
                        secrets,
                    })),
                    Err(source) => Err(HostError::Compile {
                        version: version_name,
                        source,
                    }),
                };
                gate.complete(index, outcome);
            }),
        );
    }
}

/// The prior factory for `name`, if its source and instrument flag are
/// unchanged.
///
/// The compiled artifact is always shared; the factory itself is rebound
/// when only the secrets changed.
fn reusable(job: &Job, name: &str, version: &DeployedVersion) -> Option<Arc<SpaceFactory>> {
    let prior = job.prior.as_ref()?;
    let factory = prior.factory(name)?;
    if prior.plan.version(name)? != version || factory.instrument != job.plan.instrument() {
        return None;
    }
    if *factory.secrets == *job.secrets {
        return Some(Arc::clone(factory));
    }
    Some(Arc::new(SpaceFactory {
        secrets: Arc::clone(&job.secrets),
        ..SpaceFactory::clone(factory)
    }))
}
