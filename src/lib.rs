//! # spacehost - compiled, versioned, canary-routed spaces
//!
//! spacehost turns tenant-authored DSL source into compiled "spaces" and
//! keeps them live inside a multi-tenant document host. It owns the path
//! from a declarative deployment plan to the factory that instantiates a
//! document:
//!
//! - **Plan**: versions, a default, and ordered canary stages
//! - **Compiler**: direct, herd-protected cached, and store-backed managed
//!   compilation of generated source into artifacts
//! - **Forge**: per-space orchestration with reuse of unchanged versions
//! - **Registry**: atomic hot-swap of live bundles and version routing
//! - **OnDemand**: lazy deployment from a plan source
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use spacehost::{compiler, DocumentKey, Metrics, MemoryArtifactStore, NoopListener, Pending, Plan, Registry, RoutingSecrets};
//!
//! let metrics = Arc::new(Metrics::new());
//! let compiler = compiler::assemble(my_toolchain, Arc::new(MemoryArtifactStore::new()),
//!     &Default::default(), Arc::clone(&metrics))?;
//! let registry = Registry::new(my_front_end, compiler, Arc::new(NoopListener), metrics);
//!
//! let plan = Plan::parse(r#"{"versions":{"x":"public int x = 123;"},"default":"x"}"#)?;
//! let (done, deployed) = Pending::new("deploy");
//! registry.deploy("acme", plan, RoutingSecrets::new(), done);
//! deployed.join()??;
//!
//! let (done, factory) = Pending::new("fetch");
//! registry.fetch(&DocumentKey::new("acme", "doc-1"), done);
//! let factory = factory.join()??;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Leaves
pub mod artifact;
pub mod completion;
pub mod error;
pub mod frontend;
pub mod metrics;
pub mod plan;
pub mod store;

// Pipeline
pub mod compiler;
pub mod forge;
pub mod registry;

pub use artifact::{ArtifactKey, CompiledArtifact};
pub use compiler::{CompileRequest, CompileResult, Compiler, CompilerConfig, Toolchain};
pub use completion::{Callback, Pending};
pub use error::{CompileError, Diagnostic, HostError, HostResult, PlanError, StoreError, TypeCheckError};
pub use forge::{Forge, ForgeRequest, RoutingSecrets, SpaceBundle, SpaceFactory};
pub use frontend::{FrontEnd, FrontEndRequest, Generated};
pub use metrics::{Metrics, MetricsSnapshot};
pub use plan::{DeployedVersion, Plan, Stage};
pub use registry::{
    DeferredListener, DeploySync, DeploymentEvent, DeploymentListener, DocumentKey, FoundPlan,
    MeteringMap, NoopListener, OnDemand, PlanFetcher, Registry, SpaceUsage,
};
pub use store::{ArtifactStore, FsArtifactStore, MemoryArtifactStore};
