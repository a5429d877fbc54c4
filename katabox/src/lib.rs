//! Katabox — lifecycle and isolation engine for VM-backed sandboxes.
//!
//! Takes a declarative [`SandboxSpec`], synthesizes the cluster objects
//! that realize it with correct security and network isolation, and
//! drives its lifecycle against a Kubernetes-compatible control plane
//! running Kata VM-backed containers. Isolation invariants are encoded as
//! a deterministic, idempotent transformation from user intent to cluster
//! state:
//!
//! - every sandbox gets an ingress-deny-all policy on its own label
//!   selector, so no sandbox can reach another;
//! - a non-empty egress whitelist locks egress down to the listed CIDRs
//!   plus cluster DNS (an empty whitelist deliberately emits no egress
//!   policy — "no additional restriction", not "no internet");
//! - resource ceilings and a hardened security context are always
//!   applied, with privilege escalation disabled unconditionally.
//!
//! Remote callers authenticate through the file-backed [`ApiKeyStore`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use katabox::{EngineOptions, HttpOrchestrator, LifecycleController, SandboxSpec};
//!
//! # async fn run() -> katabox::KataboxResult<()> {
//! let options = EngineOptions::from_env()?;
//! let orchestrator = HttpOrchestrator::from_kubeconfig(options.kubeconfig.as_deref())?;
//! let controller = LifecycleController::new(Arc::new(orchestrator), options);
//!
//! let mut spec = SandboxSpec::new("t1", "alpine:latest");
//! spec.egress_whitelist = vec!["1.1.1.1/32".into()];
//! controller.create(&spec).await?;
//! # Ok(())
//! # }
//! ```

pub mod apikeys;
pub mod constants;
pub mod controller;
pub mod errors;
pub mod manifest;
pub mod netpol;
pub mod objects;
pub mod options;
pub mod orchestrator;
pub mod profile;
pub mod spec;

pub use apikeys::{ApiKeyMetadata, ApiKeyStore, GeneratedKey};
pub use controller::{
    DeleteFailure, DeleteReport, ExecResult, LifecycleController, SandboxHandle, SandboxMetrics,
    SandboxState, SandboxStatus,
};
pub use errors::{KataboxError, KataboxResult};
pub use manifest::ManifestSet;
pub use netpol::NetworkPolicySet;
pub use options::{EgressRestriction, EngineOptions, RetryPolicy};
pub use orchestrator::http::HttpOrchestrator;
pub use orchestrator::{ExecChannel, ExecMessage, ExecRequest, ExecStatus, Orchestrator};
pub use profile::ResourceProfile;
pub use spec::{Limits, SandboxSpec};
