//! Orchestrator seam.
//!
//! The lifecycle controller talks to the cluster only through the
//! [`Orchestrator`] trait: declarative create/get/list/delete on the
//! object kinds the engine manages, plus the control-plane exec channel.
//! The HTTP implementation lives in [`http`]; tests substitute an
//! in-memory one.

pub(crate) mod error;
mod exec;
pub mod http;
pub mod kubeconfig;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::errors::{KataboxError, KataboxResult};
use crate::objects::{Deployment, NetworkPolicy, Pod, PodMetrics, Secret};

pub use exec::ExecStatus;

/// One parsed message from an exec channel.
#[derive(Debug)]
pub enum ExecMessage {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    /// Terminal status; the channel yields nothing after this.
    Exited(ExecStatus),
}

/// A bidirectional exec channel through the control plane.
///
/// This path is the one deliberate administrative bypass of the isolation
/// model: it rides the orchestrator API, never pod networking, so a fully
/// ingress-locked sandbox stays reachable for administration.
pub struct ExecChannel {
    stdin: Pin<Box<dyn AsyncWrite + Send>>,
    output: Pin<Box<dyn Stream<Item = KataboxResult<ExecMessage>> + Send>>,
}

impl ExecChannel {
    pub fn new(
        stdin: Pin<Box<dyn AsyncWrite + Send>>,
        output: Pin<Box<dyn Stream<Item = KataboxResult<ExecMessage>> + Send>>,
    ) -> Self {
        Self { stdin, output }
    }

    /// Send bytes to the remote process's stdin.
    pub async fn write_stdin(&mut self, data: &[u8]) -> KataboxResult<()> {
        self.stdin
            .write_all(data)
            .await
            .map_err(|e| KataboxError::Unavailable(format!("exec stdin closed: {}", e)))
    }

    /// Next output message, or `None` once the channel is drained.
    pub async fn next_message(&mut self) -> Option<KataboxResult<ExecMessage>> {
        use futures::StreamExt;
        self.output.next().await
    }

    /// Split into independently-driven halves (interactive shells pump
    /// both directions concurrently).
    pub fn split(
        self,
    ) -> (
        Pin<Box<dyn AsyncWrite + Send>>,
        Pin<Box<dyn Stream<Item = KataboxResult<ExecMessage>> + Send>>,
    ) {
        (self.stdin, self.output)
    }
}

/// Parameters for opening an exec channel.
#[derive(Clone, Debug)]
pub struct ExecRequest {
    pub namespace: String,
    pub pod: String,
    pub command: Vec<String>,
    pub stdin: bool,
    pub tty: bool,
}

/// Declarative access to the Kubernetes-compatible control plane.
///
/// Deletes return `false` when the object was already absent; callers
/// treat that as success (the goal state is reached either way).
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn create_deployment(&self, namespace: &str, body: &Deployment) -> KataboxResult<()>;

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> KataboxResult<Option<Deployment>>;

    /// List deployments carrying the given label selector, across all
    /// namespaces when `namespace` is `None`. Follows pagination to
    /// exhaustion; ordering is whatever the control plane returns.
    async fn list_deployments(
        &self,
        namespace: Option<&str>,
        label_selector: &str,
    ) -> KataboxResult<Vec<Deployment>>;

    async fn delete_deployment(&self, namespace: &str, name: &str) -> KataboxResult<bool>;

    async fn create_secret(&self, namespace: &str, body: &Secret) -> KataboxResult<()>;

    async fn delete_secret(&self, namespace: &str, name: &str) -> KataboxResult<bool>;

    async fn create_network_policy(
        &self,
        namespace: &str,
        body: &NetworkPolicy,
    ) -> KataboxResult<()>;

    async fn delete_network_policy(&self, namespace: &str, name: &str) -> KataboxResult<bool>;

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> KataboxResult<Vec<Pod>>;

    /// Aggregated-API resource usage for one pod; `None` when metrics are
    /// not (yet) available for it.
    async fn pod_metrics(&self, namespace: &str, pod: &str) -> KataboxResult<Option<PodMetrics>>;

    /// Open a bidirectional exec channel to a running pod.
    async fn exec(&self, request: ExecRequest) -> KataboxResult<ExecChannel>;
}
