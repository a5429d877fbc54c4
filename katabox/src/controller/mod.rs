//! Sandbox lifecycle controller.
//!
//! Applies, observes, and tears down manifest sets against the
//! orchestrator. The orchestrator is the source of truth; the controller
//! reconciles from whatever it reports on each poll and can be restarted
//! safely. Operations on distinct sandboxes run concurrently; operations
//! on the same `(namespace, name)` identity serialize on a per-identity
//! mutex so an in-flight create and a delete never interleave at the
//! orchestrator.

mod retry;
mod state;

pub use state::{SandboxState, SandboxStatus};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::constants::labels;
use crate::errors::{KataboxError, KataboxResult};
use crate::manifest::{self, ManifestSet};
use crate::options::EngineOptions;
use crate::orchestrator::{ExecChannel, ExecMessage, ExecRequest, Orchestrator};
use crate::spec::SandboxSpec;

type SandboxId = (String, String); // (namespace, name)

/// Handle returned by a successful create.
#[derive(Clone, Debug)]
pub struct SandboxHandle {
    pub name: String,
    pub namespace: String,
}

/// Aggregate result of `delete_all`.
#[derive(Debug, Default)]
pub struct DeleteReport {
    pub deleted: usize,
    pub failed: Vec<DeleteFailure>,
}

#[derive(Debug)]
pub struct DeleteFailure {
    pub name: String,
    pub error: String,
}

/// Result of a one-shot exec.
#[derive(Debug)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

/// Resource usage of one running sandbox.
#[derive(Clone, Debug)]
pub struct SandboxMetrics {
    pub name: String,
    pub namespace: String,
    pub cpu_usage: String,
    pub memory_usage: String,
}

struct TrackedState {
    state: SandboxState,
    tracked_at: Instant,
}

/// The lifecycle controller. Cheap to share behind an `Arc`.
pub struct LifecycleController {
    orchestrator: Arc<dyn Orchestrator>,
    options: EngineOptions,
    /// Per-identity serialization tokens. Never a global lock.
    locks: Mutex<HashMap<SandboxId, Arc<tokio::sync::Mutex<()>>>>,
    /// Last known states, including terminal conditions the cluster no
    /// longer shows (script timeouts, confirmed deletions).
    registry: RwLock<HashMap<SandboxId, TrackedState>>,
}

impl LifecycleController {
    pub fn new(orchestrator: Arc<dyn Orchestrator>, options: EngineOptions) -> Self {
        Self {
            orchestrator,
            options,
            locks: Mutex::new(HashMap::new()),
            registry: RwLock::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Build and apply the manifest set for a spec.
    ///
    /// Fails with `Conflict` when the identity already exists (and creates
    /// nothing in that case), `Validation` for a malformed spec, and
    /// `Unavailable` when the orchestrator stays unreachable past the
    /// retry ceiling. When the sandbox gates on readiness (before-script
    /// or pending egress lockdown), create returns only after the sandbox
    /// is Ready and the egress policy is in force.
    pub async fn create(&self, spec: &SandboxSpec) -> KataboxResult<SandboxHandle> {
        let manifests = manifest::build(spec, &self.options)?;
        let id = identity(&spec.namespace, &spec.name);
        let lock = self.identity_lock(&id);
        let _guard = lock.lock().await;

        tracing::info!(sandbox = %spec.name, namespace = %spec.namespace, "creating sandbox");

        // Refuse duplicates before any object is written.
        let existing = self
            .retry("get deployment", || {
                self.orchestrator
                    .get_deployment(&spec.namespace, &spec.name)
            })
            .await?;
        if existing.is_some() {
            return Err(KataboxError::Conflict(format!(
                "sandbox {} already exists in namespace {}",
                spec.name, spec.namespace
            )));
        }

        if let Some(secret) = &manifests.secret {
            self.retry("create secret", || {
                self.orchestrator.create_secret(&spec.namespace, secret)
            })
            .await?;
        }

        if let Err(err) = self
            .retry("create deployment", || {
                self.orchestrator
                    .create_deployment(&spec.namespace, &manifests.deployment)
            })
            .await
        {
            // No partial duplicate: drop the secret we just wrote.
            if manifests.secret.is_some() {
                let _ = self
                    .orchestrator
                    .delete_secret(&spec.namespace, &manifest::env_secret_name(&spec.name))
                    .await;
            }
            return Err(err);
        }

        self.track(SandboxState::new(
            &spec.name,
            &spec.namespace,
            SandboxStatus::Pending,
        ));

        // Ingress isolation goes in with the workload, before any pod can
        // come up. Tolerate a leftover policy from a torn-down namesake.
        if let Err(err) = self
            .retry("create ingress policy", || {
                self.orchestrator
                    .create_network_policy(&spec.namespace, &manifests.deny_ingress)
            })
            .await
        {
            if !matches!(err, KataboxError::Conflict(_)) {
                self.track(
                    SandboxState::new(&spec.name, &spec.namespace, SandboxStatus::Failed)
                        .with_reason(format!("ingress policy: {}", err)),
                );
                return Err(err);
            }
        }

        let gates_on_ready = spec.before_script.is_some() || manifests.gates_on_ready();
        if gates_on_ready {
            self.wait_ready(spec).await?;
        }

        self.apply_egress(&spec.namespace, &spec.name, &manifests).await?;

        if gates_on_ready {
            self.track(SandboxState::new(
                &spec.name,
                &spec.namespace,
                SandboxStatus::Running,
            ));
        }

        tracing::info!(sandbox = %spec.name, namespace = %spec.namespace, "sandbox created");
        Ok(SandboxHandle {
            name: spec.name.clone(),
            namespace: spec.namespace.clone(),
        })
    }

    /// Wait for the sandbox pod to report Ready, classifying terminal pod
    /// failures along the way. Bounded by the before-script timeout.
    async fn wait_ready(&self, spec: &SandboxSpec) -> KataboxResult<()> {
        let deadline = Instant::now() + self.options.before_script_timeout;
        let selector = app_selector(&spec.name);

        loop {
            let pods = self
                .retry("list pods", || {
                    self.orchestrator.list_pods(&spec.namespace, &selector)
                })
                .await?;

            if let Some(pod) = pods.first() {
                if let Some(reason) = pod.waiting_reason() {
                    if matches!(reason, "ErrImagePull" | "ImagePullBackOff") {
                        let err = KataboxError::ImagePull(format!(
                            "image {} cannot be pulled: {}",
                            spec.image, reason
                        ));
                        self.track(
                            SandboxState::new(&spec.name, &spec.namespace, SandboxStatus::Failed)
                                .with_reason(reason),
                        );
                        return Err(err);
                    }
                }
                if pod.is_ready() {
                    return Ok(());
                }
                self.track(SandboxState::new(
                    &spec.name,
                    &spec.namespace,
                    if pod.status.phase.as_deref() == Some("Running") {
                        SandboxStatus::Initializing
                    } else {
                        SandboxStatus::Pending
                    },
                ));
            }

            if Instant::now() >= deadline {
                let err = KataboxError::ScriptTimeout(format!(
                    "sandbox {} not ready within {}s",
                    spec.name,
                    self.options.before_script_timeout.as_secs()
                ));
                self.track(
                    SandboxState::new(&spec.name, &spec.namespace, SandboxStatus::Failed)
                        .with_reason(err.to_string()),
                );
                return Err(err);
            }
            tokio::time::sleep(self.options.poll_interval).await;
        }
    }

    async fn apply_egress(
        &self,
        namespace: &str,
        name: &str,
        manifests: &ManifestSet,
    ) -> KataboxResult<()> {
        let Some(egress) = &manifests.egress else {
            return Ok(());
        };
        tracing::debug!(sandbox = %name, "applying egress lockdown");
        match self
            .retry("create egress policy", || {
                self.orchestrator.create_network_policy(namespace, egress)
            })
            .await
        {
            Ok(()) | Err(KataboxError::Conflict(_)) => Ok(()),
            Err(err) => {
                self.track(
                    SandboxState::new(name, namespace, SandboxStatus::Failed)
                        .with_reason(format!("egress policy: {}", err)),
                );
                Err(err)
            }
        }
    }

    /// Read-only view of one sandbox. Never mutates cluster state.
    pub async fn get(&self, name: &str, namespace: &str) -> KataboxResult<SandboxState> {
        self.sweep_registry();
        let id = identity(namespace, name);

        let deployment = self
            .retry("get deployment", || {
                self.orchestrator.get_deployment(namespace, name)
            })
            .await?;

        match deployment {
            Some(deployment) => {
                let selector = app_selector(name);
                let pods = self
                    .retry("list pods", || {
                        self.orchestrator.list_pods(namespace, &selector)
                    })
                    .await?;
                let state = self.merge_tracked(state::derive(name, namespace, &deployment, &pods));
                self.track(state.clone());
                Ok(state)
            }
            None => {
                let tracked = self.registry.read().get(&id).map(|t| t.state.clone());
                match tracked {
                    Some(prev)
                        if matches!(
                            prev.status,
                            SandboxStatus::Terminating | SandboxStatus::Deleted
                        ) =>
                    {
                        let state = SandboxState::new(name, namespace, SandboxStatus::Deleted);
                        self.track(state.clone());
                        Ok(state)
                    }
                    Some(prev) if prev.status == SandboxStatus::Failed => Ok(prev),
                    _ => Err(KataboxError::NotFound(format!(
                        "sandbox {} not found in namespace {}",
                        name, namespace
                    ))),
                }
            }
        }
    }

    /// List sandboxes, in one namespace or across all of them. Ordering
    /// is whatever the orchestrator returns.
    pub async fn list(&self, namespace: Option<&str>) -> KataboxResult<Vec<SandboxState>> {
        self.sweep_registry();

        let deployments = self
            .retry("list deployments", || {
                self.orchestrator.list_deployments(namespace, labels::SANDBOX)
            })
            .await?;

        let mut states = Vec::with_capacity(deployments.len());
        let mut seen: Vec<SandboxId> = Vec::new();
        for deployment in &deployments {
            let name = deployment.metadata.name.clone();
            let ns = deployment
                .metadata
                .namespace
                .clone()
                .unwrap_or_else(|| "default".to_string());
            let selector = app_selector(&name);
            let pods = match self
                .retry("list pods", || {
                    self.orchestrator.list_pods(&ns, &selector)
                })
                .await
            {
                Ok(pods) => pods,
                Err(err) => {
                    tracing::warn!(sandbox = %name, namespace = %ns, error = %err, "pod status unavailable");
                    Vec::new()
                }
            };
            let state = self.merge_tracked(state::derive(&name, &ns, deployment, &pods));
            self.track(state.clone());
            seen.push(identity(&ns, &name));
            states.push(state);
        }

        // Terminal records the cluster no longer shows, still in their
        // retention window.
        let registry = self.registry.read();
        for ((ns, _), tracked) in registry.iter() {
            if tracked.state.status.is_terminal()
                && namespace.map_or(true, |want| want == ns.as_str())
                && !seen.contains(&identity(ns, &tracked.state.name))
            {
                states.push(tracked.state.clone());
            }
        }

        Ok(states)
    }

    /// Delete a sandbox and all its objects. Idempotent: deleting a
    /// nonexistent sandbox succeeds, because the caller's goal state is
    /// already reached. Continues past individual object failures and
    /// reports them aggregated.
    pub async fn delete(&self, name: &str, namespace: &str) -> KataboxResult<()> {
        let id = identity(namespace, name);
        let lock = self.identity_lock(&id);
        let _guard = lock.lock().await;

        tracing::info!(sandbox = %name, namespace = %namespace, "deleting sandbox");

        let mut errors: Vec<String> = Vec::new();
        let mut existed = false;

        match self
            .retry("delete deployment", || {
                self.orchestrator.delete_deployment(namespace, name)
            })
            .await
        {
            Ok(was_there) => existed |= was_there,
            Err(err) => errors.push(format!("deployment: {}", err)),
        }

        let secret_name = manifest::env_secret_name(name);
        match self
            .retry("delete secret", || {
                self.orchestrator.delete_secret(namespace, &secret_name)
            })
            .await
        {
            Ok(was_there) => existed |= was_there,
            Err(err) => errors.push(format!("secret: {}", err)),
        }

        let (ingress_policy, egress_policy) = manifest::policy_names(name);
        for policy in [ingress_policy, egress_policy] {
            match self
                .retry("delete network policy", || {
                    self.orchestrator.delete_network_policy(namespace, &policy)
                })
                .await
            {
                Ok(was_there) => existed |= was_there,
                Err(err) => errors.push(format!("network policy {}: {}", policy, err)),
            }
        }

        if !errors.is_empty() {
            self.track(
                SandboxState::new(name, namespace, SandboxStatus::Terminating)
                    .with_reason(errors.join("; ")),
            );
            return Err(KataboxError::Internal(format!(
                "sandbox {} teardown incomplete: {}",
                name,
                errors.join("; ")
            )));
        }

        if !existed {
            // Nothing was there; confirm the goal state quietly.
            self.track(SandboxState::new(name, namespace, SandboxStatus::Deleted));
            return Ok(());
        }

        self.track(SandboxState::new(
            name,
            namespace,
            SandboxStatus::Terminating,
        ));
        self.confirm_teardown(name, namespace).await
    }

    /// Poll until the workload is gone, bounded by the teardown timeout.
    async fn confirm_teardown(&self, name: &str, namespace: &str) -> KataboxResult<()> {
        let deadline = Instant::now() + self.options.teardown_timeout;
        loop {
            let deployment = self
                .retry("get deployment", || {
                    self.orchestrator.get_deployment(namespace, name)
                })
                .await?;
            if deployment.is_none() {
                self.track(SandboxState::new(name, namespace, SandboxStatus::Deleted));
                tracing::info!(sandbox = %name, namespace = %namespace, "teardown confirmed");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(KataboxError::Unavailable(format!(
                    "sandbox {} teardown not confirmed within {}s",
                    name,
                    self.options.teardown_timeout.as_secs()
                )));
            }
            tokio::time::sleep(self.options.poll_interval).await;
        }
    }

    /// Delete every sandbox in a namespace, fanning out with bounded
    /// concurrency. One object's failure never cancels the others.
    /// `confirm` is required from every caller, interactive or not.
    pub async fn delete_all(&self, namespace: &str, confirm: bool) -> KataboxResult<DeleteReport> {
        if !confirm {
            return Err(KataboxError::Validation(
                "delete_all requires explicit confirmation".into(),
            ));
        }

        let names: Vec<String> = self
            .list(Some(namespace))
            .await?
            .into_iter()
            .filter(|s| s.status != SandboxStatus::Deleted)
            .map(|s| s.name)
            .collect();

        let mut report = DeleteReport::default();
        let results: Vec<(String, KataboxResult<()>)> = futures::stream::iter(names)
            .map(|name| async move {
                let result = self.delete(&name, namespace).await;
                (name, result)
            })
            .buffer_unordered(self.options.delete_concurrency)
            .collect()
            .await;
        for (name, result) in results {
            match result {
                Ok(()) => report.deleted += 1,
                Err(err) => report.failed.push(DeleteFailure {
                    name,
                    error: err.to_string(),
                }),
            }
        }

        tracing::info!(
            namespace = %namespace,
            deleted = report.deleted,
            failed = report.failed.len(),
            "delete_all finished"
        );
        Ok(report)
    }

    /// Open an interactive shell through the control-plane exec path.
    ///
    /// This is the one deliberate administrative bypass of the isolation
    /// model: it must always route through the control plane and keeps
    /// working with ingress fully locked down.
    pub async fn shell(&self, name: &str, namespace: &str) -> KataboxResult<ExecChannel> {
        let pod = self.running_pod(name, namespace).await?;
        self.orchestrator
            .exec(ExecRequest {
                namespace: namespace.to_string(),
                pod,
                command: vec!["/bin/sh".to_string()],
                stdin: true,
                tty: true,
            })
            .await
    }

    /// Run one command in a sandbox and collect its output.
    pub async fn exec(
        &self,
        name: &str,
        namespace: &str,
        command: &str,
    ) -> KataboxResult<ExecResult> {
        let started = Instant::now();
        let pod = self.running_pod(name, namespace).await?;
        let mut channel = self
            .orchestrator
            .exec(ExecRequest {
                namespace: namespace.to_string(),
                pod,
                command: vec![
                    "/bin/sh".to_string(),
                    "-c".to_string(),
                    command.to_string(),
                ],
                stdin: false,
                tty: false,
            })
            .await?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = 0;
        while let Some(message) = channel.next_message().await {
            match message? {
                ExecMessage::Stdout(data) => stdout.extend_from_slice(&data),
                ExecMessage::Stderr(data) => stderr.extend_from_slice(&data),
                ExecMessage::Exited(status) => {
                    exit_code = status.exit_code;
                    break;
                }
            }
        }

        Ok(ExecResult {
            exit_code,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn running_pod(&self, name: &str, namespace: &str) -> KataboxResult<String> {
        let deployment = self
            .retry("get deployment", || {
                self.orchestrator.get_deployment(namespace, name)
            })
            .await?;
        if deployment.is_none() {
            return Err(KataboxError::NotFound(format!(
                "sandbox {} not found in namespace {}",
                name, namespace
            )));
        }

        let selector = app_selector(name);
        let pods = self
            .retry("list pods", || {
                self.orchestrator.list_pods(namespace, &selector)
            })
            .await?;
        pods.iter()
            .find(|p| p.status.phase.as_deref() == Some("Running"))
            .map(|p| p.metadata.name.clone())
            .ok_or_else(|| {
                KataboxError::InvalidState(format!("sandbox {} has no running pod", name))
            })
    }

    /// Resource usage for running sandboxes. Sandboxes without metrics
    /// yet are skipped rather than failing the sweep.
    pub async fn metrics(&self, namespace: Option<&str>) -> KataboxResult<Vec<SandboxMetrics>> {
        let states = self.list(namespace).await?;
        let mut collected = Vec::new();

        for state in states {
            if state.status != SandboxStatus::Running {
                continue;
            }
            let pods = match self
                .orchestrator
                .list_pods(&state.namespace, &app_selector(&state.name))
                .await
            {
                Ok(pods) => pods,
                Err(_) => continue,
            };
            let Some(pod) = pods.first() else { continue };
            let usage = match self
                .orchestrator
                .pod_metrics(&state.namespace, &pod.metadata.name)
                .await
            {
                Ok(Some(metrics)) => metrics
                    .containers
                    .first()
                    .map(|c| c.usage.clone())
                    .unwrap_or_default(),
                Ok(None) => continue,
                Err(err) => {
                    tracing::debug!(sandbox = %state.name, error = %err, "metrics unavailable");
                    continue;
                }
            };
            collected.push(SandboxMetrics {
                name: state.name,
                namespace: state.namespace,
                cpu_usage: usage.get("cpu").cloned().unwrap_or_else(|| "0n".into()),
                memory_usage: usage.get("memory").cloned().unwrap_or_else(|| "0Ki".into()),
            });
        }

        Ok(collected)
    }

    /// Cancellable, restartable stream of state snapshots.
    ///
    /// Polls at the configured interval; suspension happens only at the
    /// poll boundary, so cancelling never leaves a partially-applied
    /// manifest set. The stream ends after a terminal state or when the
    /// token fires.
    pub fn watch<'a>(
        &'a self,
        name: &'a str,
        namespace: &'a str,
        cancel: CancellationToken,
    ) -> impl Stream<Item = KataboxResult<SandboxState>> + 'a {
        async_stream::stream! {
            loop {
                match self.get(name, namespace).await {
                    Ok(state) => {
                        let terminal = state.status.is_terminal();
                        yield Ok(state);
                        if terminal {
                            break;
                        }
                    }
                    Err(KataboxError::NotFound(_)) => {
                        yield Ok(SandboxState::new(name, namespace, SandboxStatus::Deleted));
                        break;
                    }
                    Err(err) => {
                        yield Err(err);
                        break;
                    }
                }

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.options.poll_interval) => {}
                }
            }
        }
    }

    // --- internals --------------------------------------------------------

    async fn retry<T, F, Fut>(&self, what: &str, op: F) -> KataboxResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = KataboxResult<T>>,
    {
        retry::with_backoff(&self.options.retry, what, op).await
    }

    fn identity_lock(&self, id: &SandboxId) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.lock().entry(id.clone()).or_default().clone()
    }

    fn track(&self, state: SandboxState) {
        let id = identity(&state.namespace, &state.name);
        self.registry.write().insert(
            id,
            TrackedState {
                state,
                tracked_at: Instant::now(),
            },
        );
    }

    /// A tracked terminal failure outlives optimistic derived states: a
    /// script-timeout sandbox stays `Failed` even though the cluster only
    /// shows an unready pod.
    fn merge_tracked(&self, derived: SandboxState) -> SandboxState {
        let id = identity(&derived.namespace, &derived.name);
        let registry = self.registry.read();
        if let Some(tracked) = registry.get(&id) {
            if tracked.state.status == SandboxStatus::Failed
                && derived.status != SandboxStatus::Terminating
            {
                let mut state = tracked.state.clone();
                state.restarts = derived.restarts;
                state.observed_at = derived.observed_at;
                return state;
            }
        }
        derived
    }

    fn sweep_registry(&self) {
        let retention = self.options.retention;
        self.registry
            .write()
            .retain(|_, t| !t.state.status.is_terminal() || t.tracked_at.elapsed() < retention);
    }
}

fn identity(namespace: &str, name: &str) -> SandboxId {
    (namespace.to_string(), name.to_string())
}

fn app_selector(name: &str) -> String {
    format!("{}={}", labels::APP, name)
}
