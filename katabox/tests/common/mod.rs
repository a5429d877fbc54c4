//! In-memory orchestrator for controller tests.
//!
//! Stores objects in hash maps, synthesizes pod status from knobs
//! (readiness delay, image-pull failure, flaky transport), and records
//! an ordered operation log so tests can assert sequencing contracts.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use katabox::objects::{
    ContainerMetrics, Deployment, NetworkPolicy, ObjectMeta, Pod, PodMetrics, Secret,
};
use katabox::orchestrator::{ExecChannel, ExecMessage, ExecRequest, Orchestrator};
use katabox::{
    EngineOptions, KataboxError, KataboxResult, LifecycleController, RetryPolicy,
};

type Key = (String, String);

#[derive(Default)]
pub struct ClusterState {
    pub deployments: HashMap<Key, Deployment>,
    pub secrets: HashMap<Key, Secret>,
    pub policies: HashMap<Key, NetworkPolicy>,
    /// list_pods calls per sandbox, to model readiness delays.
    pub polls: HashMap<Key, u32>,
    /// Ordered operation log: "create deployment/t1", "delete policy/...".
    pub log: Vec<String>,
}

#[derive(Default)]
pub struct MockBehavior {
    /// Pods report Ready only after this many list_pods calls.
    pub ready_after_polls: u32,
    /// Sandboxes whose pods never become ready.
    pub never_ready: HashSet<String>,
    /// Sandboxes whose pods sit in ErrImagePull.
    pub image_pull_failures: HashSet<String>,
    /// Deployments whose deletion fails.
    pub fail_deletes: HashSet<String>,
    /// Budget of leading get_deployment calls that fail transiently.
    pub flaky_gets: u32,
    /// Exec output script: (stdout chunks, stderr chunks, exit code).
    pub exec_output: Option<(Vec<&'static str>, Vec<&'static str>, i32)>,
}

#[derive(Default)]
pub struct MockOrchestrator {
    pub state: Mutex<ClusterState>,
    pub behavior: Mutex<MockBehavior>,
}

impl MockOrchestrator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn log(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    pub fn policy(&self, namespace: &str, name: &str) -> Option<NetworkPolicy> {
        self.state
            .lock()
            .policies
            .get(&key(namespace, name))
            .cloned()
    }

    fn record(&self, entry: String) {
        self.state.lock().log.push(entry);
    }

    fn synth_pod(&self, namespace: &str, name: &str) -> Pod {
        let behavior = self.behavior.lock();
        let mut state = self.state.lock();
        let polls = state.polls.entry(key(namespace, name)).or_insert(0);
        *polls += 1;

        let image_pull_failed = behavior.image_pull_failures.contains(name);
        let ready = !image_pull_failed
            && !behavior.never_ready.contains(name)
            && *polls > behavior.ready_after_polls;

        let mut pod: Pod = serde_json::from_value(serde_json::json!({
            "metadata": {
                "name": format!("{}-pod", name),
                "namespace": namespace,
                "labels": {"app": name, "katabox.io/sandbox": name}
            },
            "status": {
                "phase": if image_pull_failed { "Pending" } else { "Running" },
                "conditions": [{"type": "Ready", "status": if ready { "True" } else { "False" }}]
            }
        }))
        .unwrap();
        if image_pull_failed {
            pod.status.container_statuses = serde_json::from_value(serde_json::json!([
                {"name": "sandbox", "state": {"waiting": {"reason": "ErrImagePull"}}}
            ]))
            .unwrap();
        }
        pod
    }
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn meta_key(meta: &ObjectMeta, namespace: &str) -> Key {
    key(
        meta.namespace.as_deref().unwrap_or(namespace),
        &meta.name,
    )
}

#[async_trait]
impl Orchestrator for MockOrchestrator {
    async fn create_deployment(&self, namespace: &str, body: &Deployment) -> KataboxResult<()> {
        let k = meta_key(&body.metadata, namespace);
        let mut state = self.state.lock();
        if state.deployments.contains_key(&k) {
            return Err(KataboxError::Conflict(format!(
                "deployment {} already exists",
                body.metadata.name
            )));
        }
        state
            .log
            .push(format!("create deployment/{}", body.metadata.name));
        state.deployments.insert(k, body.clone());
        Ok(())
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> KataboxResult<Option<Deployment>> {
        {
            let mut behavior = self.behavior.lock();
            if behavior.flaky_gets > 0 {
                behavior.flaky_gets -= 1;
                return Err(KataboxError::Unavailable("connection refused".into()));
            }
        }
        Ok(self.state.lock().deployments.get(&key(namespace, name)).cloned())
    }

    async fn list_deployments(
        &self,
        namespace: Option<&str>,
        _label_selector: &str,
    ) -> KataboxResult<Vec<Deployment>> {
        Ok(self
            .state
            .lock()
            .deployments
            .iter()
            .filter(|((ns, _), _)| namespace.map_or(true, |want| want == ns))
            .map(|(_, d)| d.clone())
            .collect())
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> KataboxResult<bool> {
        if self.behavior.lock().fail_deletes.contains(name) {
            return Err(KataboxError::Internal("etcd write failed".into()));
        }
        self.record(format!("delete deployment/{}", name));
        Ok(self
            .state
            .lock()
            .deployments
            .remove(&key(namespace, name))
            .is_some())
    }

    async fn create_secret(&self, namespace: &str, body: &Secret) -> KataboxResult<()> {
        let k = meta_key(&body.metadata, namespace);
        self.record(format!("create secret/{}", body.metadata.name));
        self.state.lock().secrets.insert(k, body.clone());
        Ok(())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> KataboxResult<bool> {
        Ok(self
            .state
            .lock()
            .secrets
            .remove(&key(namespace, name))
            .is_some())
    }

    async fn create_network_policy(
        &self,
        namespace: &str,
        body: &NetworkPolicy,
    ) -> KataboxResult<()> {
        let k = meta_key(&body.metadata, namespace);
        let mut state = self.state.lock();
        if state.policies.contains_key(&k) {
            return Err(KataboxError::Conflict(format!(
                "policy {} already exists",
                body.metadata.name
            )));
        }
        state
            .log
            .push(format!("create policy/{}", body.metadata.name));
        state.policies.insert(k, body.clone());
        Ok(())
    }

    async fn delete_network_policy(&self, namespace: &str, name: &str) -> KataboxResult<bool> {
        self.record(format!("delete policy/{}", name));
        Ok(self
            .state
            .lock()
            .policies
            .remove(&key(namespace, name))
            .is_some())
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> KataboxResult<Vec<Pod>> {
        let name = label_selector
            .strip_prefix("app=")
            .unwrap_or(label_selector)
            .to_string();
        if !self
            .state
            .lock()
            .deployments
            .contains_key(&key(namespace, &name))
        {
            return Ok(vec![]);
        }
        Ok(vec![self.synth_pod(namespace, &name)])
    }

    async fn pod_metrics(&self, namespace: &str, pod: &str) -> KataboxResult<Option<PodMetrics>> {
        Ok(Some(PodMetrics {
            metadata: ObjectMeta::named(pod, namespace),
            containers: vec![ContainerMetrics {
                name: "sandbox".into(),
                usage: [
                    ("cpu".to_string(), "12m".to_string()),
                    ("memory".to_string(), "100Mi".to_string()),
                ]
                .into_iter()
                .collect(),
            }],
        }))
    }

    async fn exec(&self, request: ExecRequest) -> KataboxResult<ExecChannel> {
        self.record(format!("exec pod/{}", request.pod));
        let (stdout, stderr, exit_code) = self
            .behavior
            .lock()
            .exec_output
            .clone()
            .unwrap_or((vec![], vec![], 0));

        let messages: Vec<KataboxResult<ExecMessage>> = stdout
            .into_iter()
            .map(|s| Ok(ExecMessage::Stdout(s.as_bytes().to_vec())))
            .chain(
                stderr
                    .into_iter()
                    .map(|s| Ok(ExecMessage::Stderr(s.as_bytes().to_vec()))),
            )
            .chain(std::iter::once(Ok(ExecMessage::Exited(
                katabox::ExecStatus {
                    exit_code,
                    message: None,
                },
            ))))
            .collect();

        Ok(ExecChannel::new(
            Box::pin(tokio::io::sink()),
            Box::pin(futures::stream::iter(messages)),
        ))
    }
}

/// Test context: controller over a mock cluster with fast timings.
pub struct TestContext {
    pub orchestrator: Arc<MockOrchestrator>,
    pub controller: LifecycleController,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_options(fast_options())
    }

    pub fn with_options(options: EngineOptions) -> Self {
        let orchestrator = MockOrchestrator::new();
        let controller = LifecycleController::new(orchestrator.clone(), options);
        Self {
            orchestrator,
            controller,
        }
    }
}

pub fn fast_options() -> EngineOptions {
    let mut options = EngineOptions::default();
    options.poll_interval = Duration::from_millis(5);
    options.before_script_timeout = Duration::from_millis(200);
    options.teardown_timeout = Duration::from_millis(200);
    options.retry = RetryPolicy {
        max_attempts: 4,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
    };
    options
}
