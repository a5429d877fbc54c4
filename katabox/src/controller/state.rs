//! Sandbox state model.
//!
//! The controller is a stateless reconciler: state is derived from what
//! the orchestrator reports on each poll, so missed transitions are
//! tolerated by construction. The only controller-private additions are
//! terminal failure annotations (a before-script timeout looks like an
//! unready pod to the cluster) and retention of `Deleted` records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::objects::{Deployment, Pod};

/// Lifecycle phases of a sandbox.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SandboxStatus {
    /// Accepted by the orchestrator; no pod running yet.
    Pending,
    /// Pod is up, before-script still running (not Ready).
    Initializing,
    /// Ready; network lockdown, if any, is in force.
    Running,
    /// Deletion requested; objects still being removed.
    Terminating,
    /// Teardown confirmed.
    Deleted,
    /// Unrecoverable error; terminal until explicit deletion.
    Failed,
}

impl SandboxStatus {
    /// Terminal states stop watch streams and become eligible for
    /// retention sweeps.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SandboxStatus::Deleted | SandboxStatus::Failed)
    }
}

impl fmt::Display for SandboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SandboxStatus::Pending => "Pending",
            SandboxStatus::Initializing => "Initializing",
            SandboxStatus::Running => "Running",
            SandboxStatus::Terminating => "Terminating",
            SandboxStatus::Deleted => "Deleted",
            SandboxStatus::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Last observed condition of a sandbox.
#[derive(Clone, Debug, Serialize)]
pub struct SandboxState {
    pub name: String,
    pub namespace: String,
    pub status: SandboxStatus,
    /// Last observed reason, populated for failures and odd conditions.
    pub reason: Option<String>,
    pub image: Option<String>,
    pub restarts: i32,
    pub created_at: Option<DateTime<Utc>>,
    pub observed_at: DateTime<Utc>,
}

impl SandboxState {
    pub(crate) fn new(name: &str, namespace: &str, status: SandboxStatus) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            status,
            reason: None,
            image: None,
            restarts: 0,
            created_at: None,
            observed_at: Utc::now(),
        }
    }

    pub(crate) fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Waiting reasons that mark a sandbox unrecoverably failed.
fn failure_reason(waiting: &str) -> bool {
    matches!(
        waiting,
        "ErrImagePull" | "ImagePullBackOff" | "CrashLoopBackOff" | "CreateContainerError"
    )
}

/// Derive the state of an existing sandbox from its deployment and pods.
pub(crate) fn derive(name: &str, namespace: &str, deployment: &Deployment, pods: &[Pod]) -> SandboxState {
    let mut state = SandboxState::new(name, namespace, SandboxStatus::Pending);
    state.created_at = deployment.metadata.creation_timestamp;
    state.image = deployment
        .spec
        .template
        .spec
        .containers
        .first()
        .map(|c| c.image.clone());

    if deployment.metadata.deletion_timestamp.is_some() {
        state.status = SandboxStatus::Terminating;
        return state;
    }

    let Some(pod) = pods.first() else {
        return state;
    };
    state.restarts = pod.restarts();

    if let Some(reason) = pod.waiting_reason() {
        if failure_reason(reason) {
            state.status = SandboxStatus::Failed;
            state.reason = Some(reason.to_string());
            return state;
        }
    }

    if pod.metadata.deletion_timestamp.is_some() {
        state.status = SandboxStatus::Terminating;
        return state;
    }

    match pod.status.phase.as_deref() {
        Some("Running") if pod.is_ready() => state.status = SandboxStatus::Running,
        Some("Running") => state.status = SandboxStatus::Initializing,
        Some("Failed") => {
            state.status = SandboxStatus::Failed;
            state.reason = pod.status.phase.clone();
        }
        _ => state.status = SandboxStatus::Pending,
    }

    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest;
    use crate::options::EngineOptions;
    use crate::spec::SandboxSpec;

    fn deployment() -> Deployment {
        manifest::build(&SandboxSpec::new("t1", "alpine:latest"), &EngineOptions::default())
            .unwrap()
            .deployment
    }

    fn pod(json: serde_json::Value) -> Pod {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_no_pods_is_pending() {
        let state = derive("t1", "default", &deployment(), &[]);
        assert_eq!(state.status, SandboxStatus::Pending);
        assert_eq!(state.image.as_deref(), Some("alpine:latest"));
    }

    #[test]
    fn test_running_unready_is_initializing() {
        let p = pod(serde_json::json!({
            "metadata": {"name": "t1-abc"},
            "status": {
                "phase": "Running",
                "conditions": [{"type": "Ready", "status": "False"}]
            }
        }));
        let state = derive("t1", "default", &deployment(), &[p]);
        assert_eq!(state.status, SandboxStatus::Initializing);
    }

    #[test]
    fn test_ready_is_running() {
        let p = pod(serde_json::json!({
            "metadata": {"name": "t1-abc"},
            "status": {
                "phase": "Running",
                "conditions": [{"type": "Ready", "status": "True"}]
            }
        }));
        let state = derive("t1", "default", &deployment(), &[p]);
        assert_eq!(state.status, SandboxStatus::Running);
    }

    #[test]
    fn test_image_pull_backoff_is_failed() {
        let p = pod(serde_json::json!({
            "metadata": {"name": "t1-abc"},
            "status": {
                "phase": "Pending",
                "containerStatuses": [{
                    "name": "sandbox",
                    "state": {"waiting": {"reason": "ImagePullBackOff"}}
                }]
            }
        }));
        let state = derive("t1", "default", &deployment(), &[p]);
        assert_eq!(state.status, SandboxStatus::Failed);
        assert_eq!(state.reason.as_deref(), Some("ImagePullBackOff"));
    }

    #[test]
    fn test_deleting_deployment_is_terminating() {
        let mut dep = deployment();
        dep.metadata.deletion_timestamp = Some(Utc::now());
        let state = derive("t1", "default", &dep, &[]);
        assert_eq!(state.status, SandboxStatus::Terminating);
    }

    #[test]
    fn test_terminal_states() {
        assert!(SandboxStatus::Deleted.is_terminal());
        assert!(SandboxStatus::Failed.is_terminal());
        assert!(!SandboxStatus::Running.is_terminal());
        assert!(!SandboxStatus::Terminating.is_terminal());
    }
}
