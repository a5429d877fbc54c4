//! Manifest composition.
//!
//! Builds the complete, deterministic set of cluster objects for one
//! sandbox: workload deployment, optional env secret, and the derived
//! network policies. The same inputs always produce the same objects.
//!
//! The before-script sequencing contract lives here: the script runs
//! inside the main container before the readiness marker is touched, the
//! readiness probe gates on the marker, and the controller applies the
//! egress policy only once the pod reports Ready. Package installs at
//! setup time therefore see the open network; the locked-down posture
//! applies for actual execution.

use std::collections::BTreeMap;

use crate::constants::{filenames, injected_envs, labels, suffixes, timing};
use crate::errors::KataboxResult;
use crate::netpol::{self, NetworkPolicySet};
use crate::objects::{
    Container, Deployment, DeploymentSpec, EnvFromSource, EnvVar, ExecAction, LabelSelector,
    NetworkPolicy, ObjectMeta, PodSpec, PodTemplateSpec, Probe, Secret, SecretEnvSource,
};
use crate::options::EngineOptions;
use crate::profile::{self, ResourceProfile};
use crate::spec::SandboxSpec;

/// Name of the single container in every sandbox pod.
pub const CONTAINER_NAME: &str = "sandbox";

/// The full object set realizing one sandbox.
#[derive(Clone, Debug)]
pub struct ManifestSet {
    /// Env secret, present only when the spec resolved an env file.
    pub secret: Option<Secret>,
    /// The workload.
    pub deployment: Deployment,
    /// Ingress deny-all; applied together with the workload.
    pub deny_ingress: NetworkPolicy,
    /// Egress whitelist policy; applied only after the sandbox is Ready.
    pub egress: Option<NetworkPolicy>,
}

impl ManifestSet {
    /// Whether create must wait for readiness before finishing: either a
    /// before-script needs supervision or an egress policy is pending.
    pub fn gates_on_ready(&self) -> bool {
        self.egress.is_some()
    }
}

/// Build the manifest set for a spec. Validates the spec, resolves the
/// env file, translates the resource profile, and synthesizes policies.
pub fn build(spec: &SandboxSpec, options: &EngineOptions) -> KataboxResult<ManifestSet> {
    spec.validate()?;
    let env_vars = spec.resolve_env_file()?;
    let profile = profile::translate(spec, options)?;
    let NetworkPolicySet {
        deny_ingress,
        egress,
    } = netpol::synthesize(spec, options.egress_restriction);

    let secret = env_vars.map(|vars| {
        Secret::new(
            ObjectMeta::named(env_secret_name(&spec.name), spec.namespace.clone()),
            vars,
        )
    });

    let deployment = build_deployment(spec, &profile, secret.is_some(), options);

    Ok(ManifestSet {
        secret,
        deployment,
        deny_ingress,
        egress,
    })
}

/// Name of the env secret for a sandbox.
pub fn env_secret_name(sandbox: &str) -> String {
    format!("{}{}", sandbox, suffixes::ENV_SECRET)
}

/// Names of the network policies for a sandbox.
pub fn policy_names(sandbox: &str) -> (String, String) {
    (
        format!("{}{}", sandbox, suffixes::INGRESS_POLICY),
        format!("{}{}", sandbox, suffixes::EGRESS_POLICY),
    )
}

fn build_deployment(
    spec: &SandboxSpec,
    profile: &ResourceProfile,
    has_secret: bool,
    options: &EngineOptions,
) -> Deployment {
    let mut pod_labels = BTreeMap::new();
    pod_labels.insert(labels::APP.to_string(), spec.name.clone());
    pod_labels.insert(labels::SANDBOX.to_string(), spec.name.clone());

    let mut deployment_labels = pod_labels.clone();
    deployment_labels.insert(labels::RUNTIME.to_string(), profile.runtime_class.clone());

    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: spec.image.clone(),
        command: vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            main_command(spec.before_script.as_deref()),
        ],
        env: vec![
            EnvVar {
                name: injected_envs::SANDBOX_NAME.to_string(),
                value: spec.name.clone(),
            },
            EnvVar {
                name: injected_envs::SANDBOX_NAMESPACE.to_string(),
                value: spec.namespace.clone(),
            },
        ],
        env_from: if has_secret {
            vec![EnvFromSource {
                secret_ref: SecretEnvSource {
                    name: env_secret_name(&spec.name),
                },
            }]
        } else {
            vec![]
        },
        resources: Some(profile.resource_requirements()),
        security_context: Some(profile.container_security_context()),
        readiness_probe: Some(readiness_probe(
            spec.before_script.is_some(),
            options.before_script_timeout.as_secs(),
        )),
    };

    Deployment::new(
        ObjectMeta::named(spec.name.clone(), spec.namespace.clone())
            .with_labels(deployment_labels),
        DeploymentSpec {
            replicas: 1,
            selector: LabelSelector::single(labels::APP, spec.name.clone()),
            template: PodTemplateSpec {
                metadata: ObjectMeta {
                    labels: pod_labels,
                    ..ObjectMeta::default()
                },
                spec: PodSpec {
                    containers: vec![container],
                    runtime_class_name: Some(profile.runtime_class.clone()),
                    restart_policy: Some("Always".to_string()),
                    security_context: profile.pod_security_context(),
                },
            },
        },
    )
}

/// The wrapped main command.
///
/// With a before-script: strict shell, stale marker removed, script run to
/// completion, marker touched, then the long sleep that keeps the sandbox
/// alive for exec sessions. A script failure halts startup so the pod
/// never reports Ready.
fn main_command(before_script: Option<&str>) -> String {
    match before_script {
        Some(script) => format!(
            "set -euo pipefail; rm -f {marker}; {script}; touch {marker}; exec sleep 365d",
            marker = filenames::BEFORE_DONE_MARKER,
            script = script.trim(),
        ),
        None => "sleep 365d".to_string(),
    }
}

/// Readiness flips only after the marker exists. Without a before-script
/// the probe is an immediate `true`.
fn readiness_probe(has_script: bool, timeout_secs: u64) -> Probe {
    if has_script {
        let period = timing::PROBE_PERIOD_SECS;
        let failure_threshold = (timeout_secs as i32 / period).max(1);
        Probe {
            exec: ExecAction {
                command: vec![
                    "/bin/sh".to_string(),
                    "-c".to_string(),
                    format!("test -f {}", filenames::BEFORE_DONE_MARKER),
                ],
            },
            initial_delay_seconds: 1,
            period_seconds: period,
            timeout_seconds: Some(2),
            failure_threshold: Some(failure_threshold),
        }
    } else {
        Probe {
            exec: ExecAction {
                command: vec!["/bin/sh".to_string(), "-c".to_string(), "true".to_string()],
            },
            initial_delay_seconds: 0,
            period_seconds: timing::PROBE_PERIOD_SECS,
            timeout_seconds: None,
            failure_threshold: None,
        }
    }
}
