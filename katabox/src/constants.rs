//! Constants for the katabox engine.
//!
//! Centralized location for label keys, object-name suffixes, environment
//! variable names, and resource defaults. The controller and the manifest
//! builder must agree on every name here.

/// Labels applied to the objects we manage.
pub mod labels {
    /// Sandbox identity label. The deny-ingress policy selects on this,
    /// never on the namespace as a whole.
    pub const SANDBOX: &str = "katabox.io/sandbox";

    /// Pod selector label shared by the deployment and its pods.
    pub const APP: &str = "app";

    /// Runtime marker on sandbox deployments, used by list queries.
    pub const RUNTIME: &str = "runtime";
}

/// Suffixes appended to the sandbox name to derive object names.
pub mod suffixes {
    /// Secret holding the resolved env-file variables.
    pub const ENV_SECRET: &str = "-env";

    /// Egress whitelist NetworkPolicy.
    pub const EGRESS_POLICY: &str = "-netpol";

    /// Hardcoded ingress-deny NetworkPolicy.
    pub const INGRESS_POLICY: &str = "-deny-ingress";
}

/// Environment variables read by `EngineOptions::from_env`.
pub mod envs {
    pub const KATABOX_KUBECONFIG: &str = "KATABOX_KUBECONFIG";
    pub const KATABOX_RUNTIME_CLASS: &str = "KATABOX_RUNTIME_CLASS";
    pub const KATABOX_EGRESS_RESTRICTION: &str = "KATABOX_EGRESS_RESTRICTION";
    pub const KATABOX_BEFORE_SCRIPT_TIMEOUT: &str = "KATABOX_BEFORE_SCRIPT_TIMEOUT";
    pub const KATABOX_API_KEYS_FILE: &str = "KATABOX_API_KEYS_FILE";
}

/// Environment variables injected into every sandbox container.
pub mod injected_envs {
    pub const SANDBOX_NAME: &str = "KATABOX_SANDBOX";
    pub const SANDBOX_NAMESPACE: &str = "KATABOX_NAMESPACE";
}

/// Cluster-side names fixed by installer convention.
pub mod cluster {
    /// VM-isolated runtime class the installer provisions.
    pub const DEFAULT_RUNTIME_CLASS: &str = "kata";

    /// Namespace label key used to select the DNS namespace.
    pub const NAMESPACE_NAME_LABEL: &str = "kubernetes.io/metadata.name";

    /// Namespace hosting the cluster DNS service.
    pub const DNS_NAMESPACE: &str = "kube-system";

    /// Label selecting the cluster DNS pods.
    pub const DNS_POD_LABEL_KEY: &str = "k8s-app";
    pub const DNS_POD_LABEL_VALUE: &str = "kube-dns";

    /// DNS service port.
    pub const DNS_PORT: i32 = 53;
}

/// Resource defaults applied when a spec leaves a limit unset.
///
/// Sized externally so that default memory times the node's configured
/// sandbox density fits physical capacity; these are the fallbacks when
/// the operator supplies nothing.
pub mod limit_defaults {
    pub const CPU: &str = "500m";
    pub const MEMORY: &str = "512Mi";
    pub const EPHEMERAL_STORAGE: &str = "1Gi";
}

/// Security defaults.
pub mod security {
    /// UID/GID/FSGroup used for non-root normalization. Pod-level non-root
    /// sets all three to this value so volume ownership and process UID
    /// agree.
    pub const NONROOT_ID: i64 = 65532;

    /// Seccomp profile type applied to every sandbox container.
    pub const SECCOMP_PROFILE: &str = "RuntimeDefault";
}

/// Timing defaults for the lifecycle controller.
pub mod timing {
    /// Seconds a before-script may run before the sandbox is failed.
    pub const BEFORE_SCRIPT_TIMEOUT_SECS: u64 = 300;

    /// Readiness probe period inside the sandbox pod.
    pub const PROBE_PERIOD_SECS: i32 = 2;

    /// Controller poll interval in milliseconds.
    pub const POLL_INTERVAL_MS: u64 = 2_000;

    /// Seconds to wait for object removal before a delete is reported
    /// unconfirmed.
    pub const TEARDOWN_TIMEOUT_SECS: u64 = 120;

    /// Seconds a `Failed`/`Deleted` record is retained for `get`/`list`.
    pub const RETENTION_SECS: u64 = 3_600;
}

/// Retry defaults for transient orchestrator failures.
pub mod retry_defaults {
    pub const MAX_ATTEMPTS: u32 = 5;
    pub const BASE_DELAY_MS: u64 = 200;
    pub const MAX_DELAY_MS: u64 = 5_000;
}

/// Concurrency limits.
pub mod concurrency {
    /// Bounded fan-out for `delete_all`.
    pub const DELETE_ALL_LIMIT: usize = 8;
}

/// File paths and name parts.
pub mod filenames {
    /// Default API key store location.
    pub const API_KEYS_FILE: &str = "/etc/katabox/api_keys.json";

    /// Default k3s kubeconfig path probed before `~/.kube/config`.
    pub const K3S_KUBECONFIG: &str = "/etc/rancher/k3s/k3s.yaml";

    /// Marker file the before-script wrapper touches on completion.
    pub const BEFORE_DONE_MARKER: &str = "/tmp/katabox_before_done";
}

/// API key format.
pub mod keys {
    /// Prefix on every generated plaintext key.
    pub const KEY_PREFIX: &str = "kbx_";

    /// Random bytes of key material.
    pub const KEY_BYTES: usize = 32;
}
