//! Operator configuration for the katabox engine.

use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{envs, filenames, limit_defaults, retry_defaults, timing};
use crate::errors::{KataboxError, KataboxResult};

/// Whether egress lockdown is applied to sandboxes at all.
///
/// `Enabled` is the default posture: sandboxes with a non-empty whitelist
/// are restricted to it (plus DNS). Disabling restriction is a distinct
/// operator decision, never something a sandbox spec can request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EgressRestriction {
    Enabled,
    Disabled,
}

/// Retry policy for transient orchestrator failures.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Attempt ceiling, including the first try.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles per attempt.
    pub base_delay: Duration,
    /// Ceiling on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: retry_defaults::MAX_ATTEMPTS,
            base_delay: Duration::from_millis(retry_defaults::BASE_DELAY_MS),
            max_delay: Duration::from_millis(retry_defaults::MAX_DELAY_MS),
        }
    }
}

/// Default resource ceilings applied when a spec leaves a limit unset.
#[derive(Clone, Debug)]
pub struct DefaultLimits {
    pub cpu: String,
    pub memory: String,
    pub ephemeral_storage: String,
}

impl Default for DefaultLimits {
    fn default() -> Self {
        Self {
            cpu: limit_defaults::CPU.to_string(),
            memory: limit_defaults::MEMORY.to_string(),
            ephemeral_storage: limit_defaults::EPHEMERAL_STORAGE.to_string(),
        }
    }
}

/// Engine configuration.
///
/// # Examples
///
/// ```rust,no_run
/// use katabox::EngineOptions;
///
/// // Defaults only
/// let opts = EngineOptions::default();
///
/// // Builder style
/// let opts = EngineOptions::default()
///     .with_runtime_class("kata-fc")
///     .with_kubeconfig("/etc/rancher/k3s/k3s.yaml");
///
/// // From environment variables
/// let opts = EngineOptions::from_env().unwrap();
/// ```
#[derive(Clone, Debug)]
pub struct EngineOptions {
    /// Explicit kubeconfig path. `None` probes the k3s path, then
    /// `~/.kube/config`.
    pub kubeconfig: Option<PathBuf>,

    /// Runtime class every sandbox workload runs under.
    pub runtime_class: String,

    /// Fallback resource ceilings.
    pub default_limits: DefaultLimits,

    /// Egress lockdown posture.
    pub egress_restriction: EgressRestriction,

    /// Bound on before-script execution.
    pub before_script_timeout: Duration,

    /// Controller poll interval.
    pub poll_interval: Duration,

    /// Bound on delete confirmation.
    pub teardown_timeout: Duration,

    /// Retention window for terminal state records.
    pub retention: Duration,

    /// API key store location.
    pub api_keys_file: PathBuf,

    /// Retry policy for transient orchestrator failures.
    pub retry: RetryPolicy,

    /// Bounded fan-out for `delete_all`.
    pub delete_concurrency: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            runtime_class: crate::constants::cluster::DEFAULT_RUNTIME_CLASS.to_string(),
            default_limits: DefaultLimits::default(),
            egress_restriction: EgressRestriction::Enabled,
            before_script_timeout: Duration::from_secs(timing::BEFORE_SCRIPT_TIMEOUT_SECS),
            poll_interval: Duration::from_millis(timing::POLL_INTERVAL_MS),
            teardown_timeout: Duration::from_secs(timing::TEARDOWN_TIMEOUT_SECS),
            retention: Duration::from_secs(timing::RETENTION_SECS),
            api_keys_file: PathBuf::from(filenames::API_KEYS_FILE),
            retry: RetryPolicy::default(),
            delete_concurrency: crate::constants::concurrency::DELETE_ALL_LIMIT,
        }
    }
}

impl EngineOptions {
    /// Create options from environment variables, falling back to defaults
    /// for anything unset.
    ///
    /// Reads:
    /// - `KATABOX_KUBECONFIG`
    /// - `KATABOX_RUNTIME_CLASS`
    /// - `KATABOX_EGRESS_RESTRICTION` (`enabled` | `disabled`)
    /// - `KATABOX_BEFORE_SCRIPT_TIMEOUT` (seconds)
    /// - `KATABOX_API_KEYS_FILE`
    pub fn from_env() -> KataboxResult<Self> {
        let mut opts = Self::default();

        if let Ok(path) = std::env::var(envs::KATABOX_KUBECONFIG) {
            opts.kubeconfig = Some(PathBuf::from(path));
        }
        if let Ok(class) = std::env::var(envs::KATABOX_RUNTIME_CLASS) {
            opts.runtime_class = class;
        }
        if let Ok(mode) = std::env::var(envs::KATABOX_EGRESS_RESTRICTION) {
            opts.egress_restriction = match mode.to_ascii_lowercase().as_str() {
                "enabled" => EgressRestriction::Enabled,
                "disabled" => EgressRestriction::Disabled,
                other => {
                    return Err(KataboxError::Config(format!(
                        "{} must be 'enabled' or 'disabled', got '{}'",
                        envs::KATABOX_EGRESS_RESTRICTION,
                        other
                    )));
                }
            };
        }
        if let Ok(secs) = std::env::var(envs::KATABOX_BEFORE_SCRIPT_TIMEOUT) {
            let secs: u64 = secs.parse().map_err(|_| {
                KataboxError::Config(format!(
                    "{} must be an integer number of seconds",
                    envs::KATABOX_BEFORE_SCRIPT_TIMEOUT
                ))
            })?;
            opts.before_script_timeout = Duration::from_secs(secs);
        }
        if let Ok(path) = std::env::var(envs::KATABOX_API_KEYS_FILE) {
            opts.api_keys_file = PathBuf::from(path);
        }

        Ok(opts)
    }

    /// Builder-style: set the kubeconfig path.
    pub fn with_kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }

    /// Builder-style: set the runtime class.
    pub fn with_runtime_class(mut self, class: impl Into<String>) -> Self {
        self.runtime_class = class.into();
        self
    }

    /// Builder-style: set the egress restriction posture.
    pub fn with_egress_restriction(mut self, mode: EgressRestriction) -> Self {
        self.egress_restriction = mode;
        self
    }

    /// Builder-style: set the API key store path.
    pub fn with_api_keys_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.api_keys_file = path.into();
        self
    }

    /// Builder-style: set the before-script timeout.
    pub fn with_before_script_timeout(mut self, timeout: Duration) -> Self {
        self.before_script_timeout = timeout;
        self
    }

    /// Builder-style: set the controller poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}
