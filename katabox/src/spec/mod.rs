//! Sandbox spec model.
//!
//! `SandboxSpec` is the validated, in-memory representation of a sandbox
//! request. It is immutable once accepted for a create operation and never
//! touches the orchestrator itself; validation is the only side effect.

pub mod cidr;
pub mod quantity;

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{KataboxError, KataboxResult};

/// Per-sandbox resource ceilings. Unset fields fall back to the engine
/// defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    #[serde(
        default,
        rename = "ephemeral-storage",
        alias = "ephemeral_storage",
        skip_serializing_if = "Option::is_none"
    )]
    pub ephemeral_storage: Option<String>,
}

impl Limits {
    pub fn is_empty(&self) -> bool {
        self.cpu.is_none() && self.memory.is_none() && self.ephemeral_storage.is_none()
    }
}

/// Declarative description of a sandbox.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SandboxSpec {
    /// DNS-label-safe name, unique per namespace.
    pub name: String,

    /// Container image reference.
    pub image: String,

    /// Logical grouping/isolation domain.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Ordered CIDR whitelist. Empty means no egress rule is emitted —
    /// unrestricted egress, not "no internet".
    #[serde(default)]
    pub egress_whitelist: Vec<String>,

    /// Resource ceilings.
    #[serde(default)]
    pub limits: Limits,

    /// Shell text executed once at sandbox start, before network
    /// restrictions apply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_script: Option<String>,

    /// Path to a key/value env file, resolved client-side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_file: Option<PathBuf>,

    /// Capabilities dropped from the container. `None` drops ALL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cap_drop: Option<Vec<String>>,

    /// Capabilities explicitly added back.
    #[serde(default)]
    pub cap_add: Vec<String>,

    /// Run the container process as the fixed non-root UID.
    #[serde(default)]
    pub container_non_root: bool,

    /// Normalize UID/GID/FSGroup at the pod level.
    #[serde(default)]
    pub pod_non_root: bool,

    /// Override the VM runtime class for this sandbox.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_class: Option<String>,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl SandboxSpec {
    /// Minimal spec: a name and an image, everything else defaulted.
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            namespace: default_namespace(),
            egress_whitelist: Vec::new(),
            limits: Limits::default(),
            before_script: None,
            env_file: None,
            cap_drop: None,
            cap_add: Vec::new(),
            container_non_root: false,
            pod_non_root: false,
            runtime_class: None,
        }
    }

    /// Parse a spec from YAML and validate it.
    pub fn from_yaml(raw: &str) -> KataboxResult<Self> {
        let spec: SandboxSpec = serde_yaml::from_str(raw)
            .map_err(|e| KataboxError::Validation(format!("malformed sandbox spec: {}", e)))?;
        spec.validate()?;
        Ok(spec)
    }

    /// Validate name format, CIDR syntax, quantity syntax, and mutual
    /// consistency. Never touches the orchestrator.
    pub fn validate(&self) -> KataboxResult<()> {
        validate_dns_label(&self.name, "name")?;
        validate_dns_label(&self.namespace, "namespace")?;

        if self.image.trim().is_empty() {
            return Err(KataboxError::Validation("image must not be empty".into()));
        }

        for block in &self.egress_whitelist {
            cidr::validate_cidr(block)?;
        }

        if let Some(cpu) = &self.limits.cpu {
            quantity::parse_cpu_millis(cpu)?;
        }
        if let Some(memory) = &self.limits.memory {
            quantity::parse_bytes(memory)?;
        }
        if let Some(storage) = &self.limits.ephemeral_storage {
            quantity::parse_bytes(storage)?;
        }

        if let Some(script) = &self.before_script {
            if script.trim().is_empty() {
                return Err(KataboxError::Validation(
                    "before_script must not be blank; omit it instead".into(),
                ));
            }
        }

        if let Some(class) = &self.runtime_class {
            validate_dns_label(class, "runtime_class")?;
        }

        Ok(())
    }

    /// Resolve the env file into a key/value mapping.
    ///
    /// `Ok(None)` when the spec names no env file. An env file that exists
    /// but yields zero variables is a validation error, matching the
    /// contract that it must resolve to a readable key/value file before
    /// being embedded.
    pub fn resolve_env_file(&self) -> KataboxResult<Option<BTreeMap<String, String>>> {
        let Some(path) = &self.env_file else {
            return Ok(None);
        };
        let content = std::fs::read_to_string(path).map_err(|e| {
            KataboxError::Validation(format!(
                "env_file {} is not readable: {}",
                path.display(),
                e
            ))
        })?;
        let vars = parse_env_file(&content);
        if vars.is_empty() {
            return Err(KataboxError::Validation(format!(
                "env_file {} is empty or invalid; no variables parsed",
                path.display()
            )));
        }
        Ok(Some(vars))
    }
}

/// Parse dotenv-style lines. Blank lines, comments, and lines without `=`
/// are skipped; surrounding single or double quotes are stripped.
fn parse_env_file(content: &str) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value
            .trim()
            .trim_matches('"')
            .trim_matches('\'')
            .to_string();
        vars.insert(key.to_string(), value);
    }
    vars
}

/// RFC 1123 DNS label: lowercase alphanumerics and `-`, alphanumeric at
/// both ends, at most 63 characters.
fn validate_dns_label(value: &str, field: &str) -> KataboxResult<()> {
    let ok = !value.is_empty()
        && value.len() <= 63
        && value
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && !value.starts_with('-')
        && !value.ends_with('-');
    if !ok {
        return Err(KataboxError::Validation(format!(
            "{} '{}' is not a valid DNS label",
            field, value
        )));
    }
    Ok(())
}
