//! Resource profile translation.
//!
//! Maps a spec's limit declarations and security toggles onto enforceable
//! resource ceilings and a hardened security context. Privilege escalation
//! is disabled unconditionally; the caller cannot override it.

use std::collections::BTreeMap;

use crate::constants::security;
use crate::errors::KataboxResult;
use crate::objects::{
    Capabilities, PodSecurityContext, ResourceRequirements, SeccompProfile, SecurityContext,
};
use crate::options::EngineOptions;
use crate::spec::{quantity, SandboxSpec};

/// Concrete, fully-defaulted resource and security posture for a sandbox.
#[derive(Clone, Debug)]
pub struct ResourceProfile {
    pub cpu: String,
    pub memory: String,
    pub ephemeral_storage: String,
    pub cap_drop: Vec<String>,
    pub cap_add: Vec<String>,
    pub container_non_root: bool,
    pub pod_non_root: bool,
    pub runtime_class: String,
}

/// Translate limits and security flags into a profile, applying the
/// engine's defaults for anything unset.
pub fn translate(spec: &SandboxSpec, options: &EngineOptions) -> KataboxResult<ResourceProfile> {
    let defaults = &options.default_limits;

    let cpu = spec.limits.cpu.clone().unwrap_or_else(|| defaults.cpu.clone());
    let memory = spec
        .limits
        .memory
        .clone()
        .unwrap_or_else(|| defaults.memory.clone());
    let ephemeral_storage = spec
        .limits
        .ephemeral_storage
        .clone()
        .unwrap_or_else(|| defaults.ephemeral_storage.clone());

    // Defaults come from operator config; re-check them too so a bad
    // config fails here instead of at the orchestrator.
    quantity::parse_cpu_millis(&cpu)?;
    quantity::parse_bytes(&memory)?;
    quantity::parse_bytes(&ephemeral_storage)?;

    // No cap_drop at all means drop everything.
    let cap_drop = match &spec.cap_drop {
        None => vec!["ALL".to_string()],
        Some(caps) => caps.iter().map(|c| c.to_ascii_uppercase()).collect(),
    };
    let cap_add: Vec<String> = spec.cap_add.iter().map(|c| c.to_ascii_uppercase()).collect();

    Ok(ResourceProfile {
        cpu,
        memory,
        ephemeral_storage,
        cap_drop,
        cap_add,
        container_non_root: spec.container_non_root,
        pod_non_root: spec.pod_non_root,
        runtime_class: spec
            .runtime_class
            .clone()
            .unwrap_or_else(|| options.runtime_class.clone()),
    })
}

impl ResourceProfile {
    /// Limits applied as both limits and requests, so the scheduler
    /// reserves exactly what the ceiling allows.
    pub fn resource_requirements(&self) -> ResourceRequirements {
        let mut quantities = BTreeMap::new();
        quantities.insert("cpu".to_string(), self.cpu.clone());
        quantities.insert("memory".to_string(), self.memory.clone());
        quantities.insert("ephemeral-storage".to_string(), self.ephemeral_storage.clone());
        ResourceRequirements {
            limits: quantities.clone(),
            requests: quantities,
        }
    }

    /// Container-level security context.
    pub fn container_security_context(&self) -> SecurityContext {
        SecurityContext {
            // Non-overridable.
            allow_privilege_escalation: Some(false),
            run_as_non_root: self.container_non_root.then_some(true),
            run_as_user: self.container_non_root.then_some(security::NONROOT_ID),
            seccomp_profile: Some(SeccompProfile {
                profile_type: security::SECCOMP_PROFILE.to_string(),
            }),
            capabilities: Some(Capabilities {
                drop: self.cap_drop.clone(),
                add: self.cap_add.clone(),
            }),
        }
    }

    /// Pod-level security context. UID, GID, and FSGroup are all the same
    /// fixed value so volume ownership and process UID agree.
    pub fn pod_security_context(&self) -> Option<PodSecurityContext> {
        self.pod_non_root.then(|| PodSecurityContext {
            run_as_non_root: Some(true),
            run_as_user: Some(security::NONROOT_ID),
            run_as_group: Some(security::NONROOT_ID),
            fs_group: Some(security::NONROOT_ID),
        })
    }
}
