//! Network policy synthesis.
//!
//! Every sandbox gets an ingress-deny-all policy scoped to its own label
//! selector — never to the namespace — so sandbox-to-sandbox isolation
//! holds by construction no matter how many sandboxes share a namespace.
//!
//! Egress follows the whitelist: one allow rule per CIDR plus a standing
//! allow to the cluster DNS service; everything else is denied because a
//! policy selecting the pod exists. An EMPTY whitelist emits no egress
//! policy at all, which under default-deny-once-selected semantics means
//! unrestricted egress. That is a deliberate, documented tradeoff carried
//! over from the source behavior: absence of a whitelist entry never
//! silently blocks all traffic. Do not "fix" it to a deny default.

use std::collections::BTreeMap;

use crate::constants::{cluster, labels, suffixes};
use crate::objects::{
    IpBlock, LabelSelector, NetworkPolicy, NetworkPolicyEgressRule, NetworkPolicyPeer,
    NetworkPolicyPort, NetworkPolicySpec, ObjectMeta,
};
use crate::options::EgressRestriction;
use crate::spec::SandboxSpec;

/// The derived policy pair for one sandbox.
#[derive(Clone, Debug)]
pub struct NetworkPolicySet {
    /// Always present: ingress deny-all on the sandbox's own selector.
    pub deny_ingress: NetworkPolicy,
    /// Present only for a non-empty whitelist with restriction enabled.
    /// Applied after the before-script completes.
    pub egress: Option<NetworkPolicy>,
}

/// Derive the policy set for a validated spec.
pub fn synthesize(spec: &SandboxSpec, restriction: EgressRestriction) -> NetworkPolicySet {
    let selector = LabelSelector::single(labels::SANDBOX, spec.name.clone());

    let deny_ingress = NetworkPolicy::new(
        ObjectMeta::named(
            format!("{}{}", spec.name, suffixes::INGRESS_POLICY),
            spec.namespace.clone(),
        ),
        NetworkPolicySpec {
            pod_selector: selector.clone(),
            policy_types: vec!["Ingress".to_string()],
            // An explicit empty rule list is the deny-all form.
            ingress: Some(vec![]),
            egress: None,
        },
    );

    let egress = match restriction {
        EgressRestriction::Disabled => None,
        EgressRestriction::Enabled if spec.egress_whitelist.is_empty() => None,
        EgressRestriction::Enabled => Some(egress_policy(spec, selector)),
    };

    NetworkPolicySet {
        deny_ingress,
        egress,
    }
}

fn egress_policy(spec: &SandboxSpec, selector: LabelSelector) -> NetworkPolicy {
    let mut rules: Vec<NetworkPolicyEgressRule> = Vec::new();
    let mut seen: Vec<&str> = Vec::new();

    for block in &spec.egress_whitelist {
        // Ordered set: first occurrence wins.
        if seen.contains(&block.as_str()) {
            continue;
        }
        seen.push(block);
        rules.push(NetworkPolicyEgressRule {
            to: vec![NetworkPolicyPeer {
                ip_block: Some(IpBlock {
                    cidr: block.clone(),
                }),
                ..NetworkPolicyPeer::default()
            }],
            ports: vec![],
        });
    }

    rules.push(dns_rule());

    NetworkPolicy::new(
        ObjectMeta::named(
            format!("{}{}", spec.name, suffixes::EGRESS_POLICY),
            spec.namespace.clone(),
        ),
        NetworkPolicySpec {
            pod_selector: selector,
            policy_types: vec!["Egress".to_string()],
            ingress: None,
            egress: Some(rules),
        },
    )
}

/// Standing allow to the cluster DNS pods on UDP and TCP 53. Without it a
/// locked-down sandbox could reach whitelisted IPs but resolve nothing.
fn dns_rule() -> NetworkPolicyEgressRule {
    let mut ns_labels = BTreeMap::new();
    ns_labels.insert(
        cluster::NAMESPACE_NAME_LABEL.to_string(),
        cluster::DNS_NAMESPACE.to_string(),
    );

    NetworkPolicyEgressRule {
        to: vec![NetworkPolicyPeer {
            ip_block: None,
            namespace_selector: Some(LabelSelector {
                match_labels: ns_labels,
            }),
            pod_selector: Some(LabelSelector::single(
                cluster::DNS_POD_LABEL_KEY,
                cluster::DNS_POD_LABEL_VALUE,
            )),
        }],
        ports: vec![
            NetworkPolicyPort {
                protocol: "UDP".to_string(),
                port: cluster::DNS_PORT,
            },
            NetworkPolicyPort {
                protocol: "TCP".to_string(),
                port: cluster::DNS_PORT,
            },
        ],
    }
}
