//! Integration tests for the lifecycle controller.
//!
//! These drive the public controller API against the in-memory
//! orchestrator, covering the isolation and sequencing contracts:
//! per-sandbox ingress deny, whitelist-driven egress lockdown applied
//! only after readiness, conflict-free creates, idempotent deletes, and
//! aggregate delete fan-out.

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use katabox::{EgressRestriction, KataboxError, SandboxSpec, SandboxStatus};

mod common;

use common::TestContext;

fn spec(name: &str) -> SandboxSpec {
    SandboxSpec::new(name, "alpine:latest")
}

// ============================================================================
// CREATE
// ============================================================================

/// A plain create applies workload plus ingress deny and nothing else.
#[tokio::test]
async fn create_applies_workload_and_ingress_deny_only() {
    let ctx = TestContext::new();

    ctx.controller.create(&spec("t1")).await.unwrap();

    assert!(ctx.orchestrator.policy("default", "t1-deny-ingress").is_some());
    // Empty whitelist: no egress policy, by design.
    assert!(ctx.orchestrator.policy("default", "t1-netpol").is_none());

    let state = ctx.controller.get("t1", "default").await.unwrap();
    assert_eq!(state.status, SandboxStatus::Running);
}

/// Duplicate names fail with Conflict and leave no partial objects.
#[tokio::test]
async fn create_duplicate_is_conflict_without_partial_objects() {
    let ctx = TestContext::new();
    ctx.controller.create(&spec("t1")).await.unwrap();

    let objects_before = {
        let state = ctx.orchestrator.state.lock();
        (state.deployments.len(), state.secrets.len(), state.policies.len())
    };

    let result = ctx.controller.create(&spec("t1")).await;
    assert!(matches!(result, Err(KataboxError::Conflict(_))));

    let objects_after = {
        let state = ctx.orchestrator.state.lock();
        (state.deployments.len(), state.secrets.len(), state.policies.len())
    };
    assert_eq!(objects_before, objects_after);
}

/// A malformed spec never reaches the orchestrator.
#[tokio::test]
async fn create_invalid_spec_touches_nothing() {
    let ctx = TestContext::new();
    let mut bad = spec("t1");
    bad.egress_whitelist = vec!["not-a-cidr".into()];

    let result = ctx.controller.create(&bad).await;
    assert!(matches!(result, Err(KataboxError::Validation(_))));
    assert!(ctx.orchestrator.log().is_empty());
}

/// Transient orchestrator failures are retried up to the ceiling.
#[tokio::test]
async fn create_rides_out_transient_unavailability() {
    let ctx = TestContext::new();
    ctx.orchestrator.behavior.lock().flaky_gets = 2;

    ctx.controller.create(&spec("t1")).await.unwrap();
}

// ============================================================================
// EGRESS SEQUENCING
// ============================================================================

/// The egress policy goes in only after the pod reports Ready, so a
/// before-script sees the open network and the locked-down posture
/// applies afterward.
#[tokio::test]
async fn egress_lockdown_waits_for_readiness() {
    let ctx = TestContext::new();
    ctx.orchestrator.behavior.lock().ready_after_polls = 3;

    let mut locked = spec("t1");
    locked.before_script = Some("apk add curl".into());
    locked.egress_whitelist = vec!["1.1.1.1/32".into()];
    ctx.controller.create(&locked).await.unwrap();

    let egress = ctx.orchestrator.policy("default", "t1-netpol").unwrap();
    let rules = egress.spec.egress.as_ref().unwrap();
    assert_eq!(rules[0].to[0].ip_block.as_ref().unwrap().cidr, "1.1.1.1/32");
    // CIDR rule plus the DNS allowance.
    assert_eq!(rules.len(), 2);

    // Readiness polling happened before lockdown; the mock needed 4
    // list_pods calls before flipping Ready.
    let polls = ctx
        .orchestrator
        .state
        .lock()
        .polls
        .get(&("default".to_string(), "t1".to_string()))
        .copied()
        .unwrap();
    assert!(polls > 3, "egress applied before readiness ({} polls)", polls);
}

/// Restriction disabled by the operator: whitelist or not, no egress
/// policy is emitted, while ingress isolation stays.
#[tokio::test]
async fn egress_restriction_disabled_keeps_ingress_deny() {
    let mut options = common::fast_options();
    options.egress_restriction = EgressRestriction::Disabled;
    let ctx = TestContext::with_options(options);

    let mut open = spec("t1");
    open.egress_whitelist = vec!["1.1.1.1/32".into()];
    ctx.controller.create(&open).await.unwrap();

    assert!(ctx.orchestrator.policy("default", "t1-netpol").is_none());
    assert!(ctx.orchestrator.policy("default", "t1-deny-ingress").is_some());
}

/// Two sandboxes in one namespace each get their own selector-scoped
/// deny rule: isolation is pairwise by construction.
#[tokio::test]
async fn sandboxes_in_shared_namespace_are_isolated() {
    let ctx = TestContext::new();
    ctx.controller.create(&spec("a")).await.unwrap();
    ctx.controller.create(&spec("b")).await.unwrap();

    let pa = ctx.orchestrator.policy("default", "a-deny-ingress").unwrap();
    let pb = ctx.orchestrator.policy("default", "b-deny-ingress").unwrap();

    assert_eq!(
        pa.spec.pod_selector.match_labels.get("katabox.io/sandbox"),
        Some(&"a".to_string())
    );
    assert_eq!(
        pb.spec.pod_selector.match_labels.get("katabox.io/sandbox"),
        Some(&"b".to_string())
    );
    assert!(pa.spec.ingress.as_ref().unwrap().is_empty());
    assert!(pb.spec.ingress.as_ref().unwrap().is_empty());
}

// ============================================================================
// FAILURE CLASSIFICATION
// ============================================================================

/// A before-script that never completes fails the create within its
/// bound, and the sandbox stays visibly Failed afterward.
#[tokio::test]
async fn script_timeout_fails_create_and_is_visible() {
    let ctx = TestContext::new();
    ctx.orchestrator
        .behavior
        .lock()
        .never_ready
        .insert("t1".into());

    let mut slow = spec("t1");
    slow.before_script = Some("sleep 600".into());
    slow.egress_whitelist = vec!["1.1.1.1/32".into()];

    let result = ctx.controller.create(&slow).await;
    assert!(matches!(result, Err(KataboxError::ScriptTimeout(_))));

    // Lockdown never went in for a sandbox that never became ready.
    assert!(ctx.orchestrator.policy("default", "t1-netpol").is_none());

    let state = ctx.controller.get("t1", "default").await.unwrap();
    assert_eq!(state.status, SandboxStatus::Failed);
    assert!(state.reason.is_some());

    let listed = ctx.controller.list(Some("default")).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status, SandboxStatus::Failed);
}

/// An unpullable image is classified, surfaced, and never retried.
#[tokio::test]
async fn image_pull_failure_is_terminal() {
    let ctx = TestContext::new();
    ctx.orchestrator
        .behavior
        .lock()
        .image_pull_failures
        .insert("t1".into());

    let mut doomed = spec("t1");
    doomed.before_script = Some("true".into());

    let result = ctx.controller.create(&doomed).await;
    assert!(matches!(result, Err(KataboxError::ImagePull(_))));

    let state = ctx.controller.get("t1", "default").await.unwrap();
    assert_eq!(state.status, SandboxStatus::Failed);
    assert_eq!(state.reason.as_deref(), Some("ErrImagePull"));
}

// ============================================================================
// DELETE
// ============================================================================

/// Deleting twice succeeds both times; deleting something that never
/// existed succeeds too.
#[tokio::test]
async fn delete_is_idempotent() {
    let ctx = TestContext::new();
    ctx.controller.create(&spec("t1")).await.unwrap();

    ctx.controller.delete("t1", "default").await.unwrap();
    ctx.controller.delete("t1", "default").await.unwrap();

    ctx.controller.delete("never-existed", "default").await.unwrap();

    let state = ctx.controller.get("t1", "default").await.unwrap();
    assert_eq!(state.status, SandboxStatus::Deleted);
}

/// Delete removes every associated object, not just the workload.
#[tokio::test]
async fn delete_tears_down_all_objects() {
    let ctx = TestContext::new();
    let mut full = spec("t1");
    full.egress_whitelist = vec!["1.1.1.1/32".into()];
    ctx.controller.create(&full).await.unwrap();

    ctx.controller.delete("t1", "default").await.unwrap();

    let state = ctx.orchestrator.state.lock();
    assert!(state.deployments.is_empty());
    assert!(state.policies.is_empty());
    assert!(state.secrets.is_empty());
}

/// delete_all without confirmation refuses before touching anything.
#[tokio::test]
async fn delete_all_requires_confirmation() {
    let ctx = TestContext::new();
    ctx.controller.create(&spec("t1")).await.unwrap();

    let result = ctx.controller.delete_all("default", false).await;
    assert!(matches!(result, Err(KataboxError::Validation(_))));
    assert_eq!(ctx.orchestrator.state.lock().deployments.len(), 1);
}

/// One failing deletion never cancels the rest; the report aggregates
/// and the survivor stays visible.
#[tokio::test]
async fn delete_all_continues_past_failures() {
    let ctx = TestContext::new();
    for name in ["s1", "s2", "s3", "s4", "s5"] {
        ctx.controller.create(&spec(name)).await.unwrap();
    }
    ctx.orchestrator
        .behavior
        .lock()
        .fail_deletes
        .insert("s3".into());

    let report = ctx.controller.delete_all("default", true).await.unwrap();
    assert_eq!(report.deleted, 4);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].name, "s3");

    let listed = ctx.controller.list(Some("default")).await.unwrap();
    let survivors: Vec<_> = listed
        .iter()
        .filter(|s| s.status != SandboxStatus::Deleted)
        .map(|s| s.name.as_str())
        .collect();
    assert_eq!(survivors, vec!["s3"]);
}

// ============================================================================
// IDENTITY SERIALIZATION
// ============================================================================

/// A delete issued while a create is still gating on readiness waits for
/// the create to finish; their orchestrator writes never interleave.
#[tokio::test]
async fn per_identity_operations_serialize() {
    let ctx = std::sync::Arc::new(TestContext::new());
    ctx.orchestrator.behavior.lock().ready_after_polls = 5;

    let mut gated = spec("t1");
    gated.egress_whitelist = vec!["1.1.1.1/32".into()];

    let create_ctx = ctx.clone();
    let create = tokio::spawn(async move { create_ctx.controller.create(&gated).await });

    // Let the create get past the deployment write, then race a delete.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    ctx.controller.delete("t1", "default").await.unwrap();

    create.await.unwrap().unwrap();

    let log = ctx.orchestrator.log();
    let egress_idx = log
        .iter()
        .position(|e| e == "create policy/t1-netpol")
        .expect("create finished its lockdown");
    let delete_idx = log
        .iter()
        .position(|e| e == "delete deployment/t1")
        .expect("delete ran");
    assert!(
        delete_idx > egress_idx,
        "delete interleaved with create: {:?}",
        log
    );
}

// ============================================================================
// OBSERVATION
// ============================================================================

/// get on an unknown sandbox is NotFound, not a fabricated state.
#[tokio::test]
async fn get_unknown_sandbox_is_not_found() {
    let ctx = TestContext::new();
    let result = ctx.controller.get("ghost", "default").await;
    assert!(matches!(result, Err(KataboxError::NotFound(_))));
}

/// list is namespace-scoped and can cross namespaces.
#[tokio::test]
async fn list_scopes_by_namespace() {
    let ctx = TestContext::new();
    ctx.controller.create(&spec("t1")).await.unwrap();
    let mut other = spec("t2");
    other.namespace = "ns2".into();
    ctx.controller.create(&other).await.unwrap();

    assert_eq!(ctx.controller.list(Some("default")).await.unwrap().len(), 1);
    assert_eq!(ctx.controller.list(Some("ns2")).await.unwrap().len(), 1);
    assert_eq!(ctx.controller.list(None).await.unwrap().len(), 2);
}

/// The watch stream yields snapshots, stops on cancellation, and ends on
/// terminal states.
#[tokio::test]
async fn watch_is_cancellable_and_stops_on_terminal() {
    let ctx = TestContext::new();
    ctx.controller.create(&spec("t1")).await.unwrap();

    // Cancellation path.
    let cancel = CancellationToken::new();
    {
        let stream = ctx.controller.watch("t1", "default", cancel.clone());
        tokio::pin!(stream);
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.status, SandboxStatus::Running);
        cancel.cancel();
        assert!(stream.next().await.is_none());
    }

    // Terminal path: a deleted sandbox ends the stream after one Deleted
    // snapshot.
    ctx.controller.delete("t1", "default").await.unwrap();
    let stream = ctx
        .controller
        .watch("t1", "default", CancellationToken::new());
    tokio::pin!(stream);
    let last = stream.next().await.unwrap().unwrap();
    assert_eq!(last.status, SandboxStatus::Deleted);
    assert!(stream.next().await.is_none());
}

// ============================================================================
// EXEC AND METRICS
// ============================================================================

/// One-shot exec collects output and the exit code through the
/// control-plane channel.
#[tokio::test]
async fn exec_collects_output_and_exit_code() {
    let ctx = TestContext::new();
    ctx.controller.create(&spec("t1")).await.unwrap();
    ctx.orchestrator.behavior.lock().exec_output =
        Some((vec!["hello ", "world\n"], vec!["warning\n"], 3));

    let result = ctx.controller.exec("t1", "default", "echo hi").await.unwrap();
    assert_eq!(result.stdout, "hello world\n");
    assert_eq!(result.stderr, "warning\n");
    assert_eq!(result.exit_code, 3);
}

/// shell on a missing sandbox is NotFound; exec routes through the
/// control plane (the mock records it as a pod exec).
#[tokio::test]
async fn shell_requires_existing_sandbox() {
    let ctx = TestContext::new();
    let result = ctx.controller.shell("ghost", "default").await;
    assert!(matches!(result, Err(KataboxError::NotFound(_))));

    ctx.controller.create(&spec("t1")).await.unwrap();
    let _channel = ctx.controller.shell("t1", "default").await.unwrap();
    assert!(ctx.orchestrator.log().contains(&"exec pod/t1-pod".to_string()));
}

/// Metrics cover running sandboxes and skip the rest.
#[tokio::test]
async fn metrics_cover_running_sandboxes() {
    let ctx = TestContext::new();
    ctx.controller.create(&spec("t1")).await.unwrap();

    let metrics = ctx.controller.metrics(Some("default")).await.unwrap();
    assert_eq!(metrics.len(), 1);
    assert_eq!(metrics[0].name, "t1");
    assert_eq!(metrics[0].cpu_usage, "12m");
    assert_eq!(metrics[0].memory_usage, "100Mi");
}
