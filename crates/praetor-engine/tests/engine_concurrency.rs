//! Parallel evaluation, deadlines, batches and snapshot consistency.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use praetor_core::model::{
    CheckFailure, DerivedRoleDefinition, DerivedRolesPolicy, Effect, PolicyRule, Resource, ResourcePolicy,
};
use praetor_core::Value;
use praetor_engine::PolicyDecisionPoint;

use fixtures::{doc, doc_policy, engine, engine_with, request, user};

fn many_actions(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("action-{i}")).collect()
}

fn even_actions_policy() -> ResourcePolicy {
    let evens: Vec<String> = many_actions(32).into_iter().step_by(2).collect();
    ResourcePolicy::new(
        "evens",
        "doc",
        vec![
            PolicyRule::new("evens", Effect::Allow, evens).with_roles(["user"]),
            PolicyRule::new("not-nine", Effect::Deny, ["action-9"]),
        ],
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_and_inline_paths_agree() {
    let parallel = engine_with(|c| c.evaluation.parallel_threshold = 1);
    let inline = engine_with(|c| c.evaluation.parallel_threshold = 1024);
    for e in [&parallel, &inline] {
        e.load_resource_policies(vec![even_actions_policy()]).unwrap();
    }

    let mut req = request(user("u1"), doc("u1"), []);
    req.actions = many_actions(32);

    let a = parallel.check(req.clone()).await;
    let b = inline.check(req).await;
    assert_eq!(a.results, b.results);
    assert_eq!(a.results.len(), 32);
    assert!(a.is_allowed("action-0"));
    assert!(!a.is_allowed("action-1"));
    assert!(!a.is_allowed("action-9"));
}

#[tokio::test]
async fn batch_preserves_order() {
    let e = engine();
    e.load_resource_policies(vec![doc_policy()]).unwrap();

    let reqs = vec![
        request(user("u1"), doc("u1"), ["view"]).with_request_id("a"),
        request(user("u1"), doc("zz"), ["view"]).with_request_id("b"),
        request(user("u1"), doc("u1"), ["view"]).with_request_id("c"),
    ];
    let out = e.check_batch(reqs).await;
    let ids: Vec<&str> = out.iter().map(|r| r.request_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    let allowed: Vec<bool> = out.iter().map(|r| r.is_allowed("view")).collect();
    assert_eq!(allowed, vec![true, false, true]);
}

#[tokio::test]
async fn zero_deadline_fails_closed() {
    let e = engine();
    e.load_resource_policies(vec![ResourcePolicy::new(
        "open",
        "doc",
        vec![PolicyRule::new("all", Effect::Allow, ["*"])],
    )])
    .unwrap();

    let res = e
        .check_with_deadline(request(user("u1"), doc("u1"), ["view"]), Duration::ZERO)
        .await;
    assert_eq!(res.meta.error, Some(CheckFailure::Timeout));
    assert_eq!(res.result("view").unwrap().effect, Effect::Deny);
    assert_eq!(e.stats().timeouts, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_parallel_check_times_out_with_partial_results() {
    let e = engine_with(|c| {
        c.evaluation.parallel_threshold = 1;
        c.evaluation.parallel_workers = 1;
        c.evaluation.max_eval_steps = 10_000_000;
    });
    e.load_resource_policies(vec![ResourcePolicy::new(
        "scan",
        "doc",
        vec![PolicyRule::new("scan", Effect::Allow, ["*"]).with_condition("!(-1 in resource.attr.big)")],
    )])
    .unwrap();

    let big = Value::List((0..300_000i64).map(Value::Int).collect());
    let mut req = request(user("u1"), Resource::new("doc", "d1").with_attr("big", big), []);
    req.actions = many_actions(64);

    let res = e.check_with_deadline(req, Duration::from_millis(2)).await;
    assert_eq!(res.meta.error, Some(CheckFailure::Timeout));
    assert_eq!(res.results.len(), 64);
    assert!(res.results.values().any(|r| r.effect == Effect::Deny));
    // Whatever did resolve resolved correctly.
    for r in res.results.values().filter(|r| r.matched()) {
        assert_eq!(r.effect, Effect::Allow);
    }
}

/// A resource whose `big` attribute takes well over a millisecond to scan.
fn slow_doc() -> Resource {
    let big = Value::List((0..1_000_000i64).map(Value::Int).collect());
    Resource::new("doc", "d1").with_attr("big", big)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deadline_covers_derived_role_computation() {
    let e = engine_with(|c| {
        c.evaluation.parallel_threshold = 1;
        c.evaluation.max_eval_steps = 10_000_000;
    });
    e.load_derived_roles_policies(vec![DerivedRolesPolicy::new(
        "scan-roles",
        vec![DerivedRoleDefinition::new("scanner", ["user"]).with_condition("!(-1 in resource.attr.big)")],
    )])
    .unwrap();
    e.load_resource_policies(vec![ResourcePolicy::new(
        "scanned",
        "doc",
        vec![PolicyRule::new("scanner-all", Effect::Allow, ["*"]).with_derived_roles(["scanner"])],
    )])
    .unwrap();

    let res = e
        .check_with_deadline(request(user("u1"), slow_doc(), ["view", "edit"]), Duration::from_millis(1))
        .await;
    assert_eq!(res.meta.error, Some(CheckFailure::Timeout));
    assert_eq!(res.results.len(), 2);
    assert!(res.results.values().all(|r| r.effect == Effect::Deny && !r.matched()));
    assert_eq!(e.stats().timeouts, 1);

    // Without a deadline the same request is allowed.
    let res = e.check(request(user("u1"), slow_doc(), ["view", "edit"])).await;
    assert_eq!(res.meta.error, None);
    assert!(res.is_allowed("view") && res.is_allowed("edit"));
}

#[tokio::test]
async fn late_single_inline_action_is_denied() {
    let e = engine_with(|c| c.evaluation.max_eval_steps = 10_000_000);
    assert!(e.cfg().evaluation.parallel_threshold > 1);
    e.load_resource_policies(vec![ResourcePolicy::new(
        "scan",
        "doc",
        vec![PolicyRule::new("scan", Effect::Allow, ["view"]).with_condition("!(-1 in resource.attr.big)")],
    )])
    .unwrap();

    let res = e
        .check_with_deadline(request(user("u1"), slow_doc(), ["view"]), Duration::from_millis(1))
        .await;
    assert_eq!(res.meta.error, Some(CheckFailure::Timeout));
    assert_eq!(res.result("view").unwrap().effect, Effect::Deny);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn checks_never_observe_a_torn_reload() {
    let e = engine_with(|c| c.evaluation.parallel_threshold = 1);
    let allow_all = ResourcePolicy::new("v1", "doc", vec![PolicyRule::new("a", Effect::Allow, ["*"])]);
    let deny_all = ResourcePolicy::new("v2", "doc", vec![PolicyRule::new("d", Effect::Deny, ["*"])]);
    e.load_resource_policies(vec![allow_all.clone()]).unwrap();

    let reloader = {
        let e = e.clone();
        tokio::spawn(async move {
            for i in 0..50 {
                let p = if i % 2 == 0 { deny_all.clone() } else { allow_all.clone() };
                e.load_resource_policies(vec![p]).unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    let mut checks = Vec::new();
    for _ in 0..50 {
        let e = e.clone();
        checks.push(tokio::spawn(async move {
            e.check(request(user("u1"), doc("u1"), ["view", "edit", "delete"])).await
        }));
    }

    for c in checks {
        let res = c.await.unwrap();
        let effects: Vec<Effect> = res.results.values().map(|r| r.effect).collect();
        assert!(effects.iter().all(|x| *x == effects[0]), "mixed snapshot: {effects:?}");
        assert_eq!(res.meta.policies_evaluated.len(), 1);
    }
    reloader.await.unwrap();
}

#[tokio::test]
async fn usable_through_the_service_trait() {
    let e = engine();
    e.load_resource_policies(vec![doc_policy()]).unwrap();
    let pdp: Arc<dyn PolicyDecisionPoint> = Arc::new(e);

    let res = pdp.check(request(user("u1"), doc("u1"), ["view"])).await;
    assert!(res.is_allowed("view"));
    let batch = pdp.check_batch(vec![request(user("u1"), doc("x"), ["view"])]).await;
    assert!(!batch[0].is_allowed("view"));
}

#[tokio::test]
async fn stats_and_metrics_reflect_activity() {
    let e = engine();
    e.load_resource_policies(vec![doc_policy()]).unwrap();
    e.load_derived_roles_policies(vec![fixtures::owner_roles()]).unwrap();

    e.check(request(user("u1"), doc("u1"), ["view"])).await;
    e.check(request(user("u1"), doc("u2"), ["view"])).await;

    let stats = e.stats();
    assert_eq!(stats.generation, 2);
    assert_eq!(stats.policies.resource_kinds, 1);
    assert_eq!(stats.policies.rules, 3);
    assert_eq!(stats.policies.derived_role_definitions, 1);
    assert_eq!(stats.checks, 2);
    assert!(stats.expression_cache.hits > 0);
    assert!(stats.decision_cache.is_none());

    let json = serde_json::to_value(&stats).unwrap();
    assert!(json["expression_cache"]["hit_rate"].as_f64().unwrap() > 0.0);

    let text = e.render_metrics();
    assert!(text.contains("praetor_checks_total{outcome=\"allow\"} 1"));
    assert!(text.contains("praetor_checks_total{outcome=\"deny\"} 1"));
    assert!(text.contains("praetor_policy_reloads_total{kind=\"resource\"} 1"));
    assert!(text.contains("praetor_policies_loaded{type=\"rules\"} 3"));
    assert!(text.contains("praetor_check_duration_micros_count{} 2"));
    assert!(text.contains("praetor_policy_generation 2"));
}
