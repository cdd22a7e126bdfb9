//! Decision cache transparency and invalidation.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use praetor_core::model::{Effect, PolicyRule, ResourcePolicy};

use fixtures::{cached_engine, doc, doc_policy, engine, request, user};

#[tokio::test]
async fn warm_cache_returns_identical_results() {
    let e = cached_engine();
    e.load_resource_policies(vec![doc_policy()]).unwrap();

    let cold = e.check(request(user("u1"), doc("u1"), ["view", "delete"])).await;
    let warm = e.check(request(user("u1"), doc("u1"), ["delete", "view"])).await;

    assert!(!cold.meta.cache_hit);
    assert!(warm.meta.cache_hit);
    assert_eq!(cold.results, warm.results);
    assert_eq!(cold.meta.policies_evaluated, warm.meta.policies_evaluated);
    assert_ne!(cold.request_id, warm.request_id);

    let stats = e.stats().decision_cache.unwrap();
    assert_eq!((stats.hits, stats.misses), (1, 1));
}

#[tokio::test]
async fn cached_and_uncached_engines_agree() {
    let plain = engine();
    let cached = cached_engine();
    for e in [&plain, &cached] {
        e.load_resource_policies(vec![doc_policy()]).unwrap();
    }

    for owner in ["u1", "u2", "u1"] {
        let a = plain.check(request(user("u1"), doc(owner), ["view"])).await;
        let b = cached.check(request(user("u1"), doc(owner), ["view"])).await;
        assert_eq!(a.results, b.results, "owner={owner}");
    }
}

#[tokio::test]
async fn reload_invalidates_cached_decisions() {
    let e = cached_engine();
    e.load_resource_policies(vec![doc_policy()]).unwrap();

    assert!(e.check(request(user("u1"), doc("u1"), ["view"])).await.is_allowed("view"));
    let hit = e.check(request(user("u1"), doc("u1"), ["view"])).await;
    assert!(hit.meta.cache_hit);

    e.load_resource_policies(vec![ResourcePolicy::new(
        "lockdown",
        "doc",
        vec![PolicyRule::new("deny-all", Effect::Deny, ["*"])],
    )])
    .unwrap();

    let after = e.check(request(user("u1"), doc("u1"), ["view"])).await;
    assert!(!after.meta.cache_hit);
    assert_eq!(after.result("view").unwrap().matched_rule.as_deref(), Some("deny-all"));
}

#[tokio::test]
async fn derived_role_reload_also_invalidates() {
    let e = cached_engine();
    e.load_resource_policies(vec![ResourcePolicy::new(
        "p",
        "doc",
        vec![PolicyRule::new("owner-edit", Effect::Allow, ["edit"]).with_derived_roles(["owner"])],
    )])
    .unwrap();

    assert!(!e.check(request(user("u1"), doc("u1"), ["edit"])).await.is_allowed("edit"));
    e.load_derived_roles_policies(vec![fixtures::owner_roles()]).unwrap();
    assert!(e.check(request(user("u1"), doc("u1"), ["edit"])).await.is_allowed("edit"));
}

#[tokio::test]
async fn tenants_never_share_entries() {
    let e = cached_engine();
    e.load_resource_policies(vec![doc_policy()]).unwrap();

    let a = e.check(request(user("u1"), doc("u1"), ["view"]).with_tenant("acme")).await;
    let b = e.check(request(user("u1"), doc("u1"), ["view"]).with_tenant("globex")).await;
    assert!(!a.meta.cache_hit);
    assert!(!b.meta.cache_hit);

    let again = e.check(request(user("u1"), doc("u1"), ["view"]).with_tenant("acme")).await;
    assert!(again.meta.cache_hit);
}

#[tokio::test]
async fn time_sensitive_kinds_bypass_the_cache() {
    let e = cached_engine();
    e.load_resource_policies(vec![ResourcePolicy::new(
        "hours",
        "doc",
        vec![PolicyRule::new("office", Effect::Allow, ["view"]).with_condition("now().getHours() < 24")],
    )])
    .unwrap();

    for _ in 0..3 {
        let res = e.check(request(user("u1"), doc("u1"), ["view"])).await;
        assert!(!res.meta.cache_hit);
        assert!(res.is_allowed("view"));
    }
    assert_eq!(e.stats().decision_cache.unwrap().size, 0);
    assert!(e.render_metrics().contains("praetor_decision_cache_total{result=\"bypass\"} 3"));
}

#[tokio::test]
async fn attribute_changes_miss() {
    let e = cached_engine();
    e.load_resource_policies(vec![doc_policy()]).unwrap();

    assert!(e.check(request(user("u1"), doc("u1"), ["view"])).await.is_allowed("view"));
    let changed = e.check(request(user("u1"), doc("u2"), ["view"])).await;
    assert!(!changed.meta.cache_hit);
    assert!(!changed.is_allowed("view"));
}
