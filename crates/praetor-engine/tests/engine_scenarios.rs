//! Decision semantics through the public engine API.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use chrono::{TimeZone, Utc};

use praetor_core::model::{
    CheckFailure, CheckRequest, DerivedRoleDefinition, DerivedRolesPolicy, Effect, PolicyRule,
    Principal, Resource, ResourcePolicy,
};

use fixtures::{doc, doc_policy, engine, engine_with, owner_roles, request, user};

#[tokio::test]
async fn default_deny_for_unknown_kind() {
    let e = engine();
    e.load_resource_policies(vec![doc_policy()]).unwrap();

    let res = e
        .check(request(user("u1"), Resource::new("invoice", "i1"), ["view", "pay"]))
        .await;
    assert_eq!(res.results.len(), 2);
    for r in res.results.values() {
        assert_eq!(r.effect, Effect::Deny);
        assert!(!r.matched());
    }
    assert!(res.meta.policies_evaluated.is_empty());
    assert!(res.meta.error.is_none());
}

#[tokio::test]
async fn owner_can_view_and_others_cannot() {
    let e = engine();
    e.load_resource_policies(vec![doc_policy()]).unwrap();

    let res = e.check(request(user("u1"), doc("u1"), ["view"])).await;
    let r = res.result("view").unwrap();
    assert_eq!(r.effect, Effect::Allow);
    assert_eq!(r.matched_policy.as_deref(), Some("doc-base"));
    assert_eq!(r.matched_rule.as_deref(), Some("owner-view"));
    assert_eq!(res.meta.policies_evaluated, vec!["doc-base".to_string()]);

    let res = e.check(request(user("u1"), doc("other"), ["view"])).await;
    let r = res.result("view").unwrap();
    assert_eq!(r.effect, Effect::Deny);
    assert!(!r.matched());
}

#[tokio::test]
async fn explicit_deny_overrides_admin_allow() {
    let e = engine();
    e.load_resource_policies(vec![doc_policy()]).unwrap();

    let admin = Principal::new("a1").with_role("admin");
    let locked = Resource::new("doc", "d1").with_attr("status", "locked");
    let res = e.check(request(admin.clone(), locked, ["delete"])).await;
    let r = res.result("delete").unwrap();
    assert_eq!(r.effect, Effect::Deny);
    assert!(r.matched());
    assert_eq!(r.matched_rule.as_deref(), Some("locked-delete"));

    let open = Resource::new("doc", "d1").with_attr("status", "open");
    assert!(e.check(request(admin, open, ["delete"])).await.is_allowed("delete"));
}

#[tokio::test]
async fn deny_in_a_later_policy_still_wins() {
    let e = engine();
    let base = ResourcePolicy::new("base", "doc", vec![PolicyRule::new("all", Effect::Allow, ["*"])]);
    let scoped = ResourcePolicy::new(
        "freeze",
        "doc",
        vec![PolicyRule::new("no-edit", Effect::Deny, ["edit"])],
    );
    e.load_resource_policies(vec![base, scoped]).unwrap();

    let res = e.check(request(user("u1"), doc("u1"), ["view", "edit"])).await;
    assert!(res.is_allowed("view"));
    let edit = res.result("edit").unwrap();
    assert_eq!(edit.effect, Effect::Deny);
    assert_eq!(edit.matched_policy.as_deref(), Some("freeze"));
    assert_eq!(res.meta.policies_evaluated, vec!["base".to_string(), "freeze".to_string()]);
}

#[tokio::test]
async fn wildcard_action_matches_unseen_actions() {
    let e = engine();
    e.load_resource_policies(vec![ResourcePolicy::new(
        "anything",
        "doc",
        vec![PolicyRule::new("all", Effect::Allow, ["*"]).with_roles(["user"])],
    )])
    .unwrap();

    let res = e
        .check(request(user("u1"), doc("x"), ["view", "some-brand-new-action"]))
        .await;
    assert!(res.is_allowed("view"));
    assert!(res.is_allowed("some-brand-new-action"));
}

#[tokio::test]
async fn erroring_condition_fails_closed() {
    let e = engine();
    e.load_resource_policies(vec![ResourcePolicy::new(
        "p",
        "doc",
        vec![
            PolicyRule::new("needs-clearance", Effect::Allow, ["view"])
                .with_condition("principal.attr.clearance >= 3"),
            PolicyRule::new("not-negated", Effect::Allow, ["edit"])
                .with_condition("!(resource.attr.missing == 'x')"),
        ],
    )])
    .unwrap();

    let res = e.check(request(user("u1"), doc("u1"), ["view", "edit"])).await;
    assert_eq!(res.result("view").unwrap().effect, Effect::Deny);
    assert_eq!(res.result("edit").unwrap().effect, Effect::Deny);
    assert!(res.meta.error.is_none());
    assert!(e.stats().condition_errors["evaluation"] >= 2);
}

#[tokio::test]
async fn derived_roles_gate_rules() {
    let e = engine();
    e.load_derived_roles_policies(vec![owner_roles()]).unwrap();
    e.load_resource_policies(vec![ResourcePolicy::new(
        "p",
        "doc",
        vec![PolicyRule::new("owner-edit", Effect::Allow, ["edit"]).with_derived_roles(["owner"])],
    )])
    .unwrap();

    let res = e.check(request(user("u1"), doc("u1"), ["edit"])).await;
    let r = res.result("edit").unwrap();
    assert!(r.is_allowed());
    assert_eq!(r.effective_derived_roles, vec!["owner".to_string()]);

    let res = e.check(request(user("u1"), doc("u2"), ["edit"])).await;
    let r = res.result("edit").unwrap();
    assert!(!r.is_allowed());
    assert!(r.effective_derived_roles.is_empty());
}

#[tokio::test]
async fn empty_parent_roles_never_derive() {
    let e = engine();
    e.load_derived_roles_policies(vec![DerivedRolesPolicy::new(
        "dr",
        vec![DerivedRoleDefinition::new("everyone", Vec::<String>::new())],
    )])
    .unwrap();
    e.load_resource_policies(vec![ResourcePolicy::new(
        "p",
        "doc",
        vec![PolicyRule::new("r", Effect::Allow, ["view"]).with_derived_roles(["everyone"])],
    )])
    .unwrap();

    assert!(!e.check(request(user("u1"), doc("u1"), ["view"])).await.is_allowed("view"));
}

#[tokio::test]
async fn invalid_request_denies_everything() {
    let e = engine();
    e.load_resource_policies(vec![ResourcePolicy::new(
        "open",
        "doc",
        vec![PolicyRule::new("all", Effect::Allow, ["*"])],
    )])
    .unwrap();

    let res = e.check(request(Principal::new(""), doc("u1"), ["view"])).await;
    assert_eq!(res.result("view").unwrap().effect, Effect::Deny);
    assert!(matches!(res.meta.error, Some(CheckFailure::InvalidRequest(ref r)) if r.contains("principal.id")));

    let res = e.check(request(user("u1"), doc("u1"), ["view", ""])).await;
    assert_eq!(res.results.len(), 1);
    assert!(!res.is_allowed("view"));
    assert!(matches!(res.meta.error, Some(CheckFailure::InvalidRequest(_))));

    let res = e.check(request(user("u1"), doc("u1"), [])).await;
    assert!(res.results.is_empty());
    assert!(matches!(res.meta.error, Some(CheckFailure::InvalidRequest(_))));
}

#[tokio::test]
async fn request_id_is_kept_or_assigned() {
    let e = engine();
    let res = e
        .check(request(user("u1"), doc("u1"), ["view"]).with_request_id("req-42"))
        .await;
    assert_eq!(res.request_id, "req-42");

    let a = e.check(request(user("u1"), doc("u1"), ["view"])).await;
    let b = e.check(request(user("u1"), doc("u1"), ["view"])).await;
    assert!(!a.request_id.is_empty());
    assert_ne!(a.request_id, b.request_id);
}

#[tokio::test]
async fn rejected_load_keeps_active_policies() {
    let e = engine();
    e.load_resource_policies(vec![doc_policy()]).unwrap();
    let generation = e.stats().generation;

    let broken = ResourcePolicy::new(
        "broken",
        "doc",
        vec![PolicyRule::new("r", Effect::Deny, ["view"]).with_condition("principal.id ==")],
    );
    let err = e.load_resource_policies(vec![broken]).unwrap_err();
    assert_eq!(err.code().as_str(), "INVALID_POLICY");

    assert_eq!(e.stats().generation, generation);
    assert!(e.check(request(user("u1"), doc("u1"), ["view"])).await.is_allowed("view"));

    let no_kind = ResourcePolicy::new("nameless-kind", "", vec![]);
    assert!(e.load_resource_policies(vec![no_kind]).is_err());
}

#[tokio::test]
async fn long_flat_condition_is_rejected_at_load() {
    let e = engine_with(|c| c.evaluation.max_expression_len = 1_048_576);
    e.load_resource_policies(vec![doc_policy()]).unwrap();

    let chain = format!("1{} > 0", "+1".repeat(200_000));
    let long = ResourcePolicy::new(
        "long",
        "doc",
        vec![PolicyRule::new("sum", Effect::Allow, ["view"]).with_condition(chain)],
    );
    let err = e.load_resource_policies(vec![long]).unwrap_err();
    assert_eq!(err.code().as_str(), "INVALID_POLICY");
    assert!(err.to_string().contains("nested deeper"), "{err}");

    assert!(e.check(request(user("u1"), doc("u1"), ["view"])).await.is_allowed("view"));
}

#[tokio::test]
async fn clear_policies_returns_to_default_deny() {
    let e = engine();
    e.load_resource_policies(vec![doc_policy()]).unwrap();
    e.load_derived_roles_policies(vec![owner_roles()]).unwrap();
    e.clear_policies();

    let stats = e.stats();
    assert_eq!(stats.policies.resource_policies, 0);
    assert_eq!(stats.policies.derived_role_definitions, 0);
    assert!(!e.check(request(user("u1"), doc("u1"), ["view"])).await.is_allowed("view"));
}

#[tokio::test]
async fn business_hours_use_injected_clock() {
    let e = engine();
    e.load_resource_policies(vec![ResourcePolicy::new(
        "hours",
        "doc",
        vec![PolicyRule::new("office", Effect::Allow, ["view"])
            .with_condition("now.getHours() >= 9 && now.getHours() < 17")],
    )])
    .unwrap();

    let req = || request(user("u1"), doc("u1"), ["view"]);
    let morning = Utc.with_ymd_and_hms(2026, 3, 10, 10, 0, 0).unwrap();
    let night = Utc.with_ymd_and_hms(2026, 3, 10, 23, 0, 0).unwrap();
    assert!(e.check_at(req(), morning).await.is_allowed("view"));
    assert!(!e.check_at(req(), night).await.is_allowed("view"));
}

#[tokio::test]
async fn aux_data_is_visible_to_conditions() {
    let e = engine();
    e.load_resource_policies(vec![ResourcePolicy::new(
        "net",
        "doc",
        vec![PolicyRule::new("office-net", Effect::Allow, ["view"])
            .with_condition("inIPAddrRange(auxData.ip, '10.0.0.0/8')")],
    )])
    .unwrap();

    let inside: CheckRequest = request(user("u1"), doc("u1"), ["view"]).with_aux("ip", "10.2.3.4");
    let outside = request(user("u1"), doc("u1"), ["view"]).with_aux("ip", "8.8.8.8");
    assert!(e.check(inside).await.is_allowed("view"));
    assert!(!e.check(outside).await.is_allowed("view"));
}

#[tokio::test]
async fn wire_format_is_camel_case() {
    let e = engine();
    e.load_resource_policies(vec![doc_policy()]).unwrap();

    let raw = r#"{
        "requestId": "wire-1",
        "principal": {"id": "u1", "roles": ["user"]},
        "resource": {"kind": "doc", "id": "d1", "attr": {"ownerId": "u1"}},
        "actions": ["view"]
    }"#;
    let req: CheckRequest = serde_json::from_str(raw).unwrap();
    let res = e.check(req).await;

    let json = serde_json::to_value(&res).unwrap();
    assert_eq!(json["requestId"], "wire-1");
    assert_eq!(json["results"]["view"]["effect"], "allow");
    assert_eq!(json["results"]["view"]["matchedRule"], "owner-view");
    assert!(json["meta"]["evaluationDurationMs"].is_number());
    assert_eq!(json["meta"]["cacheHit"], false);
}
