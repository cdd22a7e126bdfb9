//! Policy and request/response model.
//!
//! Everything here is constructed outside the engine (policy loader, transport layer)
//! and treated as immutable once handed over. Wire names are camelCase.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::value::{Attributes, Value};

/// Reserved action (and role) wildcard.
pub const WILDCARD: &str = "*";

// ---------- request side ----------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub id: String,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default, alias = "attr")]
    pub attributes: Attributes,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), ..Default::default() }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub kind: String,
    pub id: String,
    #[serde(default, alias = "attr")]
    pub attributes: Attributes,
}

impl Resource {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self { kind: kind.into(), id: id.into(), attributes: Attributes::new() }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRequest {
    #[serde(default)]
    pub request_id: Option<String>,
    /// Tenant discriminator; part of the decision-cache fingerprint.
    #[serde(default)]
    pub tenant: Option<String>,
    pub principal: Principal,
    pub resource: Resource,
    pub actions: Vec<String>,
    #[serde(default)]
    pub aux_data: Option<Attributes>,
}

impl CheckRequest {
    pub fn new<I, S>(principal: Principal, resource: Resource, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            request_id: None,
            tenant: None,
            principal,
            resource,
            actions: actions.into_iter().map(Into::into).collect(),
            aux_data: None,
        }
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    pub fn with_aux(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.aux_data.get_or_insert_with(Attributes::new).insert(key.into(), value.into());
        self
    }

    /// Structural validation; the reason is reported in `ResponseMeta::error`.
    pub fn shape_error(&self) -> Option<String> {
        if self.principal.id.is_empty() {
            return Some("principal.id must not be empty".into());
        }
        if self.resource.kind.is_empty() {
            return Some("resource.kind must not be empty".into());
        }
        if self.actions.is_empty() {
            return Some("actions must not be empty".into());
        }
        if self.actions.iter().any(String::is_empty) {
            return Some("actions must not contain empty strings".into());
        }
        None
    }
}

// ---------- policy side ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Effect {
    Allow,
    Deny,
}

impl Effect {
    pub fn as_str(self) -> &'static str {
        match self {
            Effect::Allow => "allow",
            Effect::Deny => "deny",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
    pub name: String,
    pub actions: BTreeSet<String>,
    pub effect: Effect,
    /// `None` = any principal; `Some(empty)` never intersects.
    #[serde(default)]
    pub roles: Option<BTreeSet<String>>,
    #[serde(default)]
    pub derived_roles: Option<BTreeSet<String>>,
    #[serde(default)]
    pub condition: Option<String>,
}

impl PolicyRule {
    pub fn new<I, S>(name: impl Into<String>, effect: Effect, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            actions: actions.into_iter().map(Into::into).collect(),
            effect,
            roles: None,
            derived_roles: None,
            condition: None,
        }
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = Some(roles.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_derived_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.derived_roles = Some(roles.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Rule's actions contain `action` or the wildcard.
    pub fn covers_action(&self, action: &str) -> bool {
        self.actions.contains(action) || self.actions.contains(WILDCARD)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePolicy {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub resource_kind: String,
    pub rules: Vec<PolicyRule>,
}

impl ResourcePolicy {
    pub fn new(name: impl Into<String>, resource_kind: impl Into<String>, rules: Vec<PolicyRule>) -> Self {
        Self {
            name: name.into(),
            version: default_version(),
            resource_kind: resource_kind.into(),
            rules,
        }
    }
}

fn default_version() -> String {
    "default".into()
}

/// A dynamically computed role; never stored on the principal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedRoleDefinition {
    pub name: String,
    /// Empty = never eligible; `"*"` = any role.
    pub parent_roles: BTreeSet<String>,
    /// `None` applies whenever the parent-role gate passes.
    #[serde(default)]
    pub condition: Option<String>,
}

impl DerivedRoleDefinition {
    pub fn new<I, S>(name: impl Into<String>, parent_roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            parent_roles: parent_roles.into_iter().map(Into::into).collect(),
            condition: None,
        }
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }
}

/// Named group of derived-role definitions, as produced by the loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedRolesPolicy {
    pub name: String,
    pub definitions: Vec<DerivedRoleDefinition>,
}

impl DerivedRolesPolicy {
    pub fn new(name: impl Into<String>, definitions: Vec<DerivedRoleDefinition>) -> Self {
        Self { name: name.into(), definitions }
    }
}

// ---------- response side ----------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub effect: Effect,
    pub matched_policy: Option<String>,
    pub matched_rule: Option<String>,
    pub effective_derived_roles: Vec<String>,
}

impl ActionResult {
    /// Default-deny result (no rule matched).
    pub fn default_deny(effective_derived_roles: Vec<String>) -> Self {
        Self {
            effect: Effect::Deny,
            matched_policy: None,
            matched_rule: None,
            effective_derived_roles,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.effect == Effect::Allow
    }

    /// Whether any rule matched (false means default deny).
    pub fn matched(&self) -> bool {
        self.matched_rule.is_some()
    }
}

/// Why a response is incomplete; unresolved actions are always `Deny`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "detail")]
pub enum CheckFailure {
    Timeout,
    InvalidRequest(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    pub evaluation_duration_ms: f64,
    pub policies_evaluated: Vec<String>,
    #[serde(default)]
    pub cache_hit: bool,
    #[serde(default)]
    pub error: Option<CheckFailure>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResponse {
    pub request_id: String,
    pub results: BTreeMap<String, ActionResult>,
    pub meta: ResponseMeta,
}

impl CheckResponse {
    pub fn result(&self, action: &str) -> Option<&ActionResult> {
        self.results.get(action)
    }

    pub fn is_allowed(&self, action: &str) -> bool {
        self.results.get(action).map(ActionResult::is_allowed).unwrap_or(false)
    }
}
