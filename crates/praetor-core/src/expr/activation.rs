//! Per-request evaluation bindings.

use std::collections::BTreeMap;
use std::ptr;

use chrono::{DateTime, Utc};

use crate::model::{CheckRequest, Principal, Resource};
use crate::value::{Attributes, Value};

/// Root values an expression can reach, built once per check.
///
/// `principal` and `resource` hold their built-in fields plus one copy of the
/// attributes under `attr`. Selecting an unknown field on either falls through
/// to `attr`, so `resource.ownerId` and `resource.attr.ownerId` read the same
/// value; built-in fields (`id`, `roles`, `kind`, `attr`) shadow attributes of
/// the same name. `request.*` resolves to these same values.
#[derive(Debug, Clone)]
pub struct Activation {
    pub(crate) principal: Value,
    pub(crate) resource: Value,
    pub(crate) aux_data: Value,
    pub(crate) now: DateTime<Utc>,
}

impl Activation {
    pub fn new(request: &CheckRequest, now: DateTime<Utc>) -> Self {
        Self::from_parts(&request.principal, &request.resource, request.aux_data.as_ref(), now)
    }

    pub fn from_parts(
        principal: &Principal,
        resource: &Resource,
        aux_data: Option<&Attributes>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            principal: principal_value(principal),
            resource: resource_value(resource),
            aux_data: Value::Map(aux_data.cloned().unwrap_or_default()),
            now,
        }
    }

    /// Injected evaluation timestamp.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Whether `v` is the principal or resource binding itself.
    pub(crate) fn is_entity(&self, v: &Value) -> bool {
        ptr::eq(v, &self.principal) || ptr::eq(v, &self.resource)
    }

    pub(crate) fn request_field(&self, field: &str) -> Option<&Value> {
        match field {
            "principal" => Some(&self.principal),
            "resource" => Some(&self.resource),
            "auxData" => Some(&self.aux_data),
            _ => None,
        }
    }

    /// `request` as a standalone map. Only built when an expression uses
    /// `request` as a value rather than selecting a field from it.
    pub(crate) fn request_value(&self) -> Value {
        let mut m = BTreeMap::new();
        m.insert("principal".to_string(), flatten(&self.principal));
        m.insert("resource".to_string(), flatten(&self.resource));
        m.insert("auxData".to_string(), self.aux_data.clone());
        Value::Map(m)
    }
}

/// Field lookup on a principal/resource binding: built-ins first, then `attr`.
pub(crate) fn entity_field<'v>(entity: &'v Value, field: &str) -> Option<&'v Value> {
    let Value::Map(m) = entity else {
        return None;
    };
    m.get(field).or_else(|| match m.get("attr") {
        Some(Value::Map(attrs)) => attrs.get(field),
        _ => None,
    })
}

fn flatten(entity: &Value) -> Value {
    let Value::Map(m) = entity else {
        return entity.clone();
    };
    let mut out = match m.get("attr") {
        Some(Value::Map(attrs)) => attrs.clone(),
        _ => BTreeMap::new(),
    };
    for (k, v) in m {
        out.insert(k.clone(), v.clone());
    }
    Value::Map(out)
}

fn principal_value(p: &Principal) -> Value {
    let mut m = BTreeMap::new();
    m.insert("id".to_string(), Value::String(p.id.clone()));
    m.insert(
        "roles".to_string(),
        Value::List(p.roles.iter().cloned().map(Value::String).collect()),
    );
    m.insert("attr".to_string(), Value::Map(p.attributes.clone()));
    Value::Map(m)
}

fn resource_value(r: &Resource) -> Value {
    let mut m = BTreeMap::new();
    m.insert("kind".to_string(), Value::String(r.kind.clone()));
    m.insert("id".to_string(), Value::String(r.id.clone()));
    m.insert("attr".to_string(), Value::Map(r.attributes.clone()));
    Value::Map(m)
}
