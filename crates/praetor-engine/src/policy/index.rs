//! Read-optimized policy snapshot with atomic replacement.
//!
//! A snapshot is never mutated after construction. Reloads build a new one
//! (sharing whichever half did not change) and swap the `Arc` under a short
//! write lock, so in-flight checks keep reading the snapshot they started with.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;

use praetor_core::error::{PdpError, Result};
use praetor_core::model::{DerivedRoleDefinition, DerivedRolesPolicy, ResourcePolicy};

use crate::evaluator::Evaluator;

/// Resource policies grouped by kind, in load order.
#[derive(Debug, Default)]
pub struct ResourcePolicySet {
    by_kind: HashMap<String, Vec<Arc<ResourcePolicy>>>,
    // Kinds with at least one condition reading `now`.
    time_sensitive_kinds: HashSet<String>,
    policy_count: usize,
    rule_count: usize,
}

impl ResourcePolicySet {
    /// Validate shapes and compile every condition. Fails on the first problem.
    pub fn build(policies: Vec<ResourcePolicy>, evaluator: &Evaluator) -> Result<Self> {
        let mut set = ResourcePolicySet::default();

        for policy in policies {
            if policy.name.trim().is_empty() {
                return Err(PdpError::invalid_policy("<unnamed>", "policy name must not be empty"));
            }
            if policy.resource_kind.trim().is_empty() {
                return Err(PdpError::invalid_policy(&policy.name, "resourceKind must not be empty"));
            }

            let mut time_sensitive = false;
            for rule in &policy.rules {
                if rule.actions.is_empty() || rule.actions.iter().any(|a| a.is_empty()) {
                    return Err(PdpError::invalid_policy(
                        &policy.name,
                        format!("rule `{}`: actions must be non-empty strings", rule.name),
                    ));
                }
                if let Some(cond) = &rule.condition {
                    let program = evaluator.compile(cond).map_err(|e| {
                        PdpError::invalid_policy(&policy.name, format!("rule `{}`: {e}", rule.name))
                    })?;
                    time_sensitive |= program.uses_now();
                }
            }

            if time_sensitive {
                set.time_sensitive_kinds.insert(policy.resource_kind.clone());
            }
            set.policy_count += 1;
            set.rule_count += policy.rules.len();
            set.by_kind
                .entry(policy.resource_kind.clone())
                .or_default()
                .push(Arc::new(policy));
        }
        Ok(set)
    }
}

/// Flattened derived-role definitions from every loaded derived-roles policy.
#[derive(Debug, Default)]
pub struct DerivedRoleSet {
    definitions: Vec<DerivedRoleDefinition>,
    policy_count: usize,
    time_sensitive: bool,
}

impl DerivedRoleSet {
    pub fn build(policies: Vec<DerivedRolesPolicy>, evaluator: &Evaluator) -> Result<Self> {
        let mut set = DerivedRoleSet::default();

        for policy in policies {
            if policy.name.trim().is_empty() {
                return Err(PdpError::invalid_policy("<unnamed>", "policy name must not be empty"));
            }
            for def in &policy.definitions {
                if def.name.trim().is_empty() {
                    return Err(PdpError::invalid_policy(&policy.name, "derived role name must not be empty"));
                }
                if def.parent_roles.is_empty() {
                    tracing::warn!(policy = %policy.name, role = %def.name, "derived role has no parentRoles and can never apply");
                }
                if let Some(cond) = &def.condition {
                    let program = evaluator.compile(cond).map_err(|e| {
                        PdpError::invalid_policy(&policy.name, format!("derived role `{}`: {e}", def.name))
                    })?;
                    set.time_sensitive |= program.uses_now();
                }
            }
            set.policy_count += 1;
            set.definitions.extend(policy.definitions);
        }
        Ok(set)
    }
}

/// Loaded policy counts, exposed through engine stats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PolicyCounts {
    pub resource_kinds: usize,
    pub resource_policies: usize,
    pub rules: usize,
    pub derived_roles_policies: usize,
    pub derived_role_definitions: usize,
}

#[derive(Debug, Default)]
pub struct PolicySnapshot {
    generation: u64,
    resources: Arc<ResourcePolicySet>,
    derived: Arc<DerivedRoleSet>,
}

impl PolicySnapshot {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Policies applicable to `kind`; empty for unknown kinds.
    pub fn lookup_by_resource_kind(&self, kind: &str) -> &[Arc<ResourcePolicy>] {
        self.resources
            .by_kind
            .get(kind)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Full active set of derived-role definitions, independent of resource kind.
    pub fn derived_role_definitions(&self) -> &[DerivedRoleDefinition] {
        &self.derived.definitions
    }

    /// Whether a decision for `kind` may depend on the evaluation timestamp.
    pub fn is_time_sensitive(&self, kind: &str) -> bool {
        self.derived.time_sensitive || self.resources.time_sensitive_kinds.contains(kind)
    }

    pub fn counts(&self) -> PolicyCounts {
        PolicyCounts {
            resource_kinds: self.resources.by_kind.len(),
            resource_policies: self.resources.policy_count,
            rules: self.resources.rule_count,
            derived_roles_policies: self.derived.policy_count,
            derived_role_definitions: self.derived.definitions.len(),
        }
    }
}

/// Holder of the active snapshot.
#[derive(Debug, Default)]
pub struct PolicyIndex {
    current: RwLock<Arc<PolicySnapshot>>,
    // Serializes read-modify-write of the snapshot; readers never take it.
    writer: Mutex<()>,
}

impl PolicyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// The active snapshot. Cheap: one read lock and an `Arc` clone.
    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    pub fn replace_resources(&self, resources: ResourcePolicySet) -> Arc<PolicySnapshot> {
        self.swap(|cur| PolicySnapshot {
            generation: cur.generation + 1,
            resources: Arc::new(resources),
            derived: Arc::clone(&cur.derived),
        })
    }

    pub fn replace_derived(&self, derived: DerivedRoleSet) -> Arc<PolicySnapshot> {
        self.swap(|cur| PolicySnapshot {
            generation: cur.generation + 1,
            resources: Arc::clone(&cur.resources),
            derived: Arc::new(derived),
        })
    }

    /// Drop every policy. The generation still advances.
    pub fn clear(&self) -> Arc<PolicySnapshot> {
        self.swap(|cur| PolicySnapshot {
            generation: cur.generation + 1,
            ..PolicySnapshot::default()
        })
    }

    fn swap(&self, build: impl FnOnce(&PolicySnapshot) -> PolicySnapshot) -> Arc<PolicySnapshot> {
        let _w = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let cur = self.snapshot();
        let next = Arc::new(build(&cur));
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Arc::clone(&next);
        tracing::info!(
            generation = next.generation,
            kinds = next.resources.by_kind.len(),
            derived_roles = next.derived.definitions.len(),
            "policy snapshot swapped"
        );
        next
    }
}
