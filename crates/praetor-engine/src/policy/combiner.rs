//! Deny-overrides rule combining for a single `(resource, action)` pair.

use std::collections::BTreeSet;
use std::sync::Arc;

use praetor_core::expr::Activation;
use praetor_core::model::{ActionResult, Effect, ResourcePolicy};

use super::roles_intersect;
use crate::evaluator::Evaluator;

/// Per-request inputs shared by every action of one check.
pub struct RuleInputs<'a> {
    pub principal_roles: &'a BTreeSet<String>,
    pub derived_roles: &'a BTreeSet<String>,
    pub activation: &'a Activation,
}

/// Decide one action.
///
/// Starts from deny. The first matching `Deny` rule returns immediately; a
/// matching `Allow` is remembered and scanning continues so a later deny still
/// wins. With no match at all the result is the default deny.
pub fn decide_action(
    action: &str,
    policies: &[Arc<ResourcePolicy>],
    inputs: &RuleInputs<'_>,
    evaluator: &Evaluator,
) -> ActionResult {
    let derived: Vec<String> = inputs.derived_roles.iter().cloned().collect();
    let mut allowed_by: Option<(&str, &str)> = None;

    for policy in policies {
        for rule in &policy.rules {
            if !rule.covers_action(action) {
                continue;
            }
            if let Some(roles) = &rule.roles {
                if !roles_intersect(roles, inputs.principal_roles) {
                    continue;
                }
            }
            if let Some(roles) = &rule.derived_roles {
                if !roles_intersect(roles, inputs.derived_roles) {
                    continue;
                }
            }
            if let Some(cond) = &rule.condition {
                if !evaluator.evaluate_boolean(cond, inputs.activation) {
                    continue;
                }
            }

            match rule.effect {
                Effect::Deny => {
                    return ActionResult {
                        effect: Effect::Deny,
                        matched_policy: Some(policy.name.clone()),
                        matched_rule: Some(rule.name.clone()),
                        effective_derived_roles: derived,
                    };
                }
                Effect::Allow => {
                    if allowed_by.is_none() {
                        allowed_by = Some((policy.name.as_str(), rule.name.as_str()));
                    }
                }
            }
        }
    }

    match allowed_by {
        Some((policy, rule)) => ActionResult {
            effect: Effect::Allow,
            matched_policy: Some(policy.to_string()),
            matched_rule: Some(rule.to_string()),
            effective_derived_roles: derived,
        },
        None => ActionResult::default_deny(derived),
    }
}
