//! Request-scoped derived-role computation.

use std::collections::BTreeSet;
use std::time::Instant;

use praetor_core::expr::Activation;
use praetor_core::model::DerivedRoleDefinition;

use super::roles_intersect;
use crate::evaluator::Evaluator;

/// The check deadline passed before every definition was considered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadlineExceeded;

/// Names of the derived roles that apply to this principal/resource pair.
///
/// A definition applies when the principal holds one of its parent roles and
/// its condition (if any) evaluates to true. Conditions fail closed. The
/// deadline is checked before each condition runs.
pub fn compute_derived_roles(
    definitions: &[DerivedRoleDefinition],
    principal_roles: &BTreeSet<String>,
    act: &Activation,
    evaluator: &Evaluator,
    deadline: Option<Instant>,
) -> Result<BTreeSet<String>, DeadlineExceeded> {
    let mut derived = BTreeSet::new();
    for def in definitions {
        if derived.contains(&def.name) {
            continue;
        }
        if !roles_intersect(&def.parent_roles, principal_roles) {
            continue;
        }
        let applies = match &def.condition {
            Some(cond) => {
                if deadline.is_some_and(|at| Instant::now() >= at) {
                    return Err(DeadlineExceeded);
                }
                evaluator.evaluate_boolean(cond, act)
            }
            None => true,
        };
        if applies {
            derived.insert(def.name.clone());
        }
    }
    Ok(derived)
}
