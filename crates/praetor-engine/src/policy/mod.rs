//! Policy layer: snapshot index, derived roles, and the deny-overrides combiner.
//!
//! Policies are validated and compiled into an immutable snapshot at load time;
//! the request path only reads snapshots.

pub mod combiner;
pub mod derived;
pub mod index;

pub use combiner::decide_action;
pub use derived::{compute_derived_roles, DeadlineExceeded};
pub use index::{DerivedRoleSet, PolicyCounts, PolicyIndex, PolicySnapshot, ResourcePolicySet};

use std::collections::BTreeSet;

use praetor_core::model::WILDCARD;

/// Whether a principal's roles satisfy a role constraint. `"*"` in `allowed`
/// matches any role the principal holds; a principal without roles never matches.
pub(crate) fn roles_intersect(allowed: &BTreeSet<String>, held: &BTreeSet<String>) -> bool {
    if held.is_empty() {
        return false;
    }
    allowed.contains(WILDCARD) || allowed.iter().any(|r| held.contains(r))
}
