use std::collections::BTreeSet;
use std::time::Instant;

use chrono::{DateTime, Utc};

use praetor_core::expr::Activation;
use praetor_core::model::CheckRequest;

use crate::evaluator::Evaluator;
use crate::policy::combiner::RuleInputs;
use crate::policy::{compute_derived_roles, DeadlineExceeded, PolicySnapshot};

/// Immutable request-scoped state (request id, tenant, bindings, derived roles).
#[derive(Debug)]
pub struct CheckContext {
    pub request_id: String,
    pub tenant: Option<String>,
    pub resource_kind: String,
    pub activation: Activation,
    pub principal_roles: BTreeSet<String>,
    pub derived_roles: BTreeSet<String>,
}

impl CheckContext {
    /// Bind the request and compute its derived roles against `snapshot`.
    /// Fails when `deadline` passes while derived-role conditions still remain.
    pub fn new(
        request_id: String,
        request: &CheckRequest,
        now: DateTime<Utc>,
        snapshot: &PolicySnapshot,
        evaluator: &Evaluator,
        deadline: Option<Instant>,
    ) -> Result<Self, DeadlineExceeded> {
        let activation = Activation::new(request, now);
        let derived_roles = compute_derived_roles(
            snapshot.derived_role_definitions(),
            &request.principal.roles,
            &activation,
            evaluator,
            deadline,
        )?;
        Ok(Self {
            request_id,
            tenant: request.tenant.clone(),
            resource_kind: request.resource.kind.clone(),
            activation,
            principal_roles: request.principal.roles.clone(),
            derived_roles,
        })
    }

    pub fn rule_inputs(&self) -> RuleInputs<'_> {
        RuleInputs {
            principal_roles: &self.principal_roles,
            derived_roles: &self.derived_roles,
            activation: &self.activation,
        }
    }

    pub fn derived_role_names(&self) -> Vec<String> {
        self.derived_roles.iter().cloned().collect()
    }

    /// Tenant id for logs; `-` when the request carries none.
    pub fn tenant_label(&self) -> &str {
        self.tenant.as_deref().unwrap_or("-")
    }
}
