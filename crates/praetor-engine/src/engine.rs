//! Decision engine façade.
//!
//! Orchestrates one check: request validation, decision-cache lookup, derived
//! roles, per-action combining (inline or on the worker pool), and response
//! assembly. Callers always get a `CheckResponse`; evaluator errors never
//! cross this boundary.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use uuid::Uuid;

use praetor_core::error::{ExprErrorKind, Result};
use praetor_core::model::{
    ActionResult, CheckFailure, CheckRequest, CheckResponse, DerivedRolesPolicy, ResponseMeta,
    ResourcePolicy,
};

use crate::cache::CacheStats;
use crate::config::EngineConfig;
use crate::context::CheckContext;
use crate::decision_cache::{fingerprint, CachedDecision, DecisionCache};
use crate::evaluator::Evaluator;
use crate::obs::metrics::EngineMetrics;
use crate::policy::{decide_action, DerivedRoleSet, PolicyCounts, PolicyIndex, PolicySnapshot, ResourcePolicySet};

/// Serializable engine statistics for admin/health endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub generation: u64,
    pub policies: PolicyCounts,
    pub expression_cache: CacheStats,
    pub decision_cache: Option<CacheStats>,
    pub condition_errors: BTreeMap<String, u64>,
    pub checks: u64,
    pub timeouts: u64,
}

#[derive(Clone)]
pub struct DecisionEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    cfg: EngineConfig,
    evaluator: Evaluator,
    index: PolicyIndex,
    decisions: Option<DecisionCache>,
    metrics: Arc<EngineMetrics>,
    // Engine-wide bound on concurrently running per-action tasks.
    workers: Arc<Semaphore>,
}

impl DecisionEngine {
    /// Build an engine. Returns Result so embedding processes can surface
    /// a bad config instead of panicking.
    pub fn new(cfg: EngineConfig) -> Result<Self> {
        cfg.validate()?;

        let metrics = Arc::new(EngineMetrics::default());
        let evaluator = Evaluator::new(
            cfg.expression_cache.capacity,
            cfg.expression_cache.ttl(),
            cfg.evaluation.limits(),
            Arc::clone(&metrics),
        );
        let decisions = cfg
            .decision_cache
            .enabled
            .then(|| DecisionCache::new(cfg.decision_cache.capacity, cfg.decision_cache.ttl()));
        let workers = Arc::new(Semaphore::new(cfg.evaluation.parallel_workers));

        tracing::info!(
            workers = cfg.evaluation.parallel_workers,
            decision_cache = cfg.decision_cache.enabled,
            "decision engine ready"
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                cfg,
                evaluator,
                index: PolicyIndex::new(),
                decisions,
                metrics,
                workers,
            }),
        })
    }

    pub fn cfg(&self) -> &EngineConfig {
        &self.inner.cfg
    }

    /// The shared expression evaluator (compile / evaluate / evaluate_boolean).
    pub fn evaluator(&self) -> &Evaluator {
        &self.inner.evaluator
    }

    /// The active policy snapshot.
    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        self.inner.index.snapshot()
    }

    // ---------------------------------------------------------------------
    // Policy loading
    // ---------------------------------------------------------------------

    /// Replace every resource policy. All-or-nothing: on error the active
    /// snapshot is untouched.
    pub fn load_resource_policies(&self, policies: Vec<ResourcePolicy>) -> Result<()> {
        let set = ResourcePolicySet::build(policies, &self.inner.evaluator)
            .map_err(|e| self.reject_load("resource", e))?;
        let snapshot = self.inner.index.replace_resources(set);
        self.after_reload("resource", &snapshot);
        Ok(())
    }

    /// Replace every derived-role definition. All-or-nothing.
    pub fn load_derived_roles_policies(&self, policies: Vec<DerivedRolesPolicy>) -> Result<()> {
        let set = DerivedRoleSet::build(policies, &self.inner.evaluator)
            .map_err(|e| self.reject_load("derived", e))?;
        let snapshot = self.inner.index.replace_derived(set);
        self.after_reload("derived", &snapshot);
        Ok(())
    }

    pub fn clear_policies(&self) {
        let snapshot = self.inner.index.clear();
        self.after_reload("clear", &snapshot);
    }

    fn reject_load(&self, kind: &str, e: praetor_core::PdpError) -> praetor_core::PdpError {
        self.inner.metrics.policy_reloads.inc(&[("kind", "rejected")]);
        tracing::warn!(kind = kind, error = %e, "policy load rejected");
        e
    }

    fn after_reload(&self, kind: &str, snapshot: &PolicySnapshot) {
        // The swap already happened; anything cached before it is stale.
        if let Some(cache) = &self.inner.decisions {
            cache.clear();
        }

        let m = &self.inner.metrics;
        m.policy_reloads.inc(&[("kind", kind)]);
        let counts = snapshot.counts();
        m.policies_loaded.set(&[("type", "resource_policies")], counts.resource_policies as i64);
        m.policies_loaded.set(&[("type", "rules")], counts.rules as i64);
        m.policies_loaded.set(&[("type", "derived_roles")], counts.derived_role_definitions as i64);
    }

    // ---------------------------------------------------------------------
    // Checks
    // ---------------------------------------------------------------------

    /// Decide every requested action. Uses the configured default deadline, if any.
    pub async fn check(&self, request: CheckRequest) -> CheckResponse {
        let deadline = self.inner.cfg.evaluation.check_timeout();
        self.run_check(request, deadline, Utc::now()).await
    }

    /// Like [`check`](Self::check) with an explicit deadline. Actions not
    /// resolved in time are `Deny` and `meta.error` is `Timeout`.
    pub async fn check_with_deadline(&self, request: CheckRequest, deadline: Duration) -> CheckResponse {
        self.run_check(request, Some(deadline), Utc::now()).await
    }

    /// Evaluate with a caller-supplied clock (replays, tests).
    pub async fn check_at(&self, request: CheckRequest, now: DateTime<Utc>) -> CheckResponse {
        let deadline = self.inner.cfg.evaluation.check_timeout();
        self.run_check(request, deadline, now).await
    }

    /// N independent checks evaluated concurrently; output order matches input.
    pub async fn check_batch(&self, requests: Vec<CheckRequest>) -> Vec<CheckResponse> {
        futures_util::future::join_all(requests.into_iter().map(|r| self.check(r))).await
    }

    async fn run_check(
        &self,
        request: CheckRequest,
        deadline: Option<Duration>,
        now: DateTime<Utc>,
    ) -> CheckResponse {
        let started = Instant::now();
        let m = &self.inner.metrics;
        let request_id = request
            .request_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if let Some(reason) = request.shape_error() {
            tracing::warn!(request_id = %request_id, reason = %reason, "invalid check request");
            let results = dedup_actions(&request.actions)
                .into_iter()
                .filter(|a| !a.is_empty())
                .map(|a| (a, ActionResult::default_deny(Vec::new())))
                .collect();
            return self.finish(
                request_id,
                results,
                Vec::new(),
                Some(CheckFailure::InvalidRequest(reason)),
                false,
                started,
            );
        }

        let snapshot = self.inner.index.snapshot();

        // Decision cache: skipped for kinds whose outcome may depend on the clock.
        let cache_key = match &self.inner.decisions {
            Some(cache) if !snapshot.is_time_sensitive(&request.resource.kind) => {
                let key = fingerprint(&request);
                if let Some(hit) = cache.get(&key, snapshot.generation()) {
                    m.decision_cache.inc(&[("result", "hit")]);
                    tracing::debug!(request_id = %request_id, kind = %request.resource.kind, "decision cache hit");
                    return self.finish(
                        request_id,
                        hit.results.clone(),
                        hit.policies_evaluated.clone(),
                        None,
                        true,
                        started,
                    );
                }
                m.decision_cache.inc(&[("result", "miss")]);
                Some(key)
            }
            Some(_) => {
                m.decision_cache.inc(&[("result", "bypass")]);
                None
            }
            None => None,
        };

        let policies_evaluated: Vec<String> = snapshot
            .lookup_by_resource_kind(&request.resource.kind)
            .iter()
            .map(|p| p.name.clone())
            .collect();
        let actions = dedup_actions(&request.actions);
        // A deadline too large to represent is no deadline.
        let deadline_at = deadline.and_then(|d| started.checked_add(d));

        let ctx = match CheckContext::new(
            request_id.clone(),
            &request,
            now,
            &snapshot,
            &self.inner.evaluator,
            deadline_at,
        ) {
            Ok(ctx) if !expired(deadline_at) => Arc::new(ctx),
            built => {
                let derived = built.map(|c| c.derived_role_names()).unwrap_or_default();
                tracing::warn!(
                    request_id = %request_id,
                    kind = %request.resource.kind,
                    "check deadline passed before rule evaluation; all actions denied"
                );
                let results = actions
                    .into_iter()
                    .map(|a| (a, ActionResult::default_deny(derived.clone())))
                    .collect();
                return self.finish(
                    request_id,
                    results,
                    policies_evaluated,
                    Some(CheckFailure::Timeout),
                    false,
                    started,
                );
            }
        };

        let (mut resolved, timed_out) = if actions.len() < self.inner.cfg.evaluation.parallel_threshold {
            self.evaluate_inline(&ctx, &snapshot, &actions, deadline_at)
        } else {
            self.evaluate_parallel(&ctx, &snapshot, &actions, deadline_at).await
        };

        // Unresolved actions (timeout, aborted task) fail closed.
        let results: BTreeMap<String, ActionResult> = actions
            .into_iter()
            .map(|a| {
                let res = resolved
                    .remove(&a)
                    .unwrap_or_else(|| ActionResult::default_deny(ctx.derived_role_names()));
                (a, res)
            })
            .collect();

        let failure = if timed_out {
            tracing::warn!(
                request_id = %ctx.request_id,
                tenant = ctx.tenant_label(),
                kind = %ctx.resource_kind,
                "check deadline exceeded; unresolved actions denied"
            );
            Some(CheckFailure::Timeout)
        } else {
            if let (Some(cache), Some(key)) = (&self.inner.decisions, cache_key) {
                cache.insert(
                    key,
                    CachedDecision {
                        generation: snapshot.generation(),
                        results: results.clone(),
                        policies_evaluated: policies_evaluated.clone(),
                    },
                );
            }
            None
        };

        self.finish(ctx.request_id.clone(), results, policies_evaluated, failure, false, started)
    }

    /// Evaluate on the calling task. Only used below `parallel_threshold`, so
    /// the work between deadline checks is a single action.
    fn evaluate_inline(
        &self,
        ctx: &CheckContext,
        snapshot: &PolicySnapshot,
        actions: &[String],
        deadline_at: Option<Instant>,
    ) -> (HashMap<String, ActionResult>, bool) {
        let policies = snapshot.lookup_by_resource_kind(&ctx.resource_kind);
        let inputs = ctx.rule_inputs();
        let mut out = HashMap::with_capacity(actions.len());

        for action in actions {
            if expired(deadline_at) {
                return (out, true);
            }
            let res = decide_action(action, policies, &inputs, &self.inner.evaluator);
            // Finished, but too late to count.
            if expired(deadline_at) {
                return (out, true);
            }
            out.insert(action.clone(), res);
        }
        (out, false)
    }

    /// Fan actions out to the blocking pool, at most `parallel_workers` at a
    /// time across the engine.
    ///
    /// On timeout the response is assembled from whatever resolved in time. An
    /// action already running cannot be interrupted: it is abandoned, runs to
    /// completion on its blocking thread holding its worker permit, and its
    /// result is discarded. Actions still waiting for a permit never start.
    async fn evaluate_parallel(
        &self,
        ctx: &Arc<CheckContext>,
        snapshot: &Arc<PolicySnapshot>,
        actions: &[String],
        deadline_at: Option<Instant>,
    ) -> (HashMap<String, ActionResult>, bool) {
        let results: Arc<Mutex<HashMap<String, ActionResult>>> =
            Arc::new(Mutex::new(HashMap::with_capacity(actions.len())));

        let mut tasks = Vec::with_capacity(actions.len());
        for action in actions {
            let inner = Arc::clone(&self.inner);
            let ctx = Arc::clone(ctx);
            let snapshot = Arc::clone(snapshot);
            let results = Arc::clone(&results);
            let action = action.clone();

            tasks.push(tokio::spawn(async move {
                let Ok(permit) = Arc::clone(&inner.workers).acquire_owned().await else {
                    return;
                };
                let work = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    if expired(deadline_at) {
                        return;
                    }
                    let policies = snapshot.lookup_by_resource_kind(&ctx.resource_kind);
                    let res = decide_action(&action, policies, &ctx.rule_inputs(), &inner.evaluator);
                    if expired(deadline_at) {
                        return;
                    }
                    results
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(action, res);
                });
                if let Err(e) = work.await {
                    tracing::error!(error = %e, "action evaluation task failed");
                }
            }));
        }

        let all = futures_util::future::join_all(tasks.iter_mut());
        let fired = match deadline_at {
            Some(at) => {
                let remaining = at.saturating_duration_since(Instant::now());
                tokio::time::timeout(remaining, all).await.is_err()
            }
            None => {
                all.await;
                false
            }
        };
        if fired {
            for t in &tasks {
                t.abort();
            }
        }

        let resolved = std::mem::take(&mut *results.lock().unwrap_or_else(|e| e.into_inner()));
        // Tasks that finished after the deadline dropped their results.
        let timed_out = fired || (deadline_at.is_some() && resolved.len() < actions.len());
        (resolved, timed_out)
    }

    fn finish(
        &self,
        request_id: String,
        results: BTreeMap<String, ActionResult>,
        policies_evaluated: Vec<String>,
        error: Option<CheckFailure>,
        cache_hit: bool,
        started: Instant,
    ) -> CheckResponse {
        let m = &self.inner.metrics;
        let elapsed = started.elapsed();

        for r in results.values() {
            m.action_decisions.inc(&[("effect", r.effect.as_str())]);
        }
        let allowed = results.values().filter(|r| r.is_allowed()).count();
        let outcome = match &error {
            Some(CheckFailure::Timeout) => "timeout",
            Some(CheckFailure::InvalidRequest(_)) => "invalid",
            None if allowed == results.len() && allowed > 0 => "allow",
            None if allowed == 0 => "deny",
            None => "partial",
        };
        m.checks.inc(&[("outcome", outcome)]);
        m.check_duration.observe(&[], elapsed);

        tracing::debug!(
            request_id = %request_id,
            outcome = outcome,
            cache_hit = cache_hit,
            micros = elapsed.as_micros() as u64,
            "check complete"
        );

        CheckResponse {
            request_id,
            results,
            meta: ResponseMeta {
                evaluation_duration_ms: elapsed.as_secs_f64() * 1000.0,
                policies_evaluated,
                cache_hit,
                error,
            },
        }
    }

    // ---------------------------------------------------------------------
    // Observability
    // ---------------------------------------------------------------------

    pub fn stats(&self) -> EngineStats {
        let snapshot = self.inner.index.snapshot();
        let m = &self.inner.metrics;
        let condition_errors = ExprErrorKind::ALL
            .iter()
            .map(|k| (k.as_str().to_string(), self.inner.evaluator.error_count(*k)))
            .collect();

        EngineStats {
            generation: snapshot.generation(),
            policies: snapshot.counts(),
            expression_cache: self.inner.evaluator.cache_stats(),
            decision_cache: self.inner.decisions.as_ref().map(DecisionCache::stats),
            condition_errors,
            checks: m.checks.total(),
            timeouts: m.checks.get(&[("outcome", "timeout")]),
        }
    }

    /// Prometheus text exposition of engine metrics plus cache gauges.
    pub fn render_metrics(&self) -> String {
        let expr = self.inner.evaluator.cache_stats();
        let mut extra = vec![
            ("praetor_policy_generation", self.inner.index.snapshot().generation()),
            ("praetor_expression_cache_entries", expr.size as u64),
            ("praetor_expression_cache_hits_total", expr.hits),
            ("praetor_expression_cache_misses_total", expr.misses),
            ("praetor_expression_cache_evictions_total", expr.evictions),
        ];
        if let Some(cache) = &self.inner.decisions {
            extra.push(("praetor_decision_cache_entries", cache.stats().size as u64));
        }
        self.inner.metrics.render(&extra)
    }
}

fn expired(deadline_at: Option<Instant>) -> bool {
    deadline_at.is_some_and(|at| Instant::now() >= at)
}

/// Requested actions without duplicates, first occurrence wins.
fn dedup_actions(actions: &[String]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(actions.len());
    actions
        .iter()
        .filter(|a| seen.insert(a.as_str()))
        .cloned()
        .collect()
}
