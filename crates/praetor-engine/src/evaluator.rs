//! Expression evaluator with a compiled-program cache.
//!
//! Programs are cached by exact source string and shared across requests; the
//! result of an evaluation is never cached here.

use std::sync::Arc;
use std::time::Duration;

use praetor_core::error::{ExprError, ExprErrorKind};
use praetor_core::expr::{self, Activation, Limits, Program};
use praetor_core::Value;

use crate::cache::{CacheStats, TtlLruCache};
use crate::obs::metrics::EngineMetrics;

pub struct Evaluator {
    programs: TtlLruCache<String, Arc<Program>>,
    limits: Limits,
    metrics: Arc<EngineMetrics>,
}

impl Evaluator {
    pub fn new(capacity: usize, ttl: Duration, limits: Limits, metrics: Arc<EngineMetrics>) -> Self {
        Self {
            programs: TtlLruCache::new(capacity, ttl),
            limits,
            metrics,
        }
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Compile `source`, or return the cached program for it.
    pub fn compile(&self, source: &str) -> Result<Arc<Program>, ExprError> {
        if let Some(p) = self.programs.get(source) {
            return Ok(p);
        }
        let program = Arc::new(expr::compile(source, &self.limits)?);
        self.programs.insert(source.to_string(), Arc::clone(&program));
        Ok(program)
    }

    pub fn evaluate(&self, source: &str, act: &Activation) -> Result<Value, ExprError> {
        let program = self.compile(source)?;
        program.evaluate(act, &self.limits)
    }

    /// Fail-closed boolean evaluation: any compile or evaluation error, or a
    /// non-bool result, yields `false`. Errors are logged and counted only.
    pub fn evaluate_boolean(&self, source: &str, act: &Activation) -> bool {
        let res = self
            .compile(source)
            .and_then(|p| p.evaluate_bool(act, &self.limits));
        match res {
            Ok(b) => b,
            Err(e) => {
                self.record_error(&e);
                tracing::debug!(error_kind = e.kind.as_str(), condition = %source, error = %e.message, "condition failed closed");
                false
            }
        }
    }

    fn record_error(&self, e: &ExprError) {
        self.metrics
            .condition_errors
            .inc(&[("kind", e.kind.as_str())]);
    }

    pub fn error_count(&self, kind: ExprErrorKind) -> u64 {
        self.metrics.condition_errors.get(&[("kind", kind.as_str())])
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.programs.stats()
    }
}
