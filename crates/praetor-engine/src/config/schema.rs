use std::time::Duration;

use serde::Deserialize;

use praetor_core::error::{PdpError, Result};
use praetor_core::expr::Limits;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    pub version: u32,

    #[serde(default)]
    pub expression_cache: ExpressionCacheSection,

    #[serde(default)]
    pub decision_cache: DecisionCacheSection,

    #[serde(default)]
    pub evaluation: EvaluationSection,

    #[serde(default)]
    pub logging: LoggingSection,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: 1,
            expression_cache: ExpressionCacheSection::default(),
            decision_cache: DecisionCacheSection::default(),
            evaluation: EvaluationSection::default(),
            logging: LoggingSection::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(PdpError::UnsupportedVersion);
        }

        self.expression_cache.validate()?;
        self.decision_cache.validate()?;
        self.evaluation.validate()?;

        Ok(())
    }
}

fn check_range<T>(name: &str, v: T, range: std::ops::RangeInclusive<T>) -> Result<()>
where
    T: PartialOrd + std::fmt::Display,
{
    if !range.contains(&v) {
        return Err(PdpError::Config(format!(
            "{name} must be between {} and {}",
            range.start(),
            range.end()
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExpressionCacheSection {
    #[serde(default = "default_expr_cache_capacity")]
    pub capacity: usize,

    #[serde(default = "default_expr_cache_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for ExpressionCacheSection {
    fn default() -> Self {
        Self {
            capacity: default_expr_cache_capacity(),
            ttl_secs: default_expr_cache_ttl_secs(),
        }
    }
}

impl ExpressionCacheSection {
    pub fn validate(&self) -> Result<()> {
        check_range("expression_cache.capacity", self.capacity, 1..=1_000_000)?;
        check_range("expression_cache.ttl_secs", self.ttl_secs, 1..=86_400)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

fn default_expr_cache_capacity() -> usize {
    1000
}
fn default_expr_cache_ttl_secs() -> u64 {
    3600
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DecisionCacheSection {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_decision_cache_capacity")]
    pub capacity: usize,

    #[serde(default = "default_decision_cache_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for DecisionCacheSection {
    fn default() -> Self {
        Self {
            enabled: false,
            capacity: default_decision_cache_capacity(),
            ttl_secs: default_decision_cache_ttl_secs(),
        }
    }
}

impl DecisionCacheSection {
    pub fn validate(&self) -> Result<()> {
        check_range("decision_cache.capacity", self.capacity, 1..=10_000_000)?;
        check_range("decision_cache.ttl_secs", self.ttl_secs, 1..=86_400)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

fn default_decision_cache_capacity() -> usize {
    10_000
}
fn default_decision_cache_ttl_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvaluationSection {
    /// Engine-wide bound on concurrently running per-action tasks.
    #[serde(default = "default_parallel_workers")]
    pub parallel_workers: usize,

    /// Requests with fewer actions are evaluated inline.
    #[serde(default = "default_parallel_threshold")]
    pub parallel_threshold: usize,

    /// Default deadline applied by `check()`. None = no deadline.
    #[serde(default)]
    pub check_timeout_ms: Option<u64>,

    #[serde(default = "default_max_expression_len")]
    pub max_expression_len: usize,

    #[serde(default = "default_max_expression_depth")]
    pub max_expression_depth: usize,

    #[serde(default = "default_max_eval_steps")]
    pub max_eval_steps: usize,

    #[serde(default = "default_regex_size_limit")]
    pub regex_size_limit: usize,
}

impl Default for EvaluationSection {
    fn default() -> Self {
        Self {
            parallel_workers: default_parallel_workers(),
            parallel_threshold: default_parallel_threshold(),
            check_timeout_ms: None,
            max_expression_len: default_max_expression_len(),
            max_expression_depth: default_max_expression_depth(),
            max_eval_steps: default_max_eval_steps(),
            regex_size_limit: default_regex_size_limit(),
        }
    }
}

impl EvaluationSection {
    pub fn validate(&self) -> Result<()> {
        check_range("evaluation.parallel_workers", self.parallel_workers, 1..=256)?;
        check_range("evaluation.parallel_threshold", self.parallel_threshold, 1..=1024)?;
        if let Some(ms) = self.check_timeout_ms {
            check_range("evaluation.check_timeout_ms", ms, 1..=60_000)?;
        }
        check_range("evaluation.max_expression_len", self.max_expression_len, 16..=1_048_576)?;
        check_range("evaluation.max_expression_depth", self.max_expression_depth, 4..=512)?;
        check_range("evaluation.max_eval_steps", self.max_eval_steps, 16..=10_000_000)?;
        check_range("evaluation.regex_size_limit", self.regex_size_limit, 1024..=67_108_864)
    }

    pub fn check_timeout(&self) -> Option<Duration> {
        self.check_timeout_ms.map(Duration::from_millis)
    }

    /// Expression compile/evaluation limits derived from this section.
    pub fn limits(&self) -> Limits {
        Limits {
            max_len: self.max_expression_len,
            max_depth: self.max_expression_depth,
            max_steps: self.max_eval_steps,
            regex_size_limit: self.regex_size_limit,
        }
    }
}

fn default_parallel_workers() -> usize {
    4
}
fn default_parallel_threshold() -> usize {
    2
}
fn default_max_expression_len() -> usize {
    4096
}
fn default_max_expression_depth() -> usize {
    64
}
fn default_max_eval_steps() -> usize {
    10_000
}
fn default_regex_size_limit() -> usize {
    1_048_576
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    /// `tracing-subscriber` EnvFilter directive; `RUST_LOG` wins when set.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self { filter: default_log_filter() }
    }
}

fn default_log_filter() -> String {
    "info".into()
}
