//! praetor engine library entry.
//!
//! This crate wires the evaluator, policy index, derived-role computer,
//! deny-overrides combiner and decision cache into the `DecisionEngine`
//! façade. It is intended to be embedded by transport front-ends and used
//! directly by integration tests.

pub mod cache;
pub mod config;
pub mod context;
pub mod decision_cache;
pub mod engine;
pub mod evaluator;
pub mod obs;
pub mod policy;
pub mod service;

pub use engine::{DecisionEngine, EngineStats};
pub use service::PolicyDecisionPoint;
