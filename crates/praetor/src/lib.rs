//! Top-level facade crate for praetor.
//!
//! Re-exports the core model/expression types and the engine library so users
//! can depend on a single crate.

pub mod core {
    pub use praetor_core::*;
}

pub mod engine {
    pub use praetor_engine::*;
}

pub use praetor_core::model::{CheckRequest, CheckResponse, Effect, Principal, Resource};
pub use praetor_engine::{DecisionEngine, PolicyDecisionPoint};
