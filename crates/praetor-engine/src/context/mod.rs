//! Per-check context shared by every action of one request.
//!
//! Built once (activation, derived roles) and handed to per-action tasks behind
//! an `Arc`, so parallel evaluation never recomputes request-scoped state.

pub mod check;

pub use check::CheckContext;
