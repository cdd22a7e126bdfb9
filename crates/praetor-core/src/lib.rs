//! praetor core: request/policy model, attribute values, and the condition
//! expression language.
//!
//! This crate carries no async runtime or I/O dependencies so the model and the expression
//! compiler can be reused by tooling (policy linters, test harnesses) as well as
//! by the engine.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here. Malformed policies,
//! requests, and expressions surface as `PdpError`/`ExprError` values.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod expr;
pub mod model;
pub mod value;

/// Shared result type.
pub use error::{ErrorCode, ExprError, ExprErrorKind, PdpError, Result};
pub use value::{Attributes, Value};
