//! Observability
//!
//! Structured audit events for checks and builds.

pub mod audit;
