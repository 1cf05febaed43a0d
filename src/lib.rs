//! judgebox: sandboxed checker invocation and solution building for a grading pipeline
//!
//! # Architecture
//!
//! The core never starts processes itself. It describes containers and
//! processes to an isolation provider and derives verdicts from what the
//! provider reports.
//!
//! ## Isolation ([`isolation`])
//! - [`isolation::provider`]: Provider, container, filesystem and process group traits
//! - [`isolation::types`]: Process descriptions, streams and completion statuses
//! - [`isolation::local`]: Host-backed provider (private trees, bind mounts, rlimits)
//!
//! ## Checking ([`checker`])
//! - [`checker::artifacts`]: Test and solution artifact sets
//! - [`checker::stager`]: Read-only staging at fixed container paths
//! - [`checker::invoker`]: Checker invocation and result assembly
//!
//! ## Verdict ([`verdict`])
//! - [`verdict::classifier`]: Group status, process status, exit code decision table
//! - [`verdict::abi`]: Configurable exit-code conventions
//!
//! ## Building ([`judge`])
//! - [`judge::builder`]: Builder and solution contracts, shared build runner
//! - [`judge::registry`]: Strategy lookup by name
//! - [`judge::languages`]: Compiled, interpreted and JVM strategies
//!
//! ## Support
//! - [`config`]: Shared types, errors and the JSON configuration file
//! - [`observability::audit`]: Structured audit events
//! - [`utils::output`]: Bounded output loading
//! - [`testing`]: Scripted provider for deterministic tests
//!
//! # Design Principles
//!
//! 1. **Sandbox failures are never checker answers** - only a normal exit with a code is trusted
//! 2. **One container per check** - torn down on every path by `Drop`
//! 3. **Infrastructure errors are errors** - program misbehaviour is a verdict
//! 4. **Exhaustive decision table** - new statuses are compile errors, not silent defaults

// Isolation provider interface and the local provider
pub mod isolation;

// Checker invocation
pub mod checker;

// Verdict classification
pub mod verdict;

// Solution builders
pub mod judge;

// Observability
pub mod observability;

// Configuration
pub mod config;

// Utilities
pub mod utils;

// Testing Infrastructure
pub mod testing;

// CLI entrypoint wiring for the judgebox binary.
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;
