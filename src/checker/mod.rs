//! Sandboxed checker invocation
//!
//! A check creates a fresh container, stages the test and solution files into
//! it read-only, runs the package's checker with the `in out hint` convention
//! and turns the outcome into a verdict.

pub mod artifacts;
pub mod invoker;
pub mod stager;

pub use artifacts::{SolutionArtifacts, TestArtifacts};
pub use invoker::{Checker, CheckerSettings};
pub use stager::ArtifactStager;
