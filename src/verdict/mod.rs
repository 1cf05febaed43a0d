//! Verdict classification
//!
//! Derives verdicts as pure functions of the checker's completion status and
//! exit code, under a configurable exit-code convention.

pub mod abi;
pub mod classifier;

pub use abi::{AbiPreset, ExitCodeAbi};
pub use classifier::{VerdictCause, VerdictClassifier};
