//! Solution builders.
//!
//! A builder turns source text into a launchable solution inside a caller's
//! container. Languages only describe their compile step and launch command;
//! running the build is shared.

pub mod builder;
pub mod languages;
pub mod registry;

pub use builder::{BuildOutcome, BuildPlan, Builder, CompileStep, LaunchCommand, Solution};
pub use registry::{builder_for, BuilderConfig};
