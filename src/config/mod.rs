//! Configuration
//!
//! Shared types, errors and the JSON configuration file.

pub mod loader;
pub mod types;

pub use loader::{BuildConfig, CheckerConfig, JudgeConfig};
