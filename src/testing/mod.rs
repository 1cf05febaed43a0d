//! Testing infrastructure
//!
//! A scripted isolation provider for deterministic tests of everything above
//! the isolation interface.

pub mod scripted;

pub use scripted::{RecordedPush, RecordedRun, ScriptedOutcome, ScriptedProvider};
