//! Isolation provider interface and the local reference provider.
//!
//! The judging core never creates processes itself. It stages files and
//! describes processes through [`provider`], and an implementation decides
//! how isolation is achieved.

pub mod local;
pub mod provider;
pub mod types;

pub use provider::{Container, Filesystem, IsolationProvider, ProcessGroup};
pub use types::*;
