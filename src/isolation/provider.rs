//! Contract between the judging core and an isolation provider.
//!
//! A provider creates containers: ephemeral execution contexts with a private
//! filesystem view. Containers hand out process groups, which own process
//! descriptions until they are run synchronously. Dropping a container tears
//! it down.

use crate::config::types::{OwnerId, ResourceLimits, Result};
use crate::isolation::types::{ContainerConfig, GroupResult, Process, ProcessId, ProcessResult};
use std::path::Path;

/// Factory for isolated execution contexts
pub trait IsolationProvider: Send + Sync {
    fn create_container(&self, config: &ContainerConfig) -> Result<Box<dyn Container>>;
}

/// One isolated execution context, exclusively owned by its creator
pub trait Container {
    fn filesystem(&self) -> &dyn Filesystem;
    fn create_process_group(&self) -> Result<Box<dyn ProcessGroup + '_>>;
}

/// Private filesystem of a container. All destination paths are container paths.
pub trait Filesystem {
    /// Copy a host file into the container with the given owner and mode
    fn push(&self, source: &Path, destination: &Path, owner: OwnerId, mode: u32) -> Result<()>;

    /// Create a file inside the container from bytes
    fn write(&self, destination: &Path, contents: &[u8], owner: OwnerId, mode: u32) -> Result<()>;

    fn create_directory(&self, path: &Path, owner: OwnerId, mode: u32) -> Result<()>;

    /// Read at most `limit` bytes; `None` when the file does not exist
    fn read(&self, path: &Path, limit: usize) -> Result<Option<Vec<u8>>>;

    /// Copy a container file out to a host path
    fn pull(&self, source: &Path, destination: &Path) -> Result<()>;
}

/// Set of processes started and awaited together
pub trait ProcessGroup {
    /// Add a process running `executable` (a container path) to the group
    fn create_process(&mut self, executable: &Path) -> &mut Process;

    /// Group-wide limits; only the real time limit applies at this level
    fn set_resource_limits(&mut self, limits: ResourceLimits);

    /// Start every process and block until all of them have terminated
    fn run_synchronously(&mut self) -> Result<GroupResult>;

    /// Completion information, available after `run_synchronously`
    fn result(&self, id: ProcessId) -> Option<&ProcessResult>;
}
