//! Reference isolation provider backed by the local host.
//!
//! Every container gets a private directory tree below the provider's
//! runtime root. Read-only mounts use bind mounts when running as root and
//! fall back to copies otherwise. Processes run with rlimits, in their own
//! process group, under the requested identity when privileges allow.
//! Memory limits go through a cgroup when one can be prepared; otherwise
//! they are only an address-space cap and violations are not reported.

mod cgroup;
mod filesystem;
mod group;

pub use cgroup::{CgroupRoot, MemoryCgroup, MemoryEvidence, DEFAULT_CGROUP_ROOT};
pub use filesystem::LocalFilesystem;
pub use group::LocalProcessGroup;

use crate::config::types::{JudgeError, OwnerId, Result};
use crate::isolation::provider::{Container, Filesystem, IsolationProvider, ProcessGroup};
use crate::isolation::types::ContainerConfig;
use crate::observability::audit::{self, AuditEvent, AuditEventType, RunId};
use log::{debug, error, info, warn};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// How memory limits of local processes are enforced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryEnforcement {
    /// `memory.max` with OOM kills reported as memory limit violations
    Cgroup,
    /// `RLIMIT_AS` only: allocations fail, the program decides how to exit
    AddressSpace,
}

pub struct LocalProvider {
    runtime_root: PathBuf,
    privileged: bool,
    cgroup_root: Option<CgroupRoot>,
}

impl LocalProvider {
    /// As root, memory limits use a cgroup below [`DEFAULT_CGROUP_ROOT`] when
    /// the memory controller can be delegated there.
    pub fn new(runtime_root: impl Into<PathBuf>) -> Self {
        let privileged = nix::unistd::geteuid().is_root();
        let cgroup_root = if privileged {
            match CgroupRoot::prepare(DEFAULT_CGROUP_ROOT) {
                Ok(root) => Some(root),
                Err(e) => {
                    warn!("Memory limits fall back to address-space caps: {}", e);
                    None
                }
            }
        } else {
            None
        };
        Self {
            runtime_root: runtime_root.into(),
            privileged,
            cgroup_root,
        }
    }

    /// Use a specific parent cgroup, e.g. a subtree delegated to this user
    pub fn with_cgroup_root(mut self, path: impl Into<PathBuf>) -> Result<Self> {
        self.cgroup_root = Some(CgroupRoot::prepare(path)?);
        Ok(self)
    }

    /// Per-user directory under the system temp dir
    pub fn default_runtime_root() -> PathBuf {
        std::env::temp_dir().join(format!("judgebox-uid-{}", nix::unistd::geteuid().as_raw()))
    }

    pub fn runtime_root(&self) -> &Path {
        &self.runtime_root
    }

    pub fn is_privileged(&self) -> bool {
        self.privileged
    }

    pub fn memory_enforcement(&self) -> MemoryEnforcement {
        if self.cgroup_root.is_some() {
            MemoryEnforcement::Cgroup
        } else {
            MemoryEnforcement::AddressSpace
        }
    }
}

impl Default for LocalProvider {
    fn default() -> Self {
        Self::new(Self::default_runtime_root())
    }
}

impl IsolationProvider for LocalProvider {
    fn create_container(&self, config: &ContainerConfig) -> Result<Box<dyn Container>> {
        fs::create_dir_all(&self.runtime_root).map_err(|e| {
            JudgeError::Isolation(format!(
                "Failed to create runtime root {}: {}",
                self.runtime_root.display(),
                e
            ))
        })?;

        let id = uuid::Uuid::new_v4();
        let root = self.runtime_root.join(id.to_string());
        fs::create_dir(&root)?;
        fs::set_permissions(&root, fs::Permissions::from_mode(0o755))?;

        let container = LocalContainer {
            id: RunId::from(id),
            filesystem: LocalFilesystem::new(root, self.privileged),
            privileged: self.privileged,
            cgroup_root: self.cgroup_root.clone(),
        };

        // Layout failures drop the container, which removes the partial tree.
        let owner = OwnerId::current();
        for directory in &config.directories {
            container
                .filesystem
                .create_directory(&directory.path, owner, directory.mode)?;
        }
        for mount in &config.mounts {
            container.filesystem.bind(mount)?;
        }

        info!(
            "Created container at {} ({} directories, {} mounts)",
            container.filesystem.root().display(),
            config.directories.len(),
            config.mounts.len()
        );
        Ok(Box::new(container))
    }
}

pub struct LocalContainer {
    id: RunId,
    filesystem: LocalFilesystem,
    privileged: bool,
    cgroup_root: Option<CgroupRoot>,
}

impl LocalContainer {
    pub fn root(&self) -> &Path {
        self.filesystem.root()
    }
}

impl Container for LocalContainer {
    fn filesystem(&self) -> &dyn Filesystem {
        &self.filesystem
    }

    fn create_process_group(&self) -> Result<Box<dyn ProcessGroup + '_>> {
        Ok(Box::new(LocalProcessGroup::new(
            &self.filesystem,
            self.privileged,
            self.cgroup_root.as_ref(),
        )))
    }
}

impl Drop for LocalContainer {
    fn drop(&mut self) {
        match self.filesystem.teardown() {
            Ok(()) => debug!("Removed container {}", self.filesystem.root().display()),
            Err(e) => {
                error!("Container teardown failed: {}", e);
                audit::record(&teardown_failure_event(&self.id, self.filesystem.root(), &e));
            }
        }
    }
}

fn teardown_failure_event(id: &RunId, root: &Path, error: &JudgeError) -> AuditEvent {
    AuditEvent::new(
        id,
        AuditEventType::TeardownFailure,
        format!("root={} error={}", root.display(), error),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isolation::types::{AccessMode, GroupCompletionStatus, ProcessCompletionStatus, Stream};

    fn provider() -> (tempfile::TempDir, LocalProvider) {
        let dir = tempfile::tempdir().unwrap();
        fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o755)).unwrap();
        let provider = LocalProvider::new(dir.path().join("runtime"));
        (dir, provider)
    }

    #[test]
    fn dropping_container_removes_its_tree() {
        let (_dir, provider) = provider();
        let config = ContainerConfig::default().with_directory("/tmp/work", 0o755);
        let container = provider.create_container(&config).unwrap();
        container
            .filesystem()
            .write(Path::new("/tmp/work/a"), b"x", OwnerId::current(), 0o444)
            .unwrap();

        let roots: Vec<_> = fs::read_dir(provider.runtime_root()).unwrap().collect();
        assert_eq!(roots.len(), 1);
        drop(container);
        assert_eq!(fs::read_dir(provider.runtime_root()).unwrap().count(), 0);
    }

    #[test]
    fn process_output_lands_in_private_file() {
        let (_dir, provider) = provider();
        let config = ContainerConfig::default().with_directory("/tmp/work", 0o755);
        let container = provider.create_container(&config).unwrap();

        let mut group = container.create_process_group().unwrap();
        let id = {
            let process = group.create_process(Path::new("/bin/sh"));
            process
                .set_arguments(["-c", "echo hello; echo oops >&2; exit 3"])
                .set_current_dir("/tmp/work")
                .set_stream(1, Stream::file("/tmp/work/log", AccessMode::WriteOnly))
                .set_stream(2, Stream::Alias(1));
            process.id()
        };
        let group_result = group.run_synchronously().unwrap();
        assert_eq!(group_result.completion_status, GroupCompletionStatus::AbnormalExit);

        let result = group.result(id).unwrap();
        assert_eq!(result.completion_status, ProcessCompletionStatus::AbnormalExit);
        assert_eq!(result.exit_status, Some(3));

        let log = container
            .filesystem()
            .read(Path::new("/tmp/work/log"), 1024)
            .unwrap()
            .unwrap();
        assert_eq!(String::from_utf8(log).unwrap(), "hello\noops\n");
    }

    #[test]
    fn real_time_limit_kills_the_group() {
        let (_dir, provider) = provider();
        let container = provider.create_container(&ContainerConfig::default()).unwrap();
        let mut group = container.create_process_group().unwrap();
        group.set_resource_limits(crate::config::types::ResourceLimits {
            real_time_limit_ms: Some(200),
            ..Default::default()
        });
        let id = group
            .create_process(Path::new("/bin/sh"))
            .set_arguments(["-c", "sleep 5"])
            .id();

        let group_result = group.run_synchronously().unwrap();
        assert_eq!(
            group_result.completion_status,
            GroupCompletionStatus::RealTimeLimitExceeded
        );
        assert!(group_result.real_time < std::time::Duration::from_secs(4));
        assert_eq!(group.result(id).unwrap().exit_status, None);
    }

    #[test]
    fn missing_executable_is_start_failed() {
        let (_dir, provider) = provider();
        let container = provider.create_container(&ContainerConfig::default()).unwrap();
        let mut group = container.create_process_group().unwrap();
        let id = group.create_process(Path::new("/nonexistent/tool")).id();
        let group_result = group.run_synchronously().unwrap();
        assert_eq!(group_result.completion_status, GroupCompletionStatus::AbnormalExit);
        assert_eq!(
            group.result(id).unwrap().completion_status,
            ProcessCompletionStatus::StartFailed
        );
        assert!(group.run_synchronously().is_err());
    }

    #[test]
    fn memory_hog_never_finishes_cleanly() {
        let python = Path::new("/usr/bin/python3");
        if !python.exists() {
            return;
        }
        let (_dir, provider) = provider();
        let config = ContainerConfig::default().with_directory("/tmp/work", 0o755);
        let container = provider.create_container(&config).unwrap();

        let mut group = container.create_process_group().unwrap();
        group.set_resource_limits(crate::config::types::ResourceLimits {
            real_time_limit_ms: Some(20_000),
            ..Default::default()
        });
        let id = group
            .create_process(python)
            .set_arguments(["-c", r"x = b'\x01' * (1024 << 20); print(len(x))"])
            .set_stream(1, Stream::file("/tmp/work/log", AccessMode::WriteOnly))
            .set_resource_limits(crate::config::types::ResourceLimits {
                cpu_time_limit_ms: Some(10_000),
                memory_limit_bytes: Some(256 << 20),
                ..Default::default()
            })
            .id();
        group.run_synchronously().unwrap();
        let result = group.result(id).unwrap().clone();
        drop(group);

        match provider.memory_enforcement() {
            MemoryEnforcement::Cgroup => assert_eq!(
                result.completion_status,
                ProcessCompletionStatus::MemoryLimitExceeded,
                "{:?}",
                result
            ),
            // The allocation fails inside the program, which then exits on its own terms.
            MemoryEnforcement::AddressSpace => assert_ne!(
                result.completion_status,
                ProcessCompletionStatus::Ok,
                "{:?}",
                result
            ),
        }
        let log = container
            .filesystem()
            .read(Path::new("/tmp/work/log"), 1024)
            .unwrap()
            .unwrap_or_default();
        assert!(!String::from_utf8_lossy(&log).contains("1073741824"));
    }

    #[test]
    fn teardown_failures_become_audit_failures() {
        let id = RunId::new();
        let event = teardown_failure_event(
            &id,
            Path::new("/run/judgebox/abc"),
            &JudgeError::Isolation("unmount failed".to_string()),
        );
        assert_eq!(event.event_type, AuditEventType::TeardownFailure);
        assert_eq!(event.run_id, id.to_string());
        assert!(event.details.contains("/run/judgebox/abc"));
        assert!(event.details.contains("unmount failed"));
    }
}
