/// Data types exchanged with isolation providers
use crate::config::types::{OwnerId, ResourceLimits};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory created inside a fresh container
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub path: PathBuf,
    pub mode: u32,
}

/// Host directory made visible inside a container
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountEntry {
    /// Host path
    pub source: PathBuf,
    /// Path inside the container
    pub target: PathBuf,
    pub read_only: bool,
}

impl MountEntry {
    pub fn bind_ro(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only: true,
        }
    }
}

/// Container layout requested from a provider
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub directories: Vec<DirectoryEntry>,
    pub mounts: Vec<MountEntry>,
}

impl ContainerConfig {
    pub fn with_directory(mut self, path: impl Into<PathBuf>, mode: u32) -> Self {
        self.directories.push(DirectoryEntry {
            path: path.into(),
            mode,
        });
        self
    }

    pub fn with_mount(mut self, mount: MountEntry) -> Self {
        self.mounts.push(mount);
        self
    }
}

/// Access mode for file streams
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// Target of a standard stream
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stream {
    /// Connected to /dev/null
    Null,
    /// File inside the container
    File { path: PathBuf, access: AccessMode },
    /// Same open file as another descriptor of this process
    Alias(u32),
}

impl Stream {
    pub fn file(path: impl Into<PathBuf>, access: AccessMode) -> Self {
        Stream::File {
            path: path.into(),
            access,
        }
    }
}

/// Index of a process within its group
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessId(pub usize);

/// Process description owned by a process group until the group runs.
///
/// `arguments` excludes argv[0]; the executable path is passed as argv[0].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Process {
    id: ProcessId,
    executable: PathBuf,
    arguments: Vec<String>,
    current_dir: PathBuf,
    environment: Vec<(String, String)>,
    streams: BTreeMap<u32, Stream>,
    resource_limits: ResourceLimits,
    owner: Option<OwnerId>,
}

impl Process {
    pub fn new(id: ProcessId, executable: impl Into<PathBuf>) -> Self {
        Self {
            id,
            executable: executable.into(),
            arguments: Vec::new(),
            current_dir: PathBuf::from("/"),
            environment: Vec::new(),
            streams: BTreeMap::new(),
            resource_limits: ResourceLimits::default(),
            owner: None,
        }
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    pub fn set_arguments<I, S>(&mut self, arguments: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments = arguments.into_iter().map(Into::into).collect();
        self
    }

    pub fn current_dir(&self) -> &Path {
        &self.current_dir
    }

    pub fn set_current_dir(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.current_dir = path.into();
        self
    }

    pub fn environment(&self) -> &[(String, String)] {
        &self.environment
    }

    pub fn set_environment(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let key = key.into();
        let value = value.into();
        match self.environment.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.environment.push((key, value)),
        }
        self
    }

    /// Streams that were never set are connected to /dev/null
    pub fn stream(&self, fd: u32) -> &Stream {
        self.streams.get(&fd).unwrap_or(&Stream::Null)
    }

    pub fn set_stream(&mut self, fd: u32, stream: Stream) -> &mut Self {
        self.streams.insert(fd, stream);
        self
    }

    pub fn resource_limits(&self) -> &ResourceLimits {
        &self.resource_limits
    }

    pub fn set_resource_limits(&mut self, limits: ResourceLimits) -> &mut Self {
        self.resource_limits = limits;
        self
    }

    pub fn owner(&self) -> Option<OwnerId> {
        self.owner
    }

    pub fn set_owner(&mut self, owner: OwnerId) -> &mut Self {
        self.owner = Some(owner);
        self
    }
}

/// How a process group as a whole finished
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupCompletionStatus {
    /// Every process exited with code 0
    #[serde(rename = "ok")]
    Ok,
    /// At least one process did not exit cleanly
    #[serde(rename = "abnormal_exit")]
    AbnormalExit,
    #[serde(rename = "real_time_limit_exceeded")]
    RealTimeLimitExceeded,
    #[serde(rename = "stopped")]
    Stopped,
}

/// How a single process finished
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessCompletionStatus {
    /// Exited with code 0
    #[serde(rename = "ok")]
    Ok,
    /// Exited with a non-zero code
    #[serde(rename = "abnormal_exit")]
    AbnormalExit,
    /// Killed by a signal not attributable to a limit
    #[serde(rename = "terminated_by_system")]
    TerminatedBySystem,
    #[serde(rename = "memory_limit_exceeded")]
    MemoryLimitExceeded,
    #[serde(rename = "time_limit_exceeded")]
    TimeLimitExceeded,
    #[serde(rename = "system_time_limit_exceeded")]
    SystemTimeLimitExceeded,
    #[serde(rename = "user_time_limit_exceeded")]
    UserTimeLimitExceeded,
    #[serde(rename = "output_limit_exceeded")]
    OutputLimitExceeded,
    #[serde(rename = "start_failed")]
    StartFailed,
    #[serde(rename = "stopped")]
    Stopped,
}

/// Resource accounting for a finished process
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub user_time_ms: u64,
    pub system_time_ms: u64,
    pub memory_peak_bytes: u64,
}

impl ResourceUsage {
    pub fn cpu_time_ms(&self) -> u64 {
        self.user_time_ms + self.system_time_ms
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupResult {
    pub completion_status: GroupCompletionStatus,
    pub real_time: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessResult {
    pub completion_status: ProcessCompletionStatus,
    pub exit_status: Option<i32>,
    pub term_signal: Option<i32>,
    pub resource_usage: ResourceUsage,
}

impl ProcessResult {
    /// Result for a process that could not be started at all
    pub fn start_failed() -> Self {
        Self {
            completion_status: ProcessCompletionStatus::StartFailed,
            exit_status: None,
            term_signal: None,
            resource_usage: ResourceUsage::default(),
        }
    }

    /// Normal exit: status derived from the code
    pub fn exited(code: i32) -> Self {
        Self {
            completion_status: if code == 0 {
                ProcessCompletionStatus::Ok
            } else {
                ProcessCompletionStatus::AbnormalExit
            },
            exit_status: Some(code),
            term_signal: None,
            resource_usage: ResourceUsage::default(),
        }
    }
}
