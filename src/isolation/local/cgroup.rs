/// cgroup v2 memory control for local processes
///
/// Every memory-limited process gets a child cgroup of its own with
/// `memory.max` set and swap disabled. The `oom_kill` counter of
/// `memory.events` is what tells a memory-limit kill apart from an ordinary
/// crash; without a cgroup the provider can only cap the address space.
use crate::config::types::{JudgeError, Result};
use log::{debug, info, warn};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CGROUP_ROOT: &str = "/sys/fs/cgroup/judgebox";

const REMOVE_RETRIES: u32 = 20;
const REMOVE_INTERVAL: Duration = Duration::from_millis(10);

fn cgroup_error(action: &str, path: &Path, e: std::io::Error) -> JudgeError {
    JudgeError::Isolation(format!("Failed to {} {}: {}", action, path.display(), e))
}

fn read_trimmed(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| cgroup_error("read", path, e))
}

fn lists_memory(controllers: &str) -> bool {
    controllers.split_whitespace().any(|c| c == "memory")
}

/// Parent cgroup below which per-process cgroups are created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgroupRoot {
    path: PathBuf,
}

impl CgroupRoot {
    /// Create the parent cgroup and delegate the memory controller to its children
    pub fn prepare(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        fs::create_dir_all(&path).map_err(|e| cgroup_error("create cgroup", &path, e))?;

        let controllers = path.join("cgroup.controllers");
        if !lists_memory(&read_trimmed(&controllers)?) {
            if let Some(parent) = path.parent() {
                let parent_subtree = parent.join("cgroup.subtree_control");
                if let Err(e) = fs::write(&parent_subtree, "+memory") {
                    debug!("Could not enable memory in {}: {}", parent_subtree.display(), e);
                }
            }
            if !lists_memory(&read_trimmed(&controllers)?) {
                return Err(JudgeError::Isolation(format!(
                    "memory controller is not available in {}",
                    path.display()
                )));
            }
        }

        let subtree = path.join("cgroup.subtree_control");
        if !lists_memory(&read_trimmed(&subtree)?) {
            fs::write(&subtree, "+memory")
                .map_err(|e| cgroup_error("enable memory controller in", &subtree, e))?;
        }

        info!("Memory limits enforced through cgroup {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fresh child cgroup capped at `limit_bytes`
    pub fn create_child(&self, limit_bytes: u64) -> Result<MemoryCgroup> {
        let path = self.path.join(uuid::Uuid::new_v4().to_string());
        fs::create_dir(&path).map_err(|e| cgroup_error("create cgroup", &path, e))?;
        let cgroup = MemoryCgroup { path, limit_bytes };

        let max = cgroup.path.join("memory.max");
        fs::write(&max, limit_bytes.to_string())
            .map_err(|e| cgroup_error("set memory limit in", &max, e))?;

        // Swapping out would let a process outgrow memory.max without an OOM kill.
        let swap = cgroup.path.join("memory.swap.max");
        if swap.exists() {
            fs::write(&swap, "0").map_err(|e| cgroup_error("disable swap in", &swap, e))?;
        }
        let oom_group = cgroup.path.join("memory.oom.group");
        if oom_group.exists() {
            if let Err(e) = fs::write(&oom_group, "1") {
                warn!("Failed to set {}: {}", oom_group.display(), e);
            }
        }

        debug!("Created memory cgroup {} ({} bytes)", cgroup.path.display(), limit_bytes);
        Ok(cgroup)
    }
}

/// What a finished process's cgroup recorded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryEvidence {
    pub peak_bytes: Option<u64>,
    pub oom_kills: u64,
}

impl MemoryEvidence {
    pub fn limit_exceeded(&self) -> bool {
        self.oom_kills > 0
    }
}

/// Per-process cgroup, removed on drop
#[derive(Debug)]
pub struct MemoryCgroup {
    path: PathBuf,
    limit_bytes: u64,
}

impl MemoryCgroup {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn limit_bytes(&self) -> u64 {
        self.limit_bytes
    }

    /// Opened before fork: the child joins by writing `0` to it
    pub fn open_procs(&self) -> Result<File> {
        let procs = self.path.join("cgroup.procs");
        OpenOptions::new()
            .write(true)
            .open(&procs)
            .map_err(|e| cgroup_error("open", &procs, e))
    }

    /// `memory.peak` needs kernel 5.19
    fn peak_bytes(&self) -> Option<u64> {
        fs::read_to_string(self.path.join("memory.peak"))
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    fn oom_kills(&self) -> Result<u64> {
        let events = self.path.join("memory.events");
        let content = read_trimmed(&events)?;
        Ok(content
            .lines()
            .filter_map(|line| line.split_once(' '))
            .find(|(key, _)| *key == "oom_kill")
            .and_then(|(_, value)| value.trim().parse().ok())
            .unwrap_or(0))
    }

    pub fn evidence(&self) -> Result<MemoryEvidence> {
        Ok(MemoryEvidence {
            peak_bytes: self.peak_bytes(),
            oom_kills: self.oom_kills()?,
        })
    }
}

impl Drop for MemoryCgroup {
    fn drop(&mut self) {
        // Stragglers outside the killed process group would keep the cgroup busy.
        let kill = self.path.join("cgroup.kill");
        if kill.exists() {
            let _ = fs::write(&kill, "1");
        }
        for _ in 0..REMOVE_RETRIES {
            match fs::remove_dir(&self.path) {
                Ok(()) => return,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
                Err(_) => std::thread::sleep(REMOVE_INTERVAL),
            }
        }
        warn!("Leaving cgroup {} behind", self.path.display());
    }
}
