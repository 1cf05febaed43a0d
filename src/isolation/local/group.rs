/// Process groups of the local provider
/// Each process runs in its own POSIX process group with rlimits applied in
/// the pre-exec hook; the group's wall clock is enforced by polling `wait4`.
/// Memory-limited processes join their own cgroup before dropping privileges.
use crate::config::types::{JudgeError, OwnerId, ResourceLimits, Result};
use crate::isolation::local::cgroup::{CgroupRoot, MemoryCgroup, MemoryEvidence};
use crate::isolation::local::filesystem::LocalFilesystem;
use crate::isolation::provider::ProcessGroup;
use crate::isolation::types::{
    AccessMode, GroupCompletionStatus, GroupResult, Process, ProcessCompletionStatus, ProcessId,
    ProcessResult, ResourceUsage, Stream,
};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";
const POLL_INTERVAL: Duration = Duration::from_millis(10);
const SPAWN_RETRIES: u32 = 5;

pub struct LocalProcessGroup<'c> {
    filesystem: &'c LocalFilesystem,
    privileged: bool,
    cgroup_root: Option<&'c CgroupRoot>,
    limits: ResourceLimits,
    processes: Vec<Process>,
    results: BTreeMap<ProcessId, ProcessResult>,
    finished: bool,
}

struct Running {
    id: ProcessId,
    pid: i32,
    limits: ResourceLimits,
    cgroup: Option<MemoryCgroup>,
}

impl<'c> LocalProcessGroup<'c> {
    pub fn new(
        filesystem: &'c LocalFilesystem,
        privileged: bool,
        cgroup_root: Option<&'c CgroupRoot>,
    ) -> Self {
        Self {
            filesystem,
            privileged,
            cgroup_root,
            limits: ResourceLimits::default(),
            processes: Vec::new(),
            results: BTreeMap::new(),
            finished: false,
        }
    }

    fn open_stream_file(&self, path: &std::path::Path, access: AccessMode) -> Result<File> {
        let host = self.filesystem.resolve(path)?;
        let mut options = OpenOptions::new();
        match access {
            AccessMode::ReadOnly => options.read(true),
            AccessMode::WriteOnly => options.write(true).create(true).truncate(true),
            AccessMode::ReadWrite => options.read(true).write(true).create(true),
        };
        options.mode(0o644).open(&host).map_err(|e| {
            JudgeError::Process(format!("Failed to open stream file {}: {}", path.display(), e))
        })
    }

    /// Standard streams 0..=2; aliases share the open file of their target
    fn open_streams(&self, process: &Process) -> Result<Vec<Stdio>> {
        let mut opened: BTreeMap<u32, File> = BTreeMap::new();
        for fd in 0..3u32 {
            if let Stream::File { path, access } = process.stream(fd) {
                opened.insert(fd, self.open_stream_file(path, *access)?);
            }
        }

        let mut stdio = Vec::with_capacity(3);
        for fd in 0..3u32 {
            let source = match process.stream(fd) {
                Stream::Null => None,
                Stream::File { .. } => opened.get(&fd),
                Stream::Alias(target) => opened.get(target),
            };
            stdio.push(match source {
                Some(file) => Stdio::from(file.try_clone()?),
                None => Stdio::null(),
            });
        }
        Ok(stdio)
    }

    /// Cgroup and its open `cgroup.procs` for a memory-limited process
    fn memory_cgroup(&self, process: &Process) -> Result<Option<(MemoryCgroup, File)>> {
        let limit = match process.resource_limits().memory_limit_bytes {
            Some(limit) => limit,
            None => return Ok(None),
        };
        match self.cgroup_root {
            Some(root) => {
                let cgroup = root.create_child(limit)?;
                let procs = cgroup.open_procs()?;
                Ok(Some((cgroup, procs)))
            }
            None => {
                warn!(
                    "Memory limit of {} bytes for {} is an address-space cap only; \
                     exceeding it is not reported as a memory limit violation",
                    limit,
                    process.executable().display()
                );
                Ok(None)
            }
        }
    }

    fn spawn(&self, process: &Process, cgroup_procs: Option<&File>) -> Result<std::process::Child> {
        let executable = self.filesystem.resolve(process.executable())?;
        let mut command = Command::new(&executable);
        command.arg0(process.executable());
        for argument in process.arguments() {
            command.arg(self.filesystem.host_argument(argument));
        }
        command.current_dir(self.filesystem.resolve(process.current_dir())?);

        command.env_clear();
        command.env("PATH", DEFAULT_PATH);
        for (key, value) in process.environment() {
            command.env(key, value);
        }

        let mut streams = self.open_streams(process)?.into_iter();
        if let (Some(stdin), Some(stdout), Some(stderr)) =
            (streams.next(), streams.next(), streams.next())
        {
            command.stdin(stdin).stdout(stdout).stderr(stderr);
        }

        let mut identity = None;
        if let Some(owner) = process.owner() {
            if self.privileged {
                identity = Some(owner);
            } else if owner != OwnerId::current() {
                debug!(
                    "Not running as root, {} keeps the provider identity instead of {}",
                    process.executable().display(),
                    owner
                );
            }
        }

        let limits = process.resource_limits().clone();
        let procs_fd: Option<RawFd> = cgroup_procs.map(|f| f.as_raw_fd());
        let address_space_cap = procs_fd.is_none();
        unsafe {
            command.pre_exec(move || {
                // Own process group so the whole tree can be killed at once.
                nix::unistd::setpgid(nix::unistd::Pid::from_raw(0), nix::unistd::Pid::from_raw(0))
                    .map_err(std::io::Error::from)?;
                if let Some(fd) = procs_fd {
                    join_cgroup(fd)?;
                }
                if let Some(owner) = identity {
                    drop_identity(owner)?;
                }
                apply_rlimits(&limits, address_space_cap)
            });
        }

        let mut attempts = 0;
        loop {
            match command.spawn() {
                Ok(child) => return Ok(child),
                // A concurrent fork may still hold a write descriptor of a freshly copied executable.
                Err(e) if e.raw_os_error() == Some(libc::ETXTBSY) && attempts < SPAWN_RETRIES => {
                    attempts += 1;
                    debug!("{} busy, retrying spawn", process.executable().display());
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    return Err(JudgeError::Process(format!(
                        "Failed to start {}: {}",
                        process.executable().display(),
                        e
                    )))
                }
            }
        }
    }

    /// Kill and reap everything still running
    fn abort(running: &[Running]) {
        Self::kill_all(running);
        for process in running {
            let _ = wait_blocking(process.pid);
        }
    }

    fn kill_all(running: &[Running]) {
        for process in running {
            match nix::sys::signal::killpg(
                nix::unistd::Pid::from_raw(process.pid),
                nix::sys::signal::Signal::SIGKILL,
            ) {
                Ok(()) => debug!("Sent SIGKILL to process group {}", process.pid),
                Err(e) => debug!("killpg({}) failed: {}", process.pid, e),
            }
        }
    }
}

impl<'c> ProcessGroup for LocalProcessGroup<'c> {
    fn create_process(&mut self, executable: &std::path::Path) -> &mut Process {
        let id = ProcessId(self.processes.len());
        self.processes.push(Process::new(id, executable));
        let last = self.processes.len() - 1;
        &mut self.processes[last]
    }

    fn set_resource_limits(&mut self, limits: ResourceLimits) {
        self.limits = limits;
    }

    fn run_synchronously(&mut self) -> Result<GroupResult> {
        if self.finished {
            return Err(JudgeError::Process(
                "process group has already been run".to_string(),
            ));
        }
        self.finished = true;

        let started = Instant::now();
        let mut running = Vec::new();
        for process in &self.processes {
            let (cgroup, procs) = match self.memory_cgroup(process) {
                Ok(Some((cgroup, procs))) => (Some(cgroup), Some(procs)),
                Ok(None) => (None, None),
                Err(e) => {
                    Self::abort(&running);
                    return Err(e);
                }
            };
            match self.spawn(process, procs.as_ref()) {
                Ok(child) => {
                    debug!(
                        "Started {} as pid {}",
                        process.executable().display(),
                        child.id()
                    );
                    running.push(Running {
                        id: process.id(),
                        pid: child.id() as i32,
                        limits: process.resource_limits().clone(),
                        cgroup,
                    });
                }
                Err(e) => {
                    warn!("{}", e);
                    self.results.insert(process.id(), ProcessResult::start_failed());
                }
            }
        }

        let real_time_limit = self.limits.real_time_limit_ms.map(Duration::from_millis);
        let mut real_time_exceeded = false;

        while !running.is_empty() {
            let mut index = 0;
            while index < running.len() {
                match wait_nohang(running[index].pid) {
                    Ok(Some((status, usage))) => {
                        let finished = running.swap_remove(index);
                        let memory = match finished.cgroup.as_ref().map(MemoryCgroup::evidence) {
                            Some(Ok(evidence)) => Some(evidence),
                            Some(Err(e)) => {
                                Self::abort(&running);
                                return Err(e);
                            }
                            None => None,
                        };
                        let result =
                            completion_from_wait(status, &usage, &finished.limits, memory);
                        debug!("Process {:?} finished: {:?}", finished.id, result);
                        self.results.insert(finished.id, result);
                    }
                    Ok(None) => index += 1,
                    Err(e) => {
                        Self::abort(&running);
                        return Err(e);
                    }
                }
            }

            if running.is_empty() {
                break;
            }
            if let Some(limit) = real_time_limit {
                if !real_time_exceeded && started.elapsed() > limit {
                    info!(
                        "Real time limit of {}ms exceeded, killing {} process(es)",
                        limit.as_millis(),
                        running.len()
                    );
                    real_time_exceeded = true;
                    Self::kill_all(&running);
                }
            }
            std::thread::sleep(POLL_INTERVAL);
        }

        let completion_status = if real_time_exceeded {
            GroupCompletionStatus::RealTimeLimitExceeded
        } else if self
            .results
            .values()
            .all(|r| r.completion_status == ProcessCompletionStatus::Ok)
        {
            GroupCompletionStatus::Ok
        } else {
            GroupCompletionStatus::AbnormalExit
        };

        Ok(GroupResult {
            completion_status,
            real_time: started.elapsed(),
        })
    }

    fn result(&self, id: ProcessId) -> Option<&ProcessResult> {
        self.results.get(&id)
    }
}

/// Moves the calling process into the cgroup owning `procs_fd`
fn join_cgroup(procs_fd: RawFd) -> std::io::Result<()> {
    let written = unsafe { libc::write(procs_fd, b"0".as_ptr().cast(), 1) };
    if written != 1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Runs after the cgroup join, which needs the provider's privileges
fn drop_identity(owner: OwnerId) -> std::io::Result<()> {
    use nix::unistd::{setgroups, setresgid, setresuid, Gid, Uid};

    let gid = Gid::from_raw(owner.gid);
    let uid = Uid::from_raw(owner.uid);
    setgroups(&[gid]).map_err(std::io::Error::from)?;
    setresgid(gid, gid, gid).map_err(std::io::Error::from)?;
    setresuid(uid, uid, uid).map_err(std::io::Error::from)?;
    Ok(())
}

/// Runs in the forked child before exec: only async-signal-safe calls here
fn apply_rlimits(limits: &ResourceLimits, address_space_cap: bool) -> std::io::Result<()> {
    use nix::sys::resource::{setrlimit, Resource};

    let to_io = |e: nix::errno::Errno| std::io::Error::from(e);

    if let Some(cpu_ms) = limits.cpu_time_limit_ms {
        // Whole seconds, rounded up; the soft limit delivers SIGXCPU first.
        let seconds = ((cpu_ms + 999) / 1000).max(1);
        setrlimit(Resource::RLIMIT_CPU, seconds, seconds + 1).map_err(to_io)?;
    }
    // A cgroup limit must be reached through page faults, not failed mappings.
    if let (Some(memory), true) = (limits.memory_limit_bytes, address_space_cap) {
        setrlimit(Resource::RLIMIT_AS, memory, memory).map_err(to_io)?;
    }
    if let Some(output) = limits.output_limit_bytes {
        setrlimit(Resource::RLIMIT_FSIZE, output, output).map_err(to_io)?;
    }
    if let Some(processes) = limits.process_limit {
        let processes = u64::from(processes);
        setrlimit(Resource::RLIMIT_NPROC, processes, processes).map_err(to_io)?;
    }
    setrlimit(Resource::RLIMIT_CORE, 0, 0).map_err(to_io)?;
    Ok(())
}

fn wait4(pid: i32, options: libc::c_int) -> Result<Option<(libc::c_int, libc::rusage)>> {
    let mut status: libc::c_int = 0;
    loop {
        let mut usage = std::mem::MaybeUninit::<libc::rusage>::zeroed();
        let rc = unsafe { libc::wait4(pid, &mut status, options, usage.as_mut_ptr()) };
        if rc == pid {
            return Ok(Some((status, unsafe { usage.assume_init() })));
        }
        if rc == 0 {
            return Ok(None);
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(JudgeError::Process(format!("wait4({}) failed: {}", pid, err)));
    }
}

fn wait_nohang(pid: i32) -> Result<Option<(libc::c_int, libc::rusage)>> {
    wait4(pid, libc::WNOHANG)
}

fn wait_blocking(pid: i32) -> Result<Option<(libc::c_int, libc::rusage)>> {
    wait4(pid, 0)
}

fn timeval_ms(tv: &libc::timeval) -> u64 {
    (tv.tv_sec.max(0) as u64) * 1000 + (tv.tv_usec.max(0) as u64) / 1000
}

/// Derive a completion status from a raw wait status and its accounting.
///
/// Memory violations are only known from cgroup evidence; under an
/// address-space cap the program sees failed allocations instead.
fn completion_from_wait(
    status: libc::c_int,
    usage: &libc::rusage,
    limits: &ResourceLimits,
    memory: Option<MemoryEvidence>,
) -> ProcessResult {
    // ru_maxrss is reported in kilobytes on Linux.
    let rss_peak = (usage.ru_maxrss.max(0) as u64) * 1024;
    let resource_usage = ResourceUsage {
        user_time_ms: timeval_ms(&usage.ru_utime),
        system_time_ms: timeval_ms(&usage.ru_stime),
        memory_peak_bytes: memory
            .and_then(|m| m.peak_bytes)
            .map_or(rss_peak, |peak| peak.max(rss_peak)),
    };
    let cpu_exceeded = limits
        .cpu_time_limit_ms
        .map_or(false, |limit| resource_usage.cpu_time_ms() > limit);
    let memory_exceeded = memory.map_or(false, |m| m.limit_exceeded());

    if libc::WIFEXITED(status) {
        let code = libc::WEXITSTATUS(status);
        let completion_status = if cpu_exceeded {
            ProcessCompletionStatus::TimeLimitExceeded
        } else if memory_exceeded {
            ProcessCompletionStatus::MemoryLimitExceeded
        } else if code == 0 {
            ProcessCompletionStatus::Ok
        } else {
            ProcessCompletionStatus::AbnormalExit
        };
        ProcessResult {
            completion_status,
            exit_status: Some(code),
            term_signal: None,
            resource_usage,
        }
    } else if libc::WIFSIGNALED(status) {
        let signal = libc::WTERMSIG(status);
        let completion_status = if signal == libc::SIGXCPU || cpu_exceeded {
            ProcessCompletionStatus::TimeLimitExceeded
        } else if signal == libc::SIGXFSZ {
            ProcessCompletionStatus::OutputLimitExceeded
        } else if memory_exceeded {
            ProcessCompletionStatus::MemoryLimitExceeded
        } else {
            ProcessCompletionStatus::TerminatedBySystem
        };
        ProcessResult {
            completion_status,
            exit_status: None,
            term_signal: Some(signal),
            resource_usage,
        }
    } else if libc::WIFSTOPPED(status) {
        ProcessResult {
            completion_status: ProcessCompletionStatus::Stopped,
            exit_status: None,
            term_signal: None,
            resource_usage,
        }
    } else {
        ProcessResult {
            completion_status: ProcessCompletionStatus::TerminatedBySystem,
            exit_status: None,
            term_signal: None,
            resource_usage,
        }
    }
}
