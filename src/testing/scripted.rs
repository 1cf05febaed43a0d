/// Scripted isolation provider
///
/// Replays queued outcomes instead of running anything and records every
/// container, staging request and process description it receives. Outcomes
/// that are impractical to produce for real (memory limit kills, stopped
/// groups) become ordinary test inputs.
use crate::config::types::{JudgeError, OwnerId, ResourceLimits, Result};
use crate::isolation::provider::{Container, Filesystem, IsolationProvider, ProcessGroup};
use crate::isolation::types::{
    ContainerConfig, GroupCompletionStatus, GroupResult, Process, ProcessId, ProcessResult,
};
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// What one process group run reports
#[derive(Debug, Clone)]
pub struct ScriptedOutcome {
    pub group: GroupResult,
    pub process: ProcessResult,
    /// Files that appear in the container once the group has run
    pub files: Vec<(PathBuf, Vec<u8>)>,
}

impl ScriptedOutcome {
    pub fn new(group: GroupCompletionStatus, process: ProcessResult) -> Self {
        Self {
            group: GroupResult {
                completion_status: group,
                real_time: Duration::from_millis(1),
            },
            process,
            files: Vec::new(),
        }
    }

    /// Process exited with `code`; the group status follows the code
    pub fn exit(code: i32) -> Self {
        let group = if code == 0 {
            GroupCompletionStatus::Ok
        } else {
            GroupCompletionStatus::AbnormalExit
        };
        Self::new(group, ProcessResult::exited(code))
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        self.files.push((path.into(), contents.into()));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPush {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub owner: OwnerId,
    pub mode: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRun {
    pub group_limits: ResourceLimits,
    pub processes: Vec<Process>,
}

#[derive(Default)]
struct State {
    outcomes: VecDeque<ScriptedOutcome>,
    failing_pushes: Vec<PathBuf>,
    containers: Vec<ContainerConfig>,
    live_containers: usize,
    pushes: Vec<RecordedPush>,
    directories: Vec<(PathBuf, OwnerId, u32)>,
    runs: Vec<RecordedRun>,
}

#[derive(Clone, Default)]
pub struct ScriptedProvider {
    state: Arc<Mutex<State>>,
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome of the next process group run.
    /// Runs without a queued outcome exit with code 0.
    pub fn with_outcome(self, outcome: ScriptedOutcome) -> Self {
        lock(&self.state).outcomes.push_back(outcome);
        self
    }

    /// Pushes to `destination` fail with an I/O error
    pub fn failing_push(self, destination: impl Into<PathBuf>) -> Self {
        lock(&self.state).failing_pushes.push(destination.into());
        self
    }

    pub fn containers(&self) -> Vec<ContainerConfig> {
        lock(&self.state).containers.clone()
    }

    /// Containers created and not yet dropped
    pub fn live_containers(&self) -> usize {
        lock(&self.state).live_containers
    }

    pub fn pushes(&self) -> Vec<RecordedPush> {
        lock(&self.state).pushes.clone()
    }

    pub fn directories(&self) -> Vec<(PathBuf, OwnerId, u32)> {
        lock(&self.state).directories.clone()
    }

    pub fn runs(&self) -> Vec<RecordedRun> {
        lock(&self.state).runs.clone()
    }
}

impl IsolationProvider for ScriptedProvider {
    fn create_container(&self, config: &ContainerConfig) -> Result<Box<dyn Container>> {
        let mut state = lock(&self.state);
        state.containers.push(config.clone());
        state.live_containers += 1;
        drop(state);
        Ok(Box::new(ScriptedContainer {
            filesystem: ScriptedFilesystem {
                state: Arc::clone(&self.state),
                files: Mutex::new(BTreeMap::new()),
            },
        }))
    }
}

struct ScriptedContainer {
    filesystem: ScriptedFilesystem,
}

impl Container for ScriptedContainer {
    fn filesystem(&self) -> &dyn Filesystem {
        &self.filesystem
    }

    fn create_process_group(&self) -> Result<Box<dyn ProcessGroup + '_>> {
        Ok(Box::new(ScriptedGroup {
            filesystem: &self.filesystem,
            limits: ResourceLimits::default(),
            processes: Vec::new(),
            results: BTreeMap::new(),
            finished: false,
        }))
    }
}

impl Drop for ScriptedContainer {
    fn drop(&mut self) {
        let mut state = lock(&self.filesystem.state);
        state.live_containers = state.live_containers.saturating_sub(1);
    }
}

struct ScriptedFilesystem {
    state: Arc<Mutex<State>>,
    files: Mutex<BTreeMap<PathBuf, Vec<u8>>>,
}

impl ScriptedFilesystem {
    fn store(&self, path: &Path, contents: Vec<u8>) {
        self.files
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(path.to_path_buf(), contents);
    }
}

impl Filesystem for ScriptedFilesystem {
    fn push(&self, source: &Path, destination: &Path, owner: OwnerId, mode: u32) -> Result<()> {
        let mut state = lock(&self.state);
        if state.failing_pushes.iter().any(|p| p == destination) {
            return Err(JudgeError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("scripted push failure for {}", destination.display()),
            )));
        }
        state.pushes.push(RecordedPush {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            owner,
            mode,
        });
        drop(state);
        // Sources need not exist; tests often stage made-up paths.
        self.store(destination, std::fs::read(source).unwrap_or_default());
        Ok(())
    }

    fn write(&self, destination: &Path, contents: &[u8], _owner: OwnerId, _mode: u32) -> Result<()> {
        self.store(destination, contents.to_vec());
        Ok(())
    }

    fn create_directory(&self, path: &Path, owner: OwnerId, mode: u32) -> Result<()> {
        lock(&self.state)
            .directories
            .push((path.to_path_buf(), owner, mode));
        Ok(())
    }

    fn read(&self, path: &Path, limit: usize) -> Result<Option<Vec<u8>>> {
        let files = self
            .files
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(files
            .get(path)
            .map(|contents| contents[..contents.len().min(limit)].to_vec()))
    }

    fn pull(&self, source: &Path, destination: &Path) -> Result<()> {
        match self.read(source, usize::MAX)? {
            Some(contents) => Ok(std::fs::write(destination, contents)?),
            None => Err(JudgeError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist in the container", source.display()),
            ))),
        }
    }
}

struct ScriptedGroup<'c> {
    filesystem: &'c ScriptedFilesystem,
    limits: ResourceLimits,
    processes: Vec<Process>,
    results: BTreeMap<ProcessId, ProcessResult>,
    finished: bool,
}

impl<'c> ProcessGroup for ScriptedGroup<'c> {
    fn create_process(&mut self, executable: &Path) -> &mut Process {
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

        let mut state = lock(&self.filesystem.state);
        let outcome = state
            .outcomes
            .pop_front()
            .unwrap_or_else(|| ScriptedOutcome::exit(0));
        state.runs.push(RecordedRun {
            group_limits: self.limits.clone(),
            processes: self.processes.clone(),
        });
        drop(state);

        for (path, contents) in outcome.files {
            self.filesystem.store(&path, contents);
        }
        for process in &self.processes {
            self.results.insert(process.id(), outcome.process.clone());
        }
        Ok(outcome.group)
    }

    fn result(&self, id: ProcessId) -> Option<&ProcessResult> {
        self.results.get(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_replay_in_order_and_default_to_success() {
        let provider = ScriptedProvider::new().with_outcome(ScriptedOutcome::exit(2));
        let container = provider.create_container(&ContainerConfig::default()).unwrap();

        let mut first = container.create_process_group().unwrap();
        let id = first.create_process(Path::new("/bin/checker")).id();
        assert_eq!(
            first.run_synchronously().unwrap().completion_status,
            GroupCompletionStatus::AbnormalExit
        );
        assert_eq!(first.result(id).unwrap().exit_status, Some(2));
        assert!(first.run_synchronously().is_err());

        let mut second = container.create_process_group().unwrap();
        let id = second.create_process(Path::new("/bin/checker")).id();
        second.run_synchronously().unwrap();
        assert_eq!(second.result(id).unwrap().exit_status, Some(0));
        assert_eq!(provider.runs().len(), 2);
    }

    #[test]
    fn dropping_a_container_is_observed() {
        let provider = ScriptedProvider::new();
        let container = provider.create_container(&ContainerConfig::default()).unwrap();
        assert_eq!(provider.live_containers(), 1);
        drop(container);
        assert_eq!(provider.live_containers(), 0);
        assert_eq!(provider.containers().len(), 1);
    }

    #[test]
    fn outcome_files_become_readable() {
        let provider = ScriptedProvider::new()
            .with_outcome(ScriptedOutcome::exit(0).with_file("/tmp/log", "hello"));
        let container = provider.create_container(&ContainerConfig::default()).unwrap();
        let mut group = container.create_process_group().unwrap();
        group.create_process(Path::new("/bin/true"));
        group.run_synchronously().unwrap();
        drop(group);
        assert_eq!(
            container.filesystem().read(Path::new("/tmp/log"), 3).unwrap(),
            Some(b"hel".to_vec())
        );
    }
}
