use crate::config::types::{BuildResult, JudgeError, OwnerId, ResourceLimits, Result};
use crate::isolation::provider::{Container, ProcessGroup};
use crate::isolation::types::{AccessMode, GroupCompletionStatus, Process, ProcessCompletionStatus, Stream};
use crate::utils::output::load_bounded;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};

pub const BUILD_DIR: &str = "/tmp/build";
pub const BUILD_LOG: &str = "/tmp/build/.build.log";
const BUILD_LOG_LIMIT: usize = 64 * 1024;

/// Turns source text into a launchable solution inside a container
pub trait Builder: Send + Sync {
    fn name(&self) -> &str;

    /// `Err` only for infrastructure failures; a source that does not build
    /// is `Ok` with no solution and an unsuccessful `BuildResult`.
    fn build(
        &self,
        container: &dyn Container,
        owner: OwnerId,
        source: &str,
        limits: &ResourceLimits,
    ) -> Result<BuildOutcome>;
}

/// A built program that can be attached to any number of process groups
pub trait Solution: Send + Sync {
    /// Add a process for this solution to `group`, with `arguments` appended
    /// after the pre-bound ones
    fn create<'g>(&self, group: &'g mut dyn ProcessGroup, arguments: &[String]) -> &'g mut Process;
}

pub struct BuildOutcome {
    pub solution: Option<Box<dyn Solution>>,
    pub result: BuildResult,
}

impl std::fmt::Debug for BuildOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildOutcome")
            .field("solution", &self.solution.is_some())
            .field("result", &self.result)
            .finish()
    }
}

/// Tool run once at build time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileStep {
    pub executable: PathBuf,
    pub arguments: Vec<String>,
}

impl CompileStep {
    pub fn new<I, S>(executable: impl Into<PathBuf>, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            executable: executable.into(),
            arguments: arguments.into_iter().map(Into::into).collect(),
        }
    }
}

/// Executable plus pre-bound arguments (interpreter flags, script path)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub executable: PathBuf,
    pub arguments: Vec<String>,
    pub environment: Vec<(String, String)>,
}

impl LaunchCommand {
    pub fn new<I, S>(executable: impl Into<PathBuf>, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            executable: executable.into(),
            arguments: arguments.into_iter().map(Into::into).collect(),
            environment: Vec::new(),
        }
    }

    pub fn with_environment(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.push((key.into(), value.into()));
        self
    }
}

impl Solution for LaunchCommand {
    fn create<'g>(&self, group: &'g mut dyn ProcessGroup, arguments: &[String]) -> &'g mut Process {
        let process = group.create_process(&self.executable);
        process.set_arguments(self.arguments.iter().chain(arguments.iter()).cloned());
        for (key, value) in &self.environment {
            process.set_environment(key.as_str(), value.as_str());
        }
        process
    }
}

/// What a language needs to build one source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPlan {
    /// File name of the source inside the build directory
    pub source_name: String,
    pub compile: CompileStep,
    pub launch: LaunchCommand,
}

pub fn build_path(name: &str) -> PathBuf {
    Path::new(BUILD_DIR).join(name)
}

pub fn build_path_string(name: &str) -> String {
    build_path(name).to_string_lossy().into_owned()
}

fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(std::path::Component::Normal(_)), None)
    )
}

/// Write the source, run the compile step and collect its log
pub fn run_plan(
    language: &str,
    container: &dyn Container,
    owner: OwnerId,
    source: &str,
    limits: &ResourceLimits,
    plan: BuildPlan,
) -> Result<BuildOutcome> {
    // Source names may be derived from the submission itself.
    if !is_plain_file_name(&plan.source_name) {
        warn!("{} build rejected source name {:?}", language, plan.source_name);
        return Ok(BuildOutcome {
            solution: None,
            result: BuildResult::failed(format!(
                "invalid source file name {:?}",
                plan.source_name
            )),
        });
    }

    let fs = container.filesystem();
    fs.create_directory(Path::new(BUILD_DIR), owner, 0o755)
        .map_err(|e| JudgeError::Staging(format!("Failed to create build directory: {}", e)))?;
    let source_path = build_path(&plan.source_name);
    fs.write(&source_path, source.as_bytes(), owner, 0o644)
        .map_err(|e| JudgeError::Staging(format!("Failed to write source: {}", e)))?;
    debug!("Wrote {} bytes of {} source to {}", source.len(), language, source_path.display());

    let mut group = container.create_process_group()?;
    group.set_resource_limits(limits.clone());
    let id = {
        let process = group.create_process(&plan.compile.executable);
        process
            .set_arguments(plan.compile.arguments.iter().cloned())
            .set_current_dir(BUILD_DIR)
            .set_stream(1, Stream::file(BUILD_LOG, AccessMode::WriteOnly))
            .set_stream(2, Stream::Alias(1))
            .set_owner(owner)
            .set_resource_limits(limits.clone());
        process.id()
    };

    let group_result = group.run_synchronously()?;
    let process_result = group.result(id).cloned();
    drop(group);

    let log = load_bounded(fs, Path::new(BUILD_LOG), BUILD_LOG_LIMIT)?
        .map(|l| l.text)
        .unwrap_or_default();

    let (group_ok, process_status) = (
        group_result.completion_status == GroupCompletionStatus::Ok,
        process_result.as_ref().map(|r| r.completion_status),
    );
    if group_ok && process_status == Some(ProcessCompletionStatus::Ok) {
        info!("{} build succeeded", language);
        return Ok(BuildOutcome {
            solution: Some(Box::new(plan.launch)),
            result: BuildResult::succeeded(log),
        });
    }

    let reason = match (group_result.completion_status, process_result) {
        (GroupCompletionStatus::RealTimeLimitExceeded, _) => {
            "build exceeded the real time limit".to_string()
        }
        (_, Some(result)) => match result.completion_status {
            ProcessCompletionStatus::StartFailed => format!(
                "build tool {} could not be started",
                plan.compile.executable.display()
            ),
            ProcessCompletionStatus::AbnormalExit => format!(
                "build tool exited with code {}",
                result.exit_status.unwrap_or(-1)
            ),
            other => format!("build tool did not finish: {:?}", other),
        },
        (_, None) => "build tool reported no result".to_string(),
    };
    warn!("{} build failed: {}", language, reason);

    let output = if log.trim().is_empty() {
        reason
    } else {
        format!("{}\n{}", log.trim_end(), reason)
    };
    Ok(BuildOutcome {
        solution: None,
        result: BuildResult::failed(output),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isolation::provider::IsolationProvider;
    use crate::isolation::types::{ContainerConfig, ProcessResult};
    use crate::testing::{ScriptedOutcome, ScriptedProvider};

    fn plan() -> BuildPlan {
        BuildPlan {
            source_name: "solution.sh".to_string(),
            compile: CompileStep::new("/bin/sh", ["-n", "/tmp/build/solution.sh"]),
            launch: LaunchCommand::new("/bin/sh", ["/tmp/build/solution.sh"]),
        }
    }

    #[test]
    fn launch_command_appends_caller_arguments() {
        let provider = ScriptedProvider::new();
        let container = provider.create_container(&ContainerConfig::default()).unwrap();
        let mut group = container.create_process_group().unwrap();
        let launch = LaunchCommand::new("/usr/bin/python3", ["-B", "/tmp/build/solution.py"])
            .with_environment("PYTHONHASHSEED", "0");

        let process = launch.create(group.as_mut(), &["7".to_string()]);
        assert_eq!(process.executable(), Path::new("/usr/bin/python3"));
        assert_eq!(process.arguments(), &["-B", "/tmp/build/solution.py", "7"]);
        assert_eq!(
            process.environment(),
            &[("PYTHONHASHSEED".to_string(), "0".to_string())]
        );
    }

    #[test]
    fn successful_compile_yields_solution() {
        let provider = ScriptedProvider::new();
        let container = provider.create_container(&ContainerConfig::default()).unwrap();
        let outcome = run_plan(
            "shell",
            container.as_ref(),
            OwnerId::nobody(),
            "echo hi\n",
            &ResourceLimits::build_defaults(),
            plan(),
        )
        .unwrap();
        assert!(outcome.result.success);
        assert!(outcome.solution.is_some());

        let run = &provider.runs()[0];
        assert_eq!(run.processes[0].arguments(), &["-n", "/tmp/build/solution.sh"]);
        assert_eq!(run.processes[0].stream(1), &Stream::file(BUILD_LOG, AccessMode::WriteOnly));
        assert_eq!(run.group_limits, ResourceLimits::build_defaults());
    }

    #[test]
    fn failed_compile_carries_log_and_reason() {
        let provider = ScriptedProvider::new().with_outcome(
            ScriptedOutcome::exit(2).with_file(BUILD_LOG, "solution.sh: 1: Syntax error\n"),
        );
        let container = provider.create_container(&ContainerConfig::default()).unwrap();
        let outcome = run_plan(
            "shell",
            container.as_ref(),
            OwnerId::nobody(),
            "if then\n",
            &ResourceLimits::build_defaults(),
            plan(),
        )
        .unwrap();
        assert!(outcome.solution.is_none());
        assert!(!outcome.result.success);
        assert!(outcome.result.output.starts_with("solution.sh: 1: Syntax error"));
        assert!(outcome.result.output.contains("exited with code 2"));
    }

    #[test]
    fn source_names_outside_the_build_directory_fail_the_build() {
        for name in ["/etc/Evil.java", "../Evil.java", "nested/Evil.java", ""] {
            let provider = ScriptedProvider::new();
            let container = provider.create_container(&ContainerConfig::default()).unwrap();
            let outcome = run_plan(
                "java",
                container.as_ref(),
                OwnerId::nobody(),
                "class Evil {}\n",
                &ResourceLimits::build_defaults(),
                BuildPlan {
                    source_name: name.to_string(),
                    ..plan()
                },
            )
            .unwrap();
            assert!(!outcome.result.success, "{:?}", name);
            assert!(outcome.solution.is_none());
            assert!(provider.runs().is_empty());
        }
    }

    #[test]
    fn missing_compiler_is_a_failed_build() {
        let provider = ScriptedProvider::new().with_outcome(ScriptedOutcome::new(
            GroupCompletionStatus::AbnormalExit,
            ProcessResult::start_failed(),
        ));
        let container = provider.create_container(&ContainerConfig::default()).unwrap();
        let outcome = run_plan(
            "shell",
            container.as_ref(),
            OwnerId::nobody(),
            "true\n",
            &ResourceLimits::build_defaults(),
            plan(),
        )
        .unwrap();
        assert!(!outcome.result.success);
        assert!(outcome.result.output.contains("could not be started"));
    }
}
