/// Runs the checker against staged artifacts and classifies the outcome
use crate::checker::artifacts::{SolutionArtifacts, TestArtifacts};
use crate::checker::stager::{
    ArtifactStager, CHECKER_PATH, CHECKING_ROOT, INPUT_NAME, LOG_PATH, OUTPUT_NAME, PACKAGE_DIR,
};
use crate::config::types::{CheckResult, JudgeError, OwnerId, ResourceLimits, Result, Verdict};
use crate::isolation::provider::{Container, IsolationProvider};
use crate::isolation::types::{AccessMode, ContainerConfig, MountEntry, ProcessId, Stream};
use crate::observability::audit::{self, AuditEvent, AuditEventType, RunId};
use crate::utils::output::load_bounded;
use crate::verdict::{ExitCodeAbi, VerdictCause, VerdictClassifier};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Checking root is readable and traversable, but not writable, by the checker
const CHECKING_ROOT_MODE: u32 = 0o555;

#[derive(Debug, Clone, PartialEq)]
pub struct CheckerSettings {
    /// Host directory of the problem package; must contain `bin/checker`
    pub package_dir: PathBuf,
    /// Identity the checker runs as
    pub owner: OwnerId,
    /// Owner of the staged `in`/`out`/`hint` files
    pub staging_owner: OwnerId,
    pub limits: ResourceLimits,
    pub abi: ExitCodeAbi,
    /// Bytes of checker output kept in the result
    pub log_limit_bytes: usize,
}

impl CheckerSettings {
    pub fn new(package_dir: impl Into<PathBuf>) -> Self {
        Self {
            package_dir: package_dir.into(),
            owner: OwnerId::nobody(),
            staging_owner: OwnerId::staging(),
            limits: ResourceLimits::checker_defaults(),
            abi: ExitCodeAbi::default(),
            log_limit_bytes: 64 * 1024,
        }
    }
}

pub struct Checker {
    provider: Arc<dyn IsolationProvider>,
    settings: CheckerSettings,
}

impl Checker {
    pub fn new(provider: Arc<dyn IsolationProvider>, settings: CheckerSettings) -> Self {
        Self { provider, settings }
    }

    pub fn settings(&self) -> &CheckerSettings {
        &self.settings
    }

    fn container_config(&self) -> ContainerConfig {
        ContainerConfig::default()
            .with_directory(CHECKING_ROOT, CHECKING_ROOT_MODE)
            .with_mount(MountEntry::bind_ro(&self.settings.package_dir, PACKAGE_DIR))
    }

    /// Check one solution output against one test.
    ///
    /// Errors are infrastructure failures (staging, provider); anything the
    /// checker does, including crashing, ends up in the verdict.
    pub fn check(&self, test: &TestArtifacts, solution: &SolutionArtifacts) -> Result<CheckResult> {
        let run_id = RunId::new();
        audit::record(&AuditEvent::new(
            &run_id,
            AuditEventType::CheckStart,
            format!(
                "input={} output={} hint={}",
                test.input().display(),
                solution.stdout().display(),
                test.hint().map_or("-".to_string(), |h| h.display().to_string())
            ),
        ));

        if self.settings.staging_owner.uid == self.settings.owner.uid {
            warn!(
                "Staged artifacts share the checker identity {}; the checker can make them writable",
                self.settings.owner
            );
        }

        // Torn down when it goes out of scope, on every path.
        let container = self.provider.create_container(&self.container_config())?;

        let hint_argument = ArtifactStager::new(self.settings.staging_owner).stage(
            container.filesystem(),
            test,
            solution,
        )?;
        audit::record(&AuditEvent::new(
            &run_id,
            AuditEventType::ArtifactsStaged,
            format!("hint argument {}", hint_argument),
        ));

        let result = self.run_checker(container.as_ref(), hint_argument)?;

        info!(
            "Check {} finished: {} ({})",
            run_id,
            result.verdict,
            result.cause.describe()
        );
        audit::record(
            &AuditEvent::new(
                &run_id,
                AuditEventType::CheckEnd,
                result.message.clone().unwrap_or_default(),
            )
            .with_verdict(result.verdict, result.cause),
        );
        Ok(result)
    }

    fn run_checker(&self, container: &dyn Container, hint_argument: &str) -> Result<CheckResult> {
        let mut group = container.create_process_group()?;
        group.set_resource_limits(self.settings.limits.clone());

        let process_id: ProcessId = {
            let process = group.create_process(Path::new(CHECKER_PATH));
            process
                .set_arguments([INPUT_NAME, OUTPUT_NAME, hint_argument])
                .set_current_dir(CHECKING_ROOT)
                .set_stream(1, Stream::file(LOG_PATH, AccessMode::WriteOnly))
                .set_stream(2, Stream::Alias(1))
                .set_owner(self.settings.owner)
                .set_resource_limits(self.settings.limits.clone());
            process.id()
        };
        debug!(
            "Running {} {} {} {}",
            CHECKER_PATH, INPUT_NAME, OUTPUT_NAME, hint_argument
        );

        let group_result = group.run_synchronously()?;
        let process_result = group.result(process_id).cloned().ok_or_else(|| {
            JudgeError::Process("provider reported no result for the checker process".to_string())
        })?;
        drop(group);

        let (verdict, cause) =
            VerdictClassifier::classify(&group_result, &process_result, &self.settings.abi);
        if verdict == Verdict::Failed {
            warn!(
                "Checker failed: {} (group {:?}, process {:?})",
                cause.describe(),
                group_result.completion_status,
                process_result.completion_status
            );
        }

        let log = match load_bounded(
            container.filesystem(),
            Path::new(LOG_PATH),
            self.settings.log_limit_bytes,
        ) {
            Ok(log) => log,
            Err(e) => {
                warn!("Failed to read checker log: {}", e);
                None
            }
        };
        if log.as_ref().map_or(false, |l| l.is_truncated()) {
            debug!(
                "Checker log truncated to {} bytes",
                self.settings.log_limit_bytes
            );
        }

        let message = Self::message(&cause, log.as_ref().and_then(|l| l.first_line()));
        Ok(CheckResult {
            verdict,
            cause,
            message,
            log: log.map(|l| l.text),
        })
    }

    /// The checker's own comment when it decided, otherwise what went wrong
    fn message(cause: &VerdictCause, first_log_line: Option<&str>) -> Option<String> {
        if cause.is_checker_decision() {
            first_log_line.map(str::to_string)
        } else {
            Some(cause.describe())
        }
    }
}
