/// Verdict classification and provenance
///
/// The verdict is a pure function of the group status, the process status and
/// the exit code. Only a process that ran to a normal termination and reported
/// a code is trusted to speak for the checker; everything else is FAILED.
use crate::config::types::Verdict;
use crate::isolation::types::{
    GroupCompletionStatus, GroupResult, ProcessCompletionStatus, ProcessResult,
};
use crate::verdict::abi::ExitCodeAbi;
use serde::{Deserialize, Serialize};

/// Which row of the decision table produced a verdict
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum VerdictCause {
    /// The group never ran its process to completion
    GroupIncomplete(GroupCompletionStatus),
    /// The process was killed, limited, stopped or never started
    ProcessIncomplete(ProcessCompletionStatus),
    /// Terminated normally but no code was reported
    MissingExitCode,
    /// Verdict taken from the checker's exit code
    CheckerExit(i32),
}

impl VerdictCause {
    /// Whether the checker itself, rather than the sandbox, decided
    pub fn is_checker_decision(&self) -> bool {
        matches!(self, VerdictCause::CheckerExit(_))
    }

    pub fn describe(&self) -> String {
        match self {
            VerdictCause::GroupIncomplete(GroupCompletionStatus::RealTimeLimitExceeded) => {
                "checker exceeded the real time limit".to_string()
            }
            VerdictCause::GroupIncomplete(status) => {
                format!("checker process group did not complete: {:?}", status)
            }
            VerdictCause::ProcessIncomplete(status) => {
                format!("checker did not terminate normally: {:?}", status)
            }
            VerdictCause::MissingExitCode => "checker reported no exit code".to_string(),
            VerdictCause::CheckerExit(code) => format!("checker exited with code {}", code),
        }
    }
}

/// Verdict classifier: pure function over group and process results
pub struct VerdictClassifier;

impl VerdictClassifier {
    pub fn classify(
        group: &GroupResult,
        process: &ProcessResult,
        abi: &ExitCodeAbi,
    ) -> (Verdict, VerdictCause) {
        Self::classify_raw(
            group.completion_status,
            process.completion_status,
            process.exit_status,
            abi,
        )
    }

    /// Group status first, then process status, then the exit code.
    /// No wildcard arms: a new completion status must be placed explicitly.
    pub fn classify_raw(
        group: GroupCompletionStatus,
        process: ProcessCompletionStatus,
        exit_code: Option<i32>,
        abi: &ExitCodeAbi,
    ) -> (Verdict, VerdictCause) {
        match group {
            GroupCompletionStatus::RealTimeLimitExceeded | GroupCompletionStatus::Stopped => {
                return (Verdict::Failed, VerdictCause::GroupIncomplete(group));
            }
            GroupCompletionStatus::Ok | GroupCompletionStatus::AbnormalExit => {}
        }

        match process {
            ProcessCompletionStatus::TerminatedBySystem
            | ProcessCompletionStatus::MemoryLimitExceeded
            | ProcessCompletionStatus::TimeLimitExceeded
            | ProcessCompletionStatus::SystemTimeLimitExceeded
            | ProcessCompletionStatus::UserTimeLimitExceeded
            | ProcessCompletionStatus::OutputLimitExceeded
            | ProcessCompletionStatus::StartFailed
            | ProcessCompletionStatus::Stopped => {
                return (Verdict::Failed, VerdictCause::ProcessIncomplete(process));
            }
            ProcessCompletionStatus::Ok | ProcessCompletionStatus::AbnormalExit => {}
        }

        match exit_code {
            None => (Verdict::Failed, VerdictCause::MissingExitCode),
            Some(code) => (abi.verdict_for(code), VerdictCause::CheckerExit(code)),
        }
    }
}
