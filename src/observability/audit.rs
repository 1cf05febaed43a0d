/// Structured audit events for checks and builds
///
/// Every event is a single JSON object carrying the run id it belongs to.
/// Events always go to the `log` facade under the `judgebox::audit` target;
/// when an audit file has been initialised they are appended there as well.
use crate::config::types::{JudgeError, Result, Verdict};
use crate::verdict::VerdictCause;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use uuid::Uuid;

pub const AUDIT_TARGET: &str = "judgebox::audit";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    CheckStart,
    ArtifactsStaged,
    CheckEnd,
    BuildStart,
    BuildEnd,
    /// Container could not be removed cleanly
    TeardownFailure,
}

impl AuditEventType {
    fn is_failure(&self) -> bool {
        matches!(self, AuditEventType::TeardownFailure)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub run_id: String,
    pub event_type: AuditEventType,
    pub timestamp: DateTime<Utc>,
    pub details: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<VerdictCause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
}

impl AuditEvent {
    pub fn new(run_id: &RunId, event_type: AuditEventType, details: impl Into<String>) -> Self {
        Self {
            run_id: run_id.to_string(),
            event_type,
            timestamp: Utc::now(),
            details: details.into(),
            verdict: None,
            cause: None,
            language: None,
            success: None,
        }
    }

    pub fn with_verdict(mut self, verdict: Verdict, cause: VerdictCause) -> Self {
        self.verdict = Some(verdict);
        self.cause = Some(cause);
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"run_id":"{}","event_type":"serialization_error","details":"{}"}}"#,
                self.run_id, e
            )
        })
    }
}

/// Correlates all events of one check or build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl From<Uuid> for RunId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Append-only JSON lines file
pub struct AuditLog {
    file: Mutex<File>,
    path: PathBuf,
}

impl AuditLog {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                JudgeError::Config(format!("Failed to create audit log directory: {}", e))
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| JudgeError::Config(format!("Failed to open audit log: {}", e)))?;
        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, line: &str) {
        match self.file.lock() {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{}", line).and_then(|_| file.flush()) {
                    error!("Failed to write audit log {}: {}", self.path.display(), e);
                }
            }
            Err(_) => error!("Failed to acquire lock on audit log"),
        }
    }
}

static AUDIT_LOG: OnceLock<AuditLog> = OnceLock::new();

/// Route audit events to a file in addition to the logger
pub fn init_audit_log(path: &Path) -> Result<()> {
    let log = AuditLog::open(path)?;
    if AUDIT_LOG.set(log).is_err() {
        warn!("Audit log already initialized, ignoring {}", path.display());
    }
    Ok(())
}

pub fn record(event: &AuditEvent) {
    let line = event.to_json();
    if event.event_type.is_failure() {
        error!(target: AUDIT_TARGET, "{}", line);
    } else {
        info!(target: AUDIT_TARGET, "{}", line);
    }
    if let Some(log) = AUDIT_LOG.get() {
        log.append(&line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_json_carries_run_id_and_verdict() {
        let run_id = RunId::new();
        let event = AuditEvent::new(&run_id, AuditEventType::CheckEnd, "done")
            .with_verdict(Verdict::WrongAnswer, VerdictCause::CheckerExit(2));
        let value: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(value["run_id"], run_id.to_string());
        assert_eq!(value["event_type"], "check_end");
        assert_eq!(value["verdict"], "WRONG_ANSWER");
        assert_eq!(value["cause"]["detail"], 2);
        assert!(value.get("language").is_none());
    }

    #[test]
    fn audit_log_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(&dir.path().join("nested/audit.log")).unwrap();
        let run_id = RunId::new();
        log.append(&AuditEvent::new(&run_id, AuditEventType::BuildStart, "a").to_json());
        log.append(&AuditEvent::new(&run_id, AuditEventType::BuildEnd, "b").to_json());

        let contents = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
