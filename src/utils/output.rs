/// Bounded loading of program output from a container
use crate::config::types::Result;
use crate::isolation::provider::Filesystem;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputIntegrity {
    #[serde(rename = "complete")]
    Complete,
    #[serde(rename = "truncated_by_judge_limit")]
    TruncatedByJudgeLimit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundedText {
    pub text: String,
    pub integrity: OutputIntegrity,
}

impl BoundedText {
    /// Decode lossily, keeping at most `limit` bytes
    pub fn from_bytes(mut bytes: Vec<u8>, limit: usize) -> Self {
        let integrity = if bytes.len() > limit {
            bytes.truncate(limit);
            OutputIntegrity::TruncatedByJudgeLimit
        } else {
            OutputIntegrity::Complete
        };
        Self {
            text: String::from_utf8_lossy(&bytes).into_owned(),
            integrity,
        }
    }

    pub fn is_truncated(&self) -> bool {
        self.integrity == OutputIntegrity::TruncatedByJudgeLimit
    }

    /// First line with visible content, trimmed
    pub fn first_line(&self) -> Option<&str> {
        self.text.lines().map(str::trim).find(|line| !line.is_empty())
    }
}

/// Read up to `limit` bytes of a container file; one extra byte detects truncation
pub fn load_bounded(fs: &dyn Filesystem, path: &Path, limit: usize) -> Result<Option<BoundedText>> {
    let bytes = fs.read(path, limit.saturating_add(1))?;
    Ok(bytes.map(|bytes| BoundedText::from_bytes(bytes, limit)))
}
