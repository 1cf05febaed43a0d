/// Copies check artifacts into the container at their fixed paths
use crate::checker::artifacts::{SolutionArtifacts, TestArtifacts};
use crate::config::types::{JudgeError, OwnerId, Result};
use crate::isolation::provider::Filesystem;
use log::debug;
use std::path::{Path, PathBuf};

pub const CHECKING_ROOT: &str = "/tmp/checking";
pub const PACKAGE_DIR: &str = "/tmp/checking/package";
pub const CHECKER_PATH: &str = "/tmp/checking/package/bin/checker";
pub const LOG_PATH: &str = "/tmp/checking/log";

pub const INPUT_NAME: &str = "in";
pub const OUTPUT_NAME: &str = "out";
pub const HINT_NAME: &str = "hint";
/// Passed instead of the hint name when no hint exists
pub const NO_HINT: &str = "/dev/null";

/// Staged files are readable by everyone and writable by nobody
pub const STAGED_MODE: u32 = 0o444;

pub struct ArtifactStager {
    owner: OwnerId,
}

impl ArtifactStager {
    pub fn new(owner: OwnerId) -> Self {
        Self { owner }
    }

    pub fn staged_path(name: &str) -> PathBuf {
        Path::new(CHECKING_ROOT).join(name)
    }

    /// Stage `in`, `out` and, when present, `hint`.
    /// Returns the third checker argument: `hint` or the no-hint sentinel.
    pub fn stage(
        &self,
        fs: &dyn Filesystem,
        test: &TestArtifacts,
        solution: &SolutionArtifacts,
    ) -> Result<&'static str> {
        self.push(fs, test.input(), INPUT_NAME)?;
        self.push(fs, solution.stdout(), OUTPUT_NAME)?;
        match test.hint() {
            Some(hint) => {
                self.push(fs, hint, HINT_NAME)?;
                Ok(HINT_NAME)
            }
            None => Ok(NO_HINT),
        }
    }

    fn push(&self, fs: &dyn Filesystem, source: &Path, name: &str) -> Result<()> {
        let destination = Self::staged_path(name);
        fs.push(source, &destination, self.owner, STAGED_MODE)
            .map_err(|e| {
                JudgeError::Staging(format!(
                    "Failed to stage {} as {}: {}",
                    source.display(),
                    destination.display(),
                    e
                ))
            })?;
        debug!("Staged {} as {}", source.display(), destination.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::scripted::ScriptedProvider;
    use crate::isolation::provider::IsolationProvider;
    use crate::isolation::types::ContainerConfig;

    #[test]
    fn hint_is_staged_only_when_present() {
        let provider = ScriptedProvider::new();
        let container = provider.create_container(&ContainerConfig::default()).unwrap();
        let stager = ArtifactStager::new(OwnerId::staging());

        let argument = stager
            .stage(
                container.filesystem(),
                &TestArtifacts::new("/data/in", None),
                &SolutionArtifacts::new("/data/stdout"),
            )
            .unwrap();
        assert_eq!(argument, NO_HINT);

        let argument = stager
            .stage(
                container.filesystem(),
                &TestArtifacts::new("/data/in", Some(PathBuf::from("/data/out"))),
                &SolutionArtifacts::new("/data/stdout"),
            )
            .unwrap();
        assert_eq!(argument, HINT_NAME);

        let pushes = provider.pushes();
        let destinations: Vec<_> = pushes.iter().map(|p| p.destination.clone()).collect();
        assert_eq!(
            destinations,
            vec![
                PathBuf::from("/tmp/checking/in"),
                PathBuf::from("/tmp/checking/out"),
                PathBuf::from("/tmp/checking/in"),
                PathBuf::from("/tmp/checking/out"),
                PathBuf::from("/tmp/checking/hint"),
            ]
        );
        assert!(pushes
            .iter()
            .all(|p| p.owner == OwnerId::staging() && p.mode == STAGED_MODE));
    }

    #[test]
    fn push_failure_is_a_staging_error() {
        let provider = ScriptedProvider::new().failing_push("/tmp/checking/out");
        let container = provider.create_container(&ContainerConfig::default()).unwrap();
        let err = ArtifactStager::new(OwnerId::staging())
            .stage(
                container.filesystem(),
                &TestArtifacts::new("/data/in", None),
                &SolutionArtifacts::new("/data/stdout"),
            )
            .unwrap_err();
        assert!(matches!(err, JudgeError::Staging(_)));
        assert!(err.is_retryable());
    }
}
