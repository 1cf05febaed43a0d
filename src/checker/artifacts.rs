/// Files supplied for one check
use crate::config::types::{JudgeError, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const TEST_INPUT_KEY: &str = "in";
pub const TEST_HINT_KEY: &str = "out";
pub const SOLUTION_STDOUT_KEY: &str = "stdout";

/// Test input plus the optional reference output ("hint")
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestArtifacts {
    input: PathBuf,
    hint: Option<PathBuf>,
}

impl TestArtifacts {
    pub fn new(input: impl Into<PathBuf>, hint: Option<PathBuf>) -> Self {
        Self {
            input: input.into(),
            hint,
        }
    }

    /// Accepts exactly `{in}` or `{in, out}`
    pub fn from_map(map: &BTreeMap<String, PathBuf>) -> Result<Self> {
        let input = map.get(TEST_INPUT_KEY).ok_or_else(|| {
            JudgeError::ContractViolation(format!(
                "test artifacts must contain '{}', got {:?}",
                TEST_INPUT_KEY,
                map.keys().collect::<Vec<_>>()
            ))
        })?;
        if let Some(extra) = map
            .keys()
            .find(|k| k.as_str() != TEST_INPUT_KEY && k.as_str() != TEST_HINT_KEY)
        {
            return Err(JudgeError::ContractViolation(format!(
                "unexpected test artifact '{}', only '{}' and '{}' are allowed",
                extra, TEST_INPUT_KEY, TEST_HINT_KEY
            )));
        }
        Ok(Self::new(input.clone(), map.get(TEST_HINT_KEY).cloned()))
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn hint(&self) -> Option<&Path> {
        self.hint.as_deref()
    }
}

/// Files produced by running the solution on the test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolutionArtifacts {
    stdout: PathBuf,
}

impl SolutionArtifacts {
    pub fn new(stdout: impl Into<PathBuf>) -> Self {
        Self {
            stdout: stdout.into(),
        }
    }

    /// Requires `stdout`; other keys such as `stderr` are ignored
    pub fn from_map(map: &BTreeMap<String, PathBuf>) -> Result<Self> {
        map.get(SOLUTION_STDOUT_KEY)
            .map(|path| Self::new(path.clone()))
            .ok_or_else(|| {
                JudgeError::ContractViolation(format!(
                    "solution artifacts must contain '{}'",
                    SOLUTION_STDOUT_KEY
                ))
            })
    }

    pub fn stdout(&self) -> &Path {
        &self.stdout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(keys: &[&str]) -> BTreeMap<String, PathBuf> {
        keys.iter()
            .map(|k| (k.to_string(), PathBuf::from(format!("/data/{}", k))))
            .collect()
    }

    #[test]
    fn accepted_test_key_sets() {
        let only_input = TestArtifacts::from_map(&map(&["in"])).unwrap();
        assert_eq!(only_input.input(), Path::new("/data/in"));
        assert_eq!(only_input.hint(), None);

        let with_hint = TestArtifacts::from_map(&map(&["in", "out"])).unwrap();
        assert_eq!(with_hint.hint(), Some(Path::new("/data/out")));
    }

    #[test]
    fn rejected_test_key_sets() {
        for keys in [&[][..], &["out"][..], &["in", "out", "extra"][..], &["in", "hint"][..]] {
            let err = TestArtifacts::from_map(&map(keys)).unwrap_err();
            assert!(matches!(err, JudgeError::ContractViolation(_)), "{:?}", keys);
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn solution_needs_stdout_and_ignores_the_rest() {
        let solution = SolutionArtifacts::from_map(&map(&["stdout", "stderr"])).unwrap();
        assert_eq!(solution.stdout(), Path::new("/data/stdout"));
        assert!(SolutionArtifacts::from_map(&map(&["stderr"])).is_err());
    }
}
