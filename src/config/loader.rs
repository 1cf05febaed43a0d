/// Configuration loading from judgebox.json
use crate::checker::CheckerSettings;
use crate::config::types::{JudgeError, OwnerId, ResourceLimits, Result};
use crate::judge::registry::BuilderConfig;
use crate::verdict::ExitCodeAbi;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "JUDGEBOX_CONFIG";
pub const CONFIG_FILE_NAME: &str = "judgebox.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckerConfig {
    pub owner: OwnerId,
    pub staging_owner: OwnerId,
    pub limits: ResourceLimits,
    pub abi: ExitCodeAbi,
    pub log_limit_bytes: usize,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            owner: OwnerId::nobody(),
            staging_owner: OwnerId::staging(),
            limits: ResourceLimits::checker_defaults(),
            abi: ExitCodeAbi::default(),
            log_limit_bytes: 64 * 1024,
        }
    }
}

impl CheckerConfig {
    pub fn settings(&self, package_dir: impl Into<PathBuf>) -> CheckerSettings {
        CheckerSettings {
            package_dir: package_dir.into(),
            owner: self.owner,
            staging_owner: self.staging_owner,
            limits: self.limits.clone(),
            abi: self.abi.clone(),
            log_limit_bytes: self.log_limit_bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    pub owner: OwnerId,
    pub limits: ResourceLimits,
    /// Limits for launching a built solution from the CLI
    pub run_limits: ResourceLimits,
    /// Language name to build strategy
    pub builders: BTreeMap<String, BuilderConfig>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        let builders = [
            ("cpp", "cpp"),
            ("c", "c"),
            ("python", "python"),
            ("shell", "shell"),
            ("java", "java"),
        ]
        .into_iter()
        .map(|(language, strategy)| (language.to_string(), BuilderConfig::new(strategy)))
        .collect();
        Self {
            owner: OwnerId::nobody(),
            limits: ResourceLimits::build_defaults(),
            run_limits: ResourceLimits::checker_defaults(),
            builders,
        }
    }
}

impl BuildConfig {
    /// Configured strategy for a language, or the language name used as a strategy
    pub fn builder_config(&self, language: &str) -> BuilderConfig {
        self.builders
            .get(&language.to_lowercase())
            .cloned()
            .unwrap_or_else(|| BuilderConfig::new(language.to_lowercase()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JudgeConfig {
    /// Where the local provider creates containers
    pub runtime_root: Option<PathBuf>,
    /// Parent cgroup for memory limits, when not the provider's default
    pub cgroup_root: Option<PathBuf>,
    /// JSON lines audit file, in addition to the logger
    pub audit_log: Option<PathBuf>,
    pub checker: CheckerConfig,
    pub build: BuildConfig,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            runtime_root: None,
            cgroup_root: None,
            audit_log: None,
            checker: CheckerConfig::default(),
            build: BuildConfig::default(),
        }
    }
}

impl JudgeConfig {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            JudgeError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: JudgeConfig = serde_json::from_str(&content)
            .map_err(|e| JudgeError::Config(format!("Failed to parse config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// `$JUDGEBOX_CONFIG`, then `./judgebox.json`, then built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Self::load_from_file(PathBuf::from(path));
        }

        let local = std::env::current_dir()
            .map_err(|e| JudgeError::Config(format!("Failed to get current directory: {}", e)))?
            .join(CONFIG_FILE_NAME);
        if local.exists() {
            return Self::load_from_file(local);
        }

        log::debug!("No {} found, using built-in defaults", CONFIG_FILE_NAME);
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<()> {
        validate_limits("checker.limits", &self.checker.limits)?;
        validate_limits("build.limits", &self.build.limits)?;
        validate_limits("build.run_limits", &self.build.run_limits)?;

        for (name, owner) in [
            ("checker.owner", self.checker.owner),
            ("checker.staging_owner", self.checker.staging_owner),
            ("build.owner", self.build.owner),
        ] {
            if owner.is_root() {
                return Err(JudgeError::Config(format!(
                    "{} must not be root, got {}",
                    name, owner
                )));
            }
        }

        if self.checker.staging_owner.uid == self.checker.owner.uid {
            return Err(JudgeError::Config(format!(
                "checker.staging_owner must differ from checker.owner, both use uid {}",
                self.checker.owner.uid
            )));
        }

        if self.checker.log_limit_bytes == 0 {
            return Err(JudgeError::Config(
                "checker.log_limit_bytes must be positive".to_string(),
            ));
        }
        self.checker.abi.validate()?;

        for (language, builder) in &self.build.builders {
            crate::judge::registry::builder_for(builder).map_err(|e| {
                JudgeError::Config(format!("build.builders.{}: {}", language, e))
            })?;
        }
        Ok(())
    }
}

fn validate_limits(section: &str, limits: &ResourceLimits) -> Result<()> {
    let fields = [
        ("cpu_time_limit_ms", limits.cpu_time_limit_ms),
        ("real_time_limit_ms", limits.real_time_limit_ms),
        ("memory_limit_bytes", limits.memory_limit_bytes),
        ("output_limit_bytes", limits.output_limit_bytes),
        ("process_limit", limits.process_limit.map(u64::from)),
    ];
    for (field, value) in fields {
        if value == Some(0) {
            return Err(JudgeError::Config(format!(
                "{}.{} must be positive",
                section, field
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::Verdict;

    #[test]
    fn defaults_are_valid() {
        JudgeConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("judgebox.json");
        std::fs::write(
            &path,
            r#"{
                "checker": { "abi": "testlib", "limits": { "cpu_time_limit_ms": 2000 } },
                "build": { "builders": { "cpp": { "strategy": "cpp", "arguments": ["-O0"] } } }
            }"#,
        )
        .unwrap();

        let config = JudgeConfig::load_from_file(&path).unwrap();
        assert_eq!(config.checker.abi.verdict_for(1), Verdict::WrongAnswer);
        assert_eq!(config.checker.limits.cpu_time_limit_ms, Some(2000));
        assert_eq!(config.checker.limits.memory_limit_bytes, None);
        assert_eq!(config.checker.owner, OwnerId::nobody());
        assert_eq!(config.build.builder_config("CPP").arguments, vec!["-O0"]);
        assert_eq!(config.build.builder_config("python").strategy, "python");
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let mut config = JudgeConfig::default();
        config.checker.limits.memory_limit_bytes = Some(0);
        assert!(matches!(config.validate(), Err(JudgeError::Config(_))));

        let mut config = JudgeConfig::default();
        config.checker.owner = OwnerId::new(0, 0);
        assert!(config.validate().is_err());

        let mut config = JudgeConfig::default();
        config
            .build
            .builders
            .insert("cobol".into(), BuilderConfig::new("cobol"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn staging_owner_must_not_be_the_checker() {
        let defaults = CheckerConfig::default();
        assert_ne!(defaults.staging_owner, defaults.owner);

        let mut config = JudgeConfig::default();
        config.checker.staging_owner = config.checker.owner;
        assert!(matches!(config.validate(), Err(JudgeError::Config(_))));

        // Same uid under another group still owns the files.
        let mut config = JudgeConfig::default();
        config.checker.staging_owner = OwnerId::new(config.checker.owner.uid, 4242);
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_fields_are_errors() {
        let err = serde_json::from_str::<JudgeConfig>(r#"{"checkr": {}}"#);
        assert!(err.is_err());
    }
}
