use crate::config::types::{JudgeError, Result};
use crate::judge::builder::Builder;
use crate::judge::languages::compiled::{CompiledBuilder, Toolchain};
use crate::judge::languages::interpreted::{PythonBuilder, ShellBuilder};
use crate::judge::languages::java::JavaBuilder;
use serde::{Deserialize, Serialize};

/// A named build strategy and the string arguments it is instantiated with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuilderConfig {
    pub strategy: String,
    #[serde(default)]
    pub arguments: Vec<String>,
}

impl BuilderConfig {
    pub fn new(strategy: impl Into<String>) -> Self {
        Self {
            strategy: strategy.into(),
            arguments: Vec::new(),
        }
    }

    pub fn with_arguments<I, S>(mut self, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments = arguments.into_iter().map(Into::into).collect();
        self
    }
}

pub fn builder_for(config: &BuilderConfig) -> Result<Box<dyn Builder>> {
    let arguments = config.arguments.clone();
    match config.strategy.as_str() {
        "compiled" | "cpp" | "c++" => Ok(Box::new(CompiledBuilder::new(Toolchain::Cpp, arguments))),
        "gcc" | "c" => Ok(Box::new(CompiledBuilder::new(Toolchain::C, arguments))),
        "python" | "python3" => Ok(Box::new(PythonBuilder::new(arguments))),
        "shell" | "sh" => Ok(Box::new(ShellBuilder::new(arguments))),
        "java" => Ok(Box::new(JavaBuilder::new(arguments))),
        other => Err(JudgeError::Config(format!(
            "unsupported build strategy: {other}"
        ))),
    }
}
