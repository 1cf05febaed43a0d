use crate::config::types::{OwnerId, ResourceLimits, Result};
use crate::isolation::provider::Container;
use crate::judge::builder::{
    build_path_string, run_plan, BuildOutcome, BuildPlan, Builder, CompileStep, LaunchCommand,
};

const PYTHON: &str = "/usr/bin/python3";
const SHELL: &str = "/bin/sh";

/// Python 3: syntax checked with `py_compile`, launched through the interpreter
#[derive(Debug, Clone, Default)]
pub struct PythonBuilder {
    /// Extra interpreter flags for runs
    flags: Vec<String>,
}

impl PythonBuilder {
    pub fn new(flags: Vec<String>) -> Self {
        Self { flags }
    }

    pub fn plan(&self) -> BuildPlan {
        let source = build_path_string("solution.py");
        let mut launch_arguments = vec!["-B".to_string(), "-S".to_string()];
        launch_arguments.extend(self.flags.iter().cloned());
        launch_arguments.push(source.clone());

        BuildPlan {
            source_name: "solution.py".to_string(),
            compile: CompileStep::new(PYTHON, ["-m".to_string(), "py_compile".to_string(), source]),
            launch: LaunchCommand::new(PYTHON, launch_arguments)
                .with_environment("PYTHONIOENCODING", "utf-8"),
        }
    }
}

impl Builder for PythonBuilder {
    fn name(&self) -> &str {
        "python"
    }

    fn build(
        &self,
        container: &dyn Container,
        owner: OwnerId,
        source: &str,
        limits: &ResourceLimits,
    ) -> Result<BuildOutcome> {
        run_plan(self.name(), container, owner, source, limits, self.plan())
    }
}

/// POSIX shell script: `sh -n` parses without executing
#[derive(Debug, Clone, Default)]
pub struct ShellBuilder {
    flags: Vec<String>,
}

impl ShellBuilder {
    pub fn new(flags: Vec<String>) -> Self {
        Self { flags }
    }

    pub fn plan(&self) -> BuildPlan {
        let source = build_path_string("solution.sh");
        let mut launch_arguments = self.flags.clone();
        launch_arguments.push(source.clone());

        BuildPlan {
            source_name: "solution.sh".to_string(),
            compile: CompileStep::new(SHELL, ["-n".to_string(), source]),
            launch: LaunchCommand::new(SHELL, launch_arguments),
        }
    }
}

impl Builder for ShellBuilder {
    fn name(&self) -> &str {
        "shell"
    }

    fn build(
        &self,
        container: &dyn Container,
        owner: OwnerId,
        source: &str,
        limits: &ResourceLimits,
    ) -> Result<BuildOutcome> {
        run_plan(self.name(), container, owner, source, limits, self.plan())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn python_flags_precede_the_script() {
        let plan = PythonBuilder::new(vec!["-O".into()]).plan();
        assert_eq!(plan.compile.arguments, vec!["-m", "py_compile", "/tmp/build/solution.py"]);
        assert_eq!(
            plan.launch.arguments,
            vec!["-B", "-S", "-O", "/tmp/build/solution.py"]
        );
    }

    #[test]
    fn shell_checks_syntax_without_running() {
        let plan = ShellBuilder::default().plan();
        assert_eq!(plan.compile.arguments, vec!["-n", "/tmp/build/solution.sh"]);
        assert_eq!(plan.launch.arguments, vec!["/tmp/build/solution.sh"]);
    }
}
