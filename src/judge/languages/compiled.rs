use crate::config::types::{OwnerId, ResourceLimits, Result};
use crate::isolation::provider::Container;
use crate::judge::builder::{
    build_path_string, run_plan, BuildOutcome, BuildPlan, Builder, CompileStep, LaunchCommand,
};

/// Native toolchain producing a single executable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toolchain {
    Cpp,
    C,
}

impl Toolchain {
    fn compiler(&self) -> &'static str {
        match self {
            Toolchain::Cpp => "/usr/bin/g++",
            Toolchain::C => "/usr/bin/gcc",
        }
    }

    fn default_flags(&self) -> &'static [&'static str] {
        match self {
            Toolchain::Cpp => &["-std=c++17", "-O2", "-pipe"],
            Toolchain::C => &["-std=c11", "-O2", "-pipe"],
        }
    }

    fn source_name(&self) -> &'static str {
        match self {
            Toolchain::Cpp => "solution.cpp",
            Toolchain::C => "solution.c",
        }
    }

    fn link_flags(&self) -> &'static [&'static str] {
        match self {
            Toolchain::Cpp => &[],
            Toolchain::C => &["-lm"],
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompiledBuilder {
    toolchain: Toolchain,
    /// Extra compiler flags, placed after the defaults
    flags: Vec<String>,
}

impl CompiledBuilder {
    pub fn new(toolchain: Toolchain, flags: Vec<String>) -> Self {
        Self { toolchain, flags }
    }

    pub fn plan(&self) -> BuildPlan {
        let source = build_path_string(self.toolchain.source_name());
        let binary = build_path_string("solution");

        let mut arguments: Vec<String> = self
            .toolchain
            .default_flags()
            .iter()
            .map(|f| f.to_string())
            .collect();
        arguments.extend(self.flags.iter().cloned());
        arguments.extend(["-o".to_string(), binary.clone(), source]);
        arguments.extend(self.toolchain.link_flags().iter().map(|f| f.to_string()));

        BuildPlan {
            source_name: self.toolchain.source_name().to_string(),
            compile: CompileStep::new(self.toolchain.compiler(), arguments),
            launch: LaunchCommand::new(binary, Vec::<String>::new()),
        }
    }
}

impl Builder for CompiledBuilder {
    fn name(&self) -> &str {
        match self.toolchain {
            Toolchain::Cpp => "cpp",
            Toolchain::C => "c",
        }
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
    use std::path::Path;

    #[test]
    fn cpp_plan_compiles_to_build_dir() {
        let plan = CompiledBuilder::new(Toolchain::Cpp, vec!["-DONLINE_JUDGE".into()]).plan();
        assert_eq!(plan.source_name, "solution.cpp");
        assert_eq!(plan.compile.executable, Path::new("/usr/bin/g++"));
        assert_eq!(
            plan.compile.arguments,
            vec![
                "-std=c++17",
                "-O2",
                "-pipe",
                "-DONLINE_JUDGE",
                "-o",
                "/tmp/build/solution",
                "/tmp/build/solution.cpp"
            ]
        );
        assert_eq!(plan.launch.executable, Path::new("/tmp/build/solution"));
        assert!(plan.launch.arguments.is_empty());
    }

    #[test]
    fn c_plan_links_libm() {
        let plan = CompiledBuilder::new(Toolchain::C, Vec::new()).plan();
        assert_eq!(plan.compile.executable, Path::new("/usr/bin/gcc"));
        assert_eq!(plan.compile.arguments.last().map(String::as_str), Some("-lm"));
    }
}
