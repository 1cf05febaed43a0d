use crate::config::types::{OwnerId, ResourceLimits, Result};
use crate::isolation::provider::Container;
use crate::judge::builder::{
    build_path_string, run_plan, BuildOutcome, BuildPlan, Builder, CompileStep, LaunchCommand,
    BUILD_DIR,
};

#[derive(Debug, Clone, Default)]
pub struct JavaBuilder {
    /// Extra JVM flags for runs
    flags: Vec<String>,
}

/// `javac` wants the file named after its public class
pub fn detect_class_name(source: &str) -> String {
    for line in source.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("public class ") {
            let name = rest
                .split_whitespace()
                .next()
                .unwrap_or("Main")
                .trim_end_matches('{')
                .trim();
            if is_java_identifier(name) {
                return name.to_string();
            }
        }
    }
    "Main".to_string()
}

/// `[A-Za-z_$][A-Za-z0-9_$]*`; anything else cannot name a class file
fn is_java_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' || first == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

impl JavaBuilder {
    pub fn new(flags: Vec<String>) -> Self {
        Self { flags }
    }

    pub fn plan(&self, source: &str) -> BuildPlan {
        let class = detect_class_name(source);
        let source_name = format!("{}.java", class);

        let mut launch_arguments: Vec<String> = ["-Xmx256m", "-Xss64m", "-XX:+UseSerialGC"]
            .iter()
            .map(|f| f.to_string())
            .collect();
        launch_arguments.extend(self.flags.iter().cloned());
        launch_arguments.extend(["-cp".to_string(), BUILD_DIR.to_string(), class]);

        BuildPlan {
            compile: CompileStep::new(
                "/usr/bin/javac",
                [
                    "-J-Xmx512m".to_string(),
                    "-encoding".to_string(),
                    "UTF-8".to_string(),
                    "-d".to_string(),
                    BUILD_DIR.to_string(),
                    build_path_string(&source_name),
                ],
            ),
            launch: LaunchCommand::new("/usr/bin/java", launch_arguments)
                .with_environment("JAVA_TOOL_OPTIONS", "-Dfile.encoding=UTF-8"),
            source_name,
        }
    }
}

impl Builder for JavaBuilder {
    fn name(&self) -> &str {
        "java"
    }

    fn build(
        &self,
        container: &dyn Container,
        owner: OwnerId,
        source: &str,
        limits: &ResourceLimits,
    ) -> Result<BuildOutcome> {
        run_plan(self.name(), container, owner, source, limits, self.plan(source))
    }
}
