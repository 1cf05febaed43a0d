use crate::checker::{Checker, SolutionArtifacts, TestArtifacts};
use crate::config::loader::JudgeConfig;
use crate::isolation::local::{LocalProvider, MemoryEnforcement};
use crate::isolation::provider::IsolationProvider;
use crate::isolation::types::{AccessMode, ContainerConfig, ProcessResult, Stream};
use crate::judge::registry::builder_for;
use crate::observability::audit::{self, AuditEvent, AuditEventType, RunId};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const RUN_DIR: &str = "/tmp/run";
const RUN_INPUT: &str = "/tmp/run/input";
const RUN_OUTPUT: &str = "/tmp/run/output";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to $JUDGEBOX_CONFIG, then ./judgebox.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a problem's checker on one test and print the verdict as JSON
    Check {
        /// Problem package directory containing bin/checker
        #[arg(long)]
        package: PathBuf,
        /// Test input file
        #[arg(long)]
        input: PathBuf,
        /// Reference output passed to the checker as the hint
        #[arg(long)]
        hint: Option<PathBuf>,
        /// Output produced by the solution
        #[arg(long)]
        output: PathBuf,
    },
    /// Build a source file and print the build result as JSON
    Build {
        /// Language name, resolved through the configured builders
        #[arg(long)]
        language: String,
        #[arg(long)]
        source: PathBuf,
        /// Run the built solution once with this file as stdin
        #[arg(long, requires = "run_output")]
        run_input: Option<PathBuf>,
        /// Where to write the solution's stdout
        #[arg(long, requires = "run_input")]
        run_output: Option<PathBuf>,
    },
}

fn load_config(path: Option<&Path>) -> Result<JudgeConfig> {
    let config = match path {
        Some(path) => JudgeConfig::load_from_file(path)?,
        None => JudgeConfig::load_default()?,
    };
    if let Some(audit_log) = &config.audit_log {
        audit::init_audit_log(audit_log)?;
    }
    Ok(config)
}

fn provider(config: &JudgeConfig) -> Result<LocalProvider> {
    let mut provider = match &config.runtime_root {
        Some(root) => LocalProvider::new(root),
        None => LocalProvider::default(),
    };
    if let Some(cgroup_root) = &config.cgroup_root {
        provider = provider
            .with_cgroup_root(cgroup_root)
            .with_context(|| format!("cgroup root {}", cgroup_root.display()))?;
    }
    if !provider.is_privileged() {
        log::warn!(
            "Not running as root: packages are copied instead of bind mounted and processes keep the current identity"
        );
    }
    if provider.memory_enforcement() == MemoryEnforcement::AddressSpace {
        log::warn!("No memory cgroup: memory limit violations cannot be detected");
    }
    Ok(provider)
}

pub fn run() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Check {
            package,
            input,
            hint,
            output,
        } => {
            let package = package
                .canonicalize()
                .with_context(|| format!("problem package {}", package.display()))?;
            let checker = Checker::new(
                Arc::new(provider(&config)?),
                config.checker.settings(package),
            );
            let result = checker.check(
                &TestArtifacts::new(input, hint),
                &SolutionArtifacts::new(output),
            )?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Build {
            language,
            source,
            run_input,
            run_output,
        } => {
            let text = std::fs::read_to_string(&source)
                .with_context(|| format!("reading source {}", source.display()))?;
            let (build, run) = build_and_run(
                &config,
                &language,
                &text,
                run_input.as_deref().zip(run_output.as_deref()),
            )?;
            let report = serde_json::json!({ "build": build, "run": run });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

fn build_and_run(
    config: &JudgeConfig,
    language: &str,
    source: &str,
    run: Option<(&Path, &Path)>,
) -> Result<(crate::config::types::BuildResult, Option<ProcessResult>)> {
    let builder = builder_for(&config.build.builder_config(language))?;
    let provider = provider(config)?;
    let container = provider.create_container(&ContainerConfig::default())?;
    let owner = config.build.owner;

    let run_id = RunId::new();
    audit::record(
        &AuditEvent::new(&run_id, AuditEventType::BuildStart, format!("{} bytes", source.len()))
            .with_language(builder.name()),
    );
    let outcome = builder.build(container.as_ref(), owner, source, &config.build.limits)?;
    audit::record(
        &AuditEvent::new(&run_id, AuditEventType::BuildEnd, outcome.result.output.clone())
            .with_language(builder.name())
            .with_success(outcome.result.success),
    );

    let (solution, (input, output)) = match (outcome.solution, run) {
        (Some(solution), Some(paths)) => (solution, paths),
        _ => return Ok((outcome.result, None)),
    };

    let fs = container.filesystem();
    fs.create_directory(Path::new(RUN_DIR), owner, 0o755)?;
    fs.push(input, Path::new(RUN_INPUT), owner, 0o444)?;

    let mut group = container.create_process_group()?;
    group.set_resource_limits(config.build.run_limits.clone());
    let id = {
        let process = solution.create(group.as_mut(), &[]);
        process
            .set_current_dir(RUN_DIR)
            .set_stream(0, Stream::file(RUN_INPUT, AccessMode::ReadOnly))
            .set_stream(1, Stream::file(RUN_OUTPUT, AccessMode::WriteOnly))
            .set_owner(owner)
            .set_resource_limits(config.build.run_limits.clone());
        process.id()
    };
    let group_result = group.run_synchronously()?;
    let result = group
        .result(id)
        .cloned()
        .context("no result for the solution process")?;
    drop(group);

    if fs.read(Path::new(RUN_OUTPUT), 0)?.is_some() {
        fs.pull(Path::new(RUN_OUTPUT), output)?;
    }
    info!(
        "Solution finished in {}ms: {:?}",
        group_result.real_time.as_millis(),
        result.completion_status
    );
    Ok((outcome.result, Some(result)))
}
