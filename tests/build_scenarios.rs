use judgebox::isolation::local::LocalProvider;
use judgebox::isolation::provider::{Container, IsolationProvider};
use judgebox::isolation::types::{AccessMode, ContainerConfig, ProcessCompletionStatus, Stream};
use judgebox::judge::{builder_for, BuilderConfig, Solution};
use judgebox::{OwnerId, ResourceLimits};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

fn provider() -> (tempfile::TempDir, LocalProvider) {
    let dir = tempfile::tempdir().unwrap();
    fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o755)).unwrap();
    let provider = LocalProvider::new(dir.path().join("runtime"));
    (dir, provider)
}

fn run_once(container: &dyn Container, solution: &dyn Solution, input: &str, tag: &str) -> String {
    let fs = container.filesystem();
    let input_path = format!("/tmp/run/{}.in", tag);
    let output_path = format!("/tmp/run/{}.out", tag);
    fs.create_directory(Path::new("/tmp/run"), OwnerId::current(), 0o755)
        .unwrap();
    fs.write(Path::new(&input_path), input.as_bytes(), OwnerId::current(), 0o444)
        .unwrap();

    let mut group = container.create_process_group().unwrap();
    let id = solution
        .create(group.as_mut(), &["unused-argument".to_string()])
        .set_current_dir("/tmp/run")
        .set_stream(0, Stream::file(input_path.as_str(), AccessMode::ReadOnly))
        .set_stream(1, Stream::file(output_path.as_str(), AccessMode::WriteOnly))
        .set_resource_limits(ResourceLimits::checker_defaults())
        .id();
    group.run_synchronously().unwrap();
    assert_eq!(
        group.result(id).unwrap().completion_status,
        ProcessCompletionStatus::Ok
    );
    drop(group);

    let output = fs.read(Path::new(&output_path), 1024).unwrap().unwrap();
    String::from_utf8(output).unwrap()
}

#[test]
fn invalid_source_fails_with_diagnostic_and_no_solution() {
    let (_dir, provider) = provider();
    let container = provider.create_container(&ContainerConfig::default()).unwrap();
    let builder = builder_for(&BuilderConfig::new("shell")).unwrap();

    let outcome = builder
        .build(
            container.as_ref(),
            OwnerId::current(),
            "if then fi (\n",
            &ResourceLimits::build_defaults(),
        )
        .unwrap();
    assert!(!outcome.result.success);
    assert!(!outcome.result.output.trim().is_empty());
    assert!(outcome.solution.is_none());
}

#[test]
fn built_solution_launches_repeatedly_without_rebuilding() {
    let (_dir, provider) = provider();
    let container = provider.create_container(&ContainerConfig::default()).unwrap();
    let builder = builder_for(&BuilderConfig::new("sh")).unwrap();

    let outcome = builder
        .build(
            container.as_ref(),
            OwnerId::current(),
            "read x\necho $((x * 2))\n",
            &ResourceLimits::build_defaults(),
        )
        .unwrap();
    assert!(outcome.result.success, "{}", outcome.result.output);
    let solution = outcome.solution.unwrap();

    assert_eq!(run_once(container.as_ref(), solution.as_ref(), "21\n", "first"), "42\n");
    assert_eq!(run_once(container.as_ref(), solution.as_ref(), "5\n", "second"), "10\n");
}

#[test]
fn python_syntax_error_is_reported() {
    if !Path::new("/usr/bin/python3").exists() {
        return;
    }
    let (_dir, provider) = provider();
    let container = provider.create_container(&ContainerConfig::default()).unwrap();
    let builder = builder_for(&BuilderConfig::new("python3")).unwrap();

    let outcome = builder
        .build(
            container.as_ref(),
            OwnerId::current(),
            "def broken(:\n    pass\n",
            &ResourceLimits::build_defaults(),
        )
        .unwrap();
    assert!(!outcome.result.success);
    assert!(outcome.result.output.contains("SyntaxError"), "{}", outcome.result.output);
}

#[test]
fn containers_are_removed_after_builds() {
    let (_dir, provider) = provider();
    {
        let container = provider.create_container(&ContainerConfig::default()).unwrap();
        builder_for(&BuilderConfig::new("shell"))
            .unwrap()
            .build(
                container.as_ref(),
                OwnerId::current(),
                "echo ok\n",
                &ResourceLimits::build_defaults(),
            )
            .unwrap();
    }
    assert_eq!(fs::read_dir(provider.runtime_root()).unwrap().count(), 0);
}

#[test]
fn hostile_java_class_names_fail_the_build_instead_of_erroring() {
    let (_dir, provider) = provider();
    let builder = builder_for(&BuilderConfig::new("java")).unwrap();
    for source in ["public class /etc/Evil {}\n", "public class ../Evil {}\n"] {
        let container = provider.create_container(&ContainerConfig::default()).unwrap();
        let outcome = builder
            .build(
                container.as_ref(),
                OwnerId::current(),
                source,
                &ResourceLimits::build_defaults(),
            )
            .unwrap_or_else(|e| panic!("{:?} raised {} (retryable={})", source, e, e.is_retryable()));
        assert!(!outcome.result.success);
        assert!(outcome.solution.is_none());
    }
    assert!(!Path::new("/etc/Evil.java").exists());
}
