//! End-to-end behavior of the `mutex` task inside real builds.

use keel_core::{BuildLogger, EngineConfig, MemoryLogger};
use keel_runtime::{default_registry, BuildError, BuildReport, BuildRunner, BuildStatus};
use keel_sync::NamedLock;
use keel_task::{Project, ProjectDefinition, TaskError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

struct Build {
    _dir: TempDir,
    lock_dir: std::path::PathBuf,
    runner: BuildRunner,
    logger: Arc<MemoryLogger>,
}

fn build(definition: &str, fail_fast: bool) -> Build {
    let dir = TempDir::new().unwrap();
    let config = Arc::new(
        EngineConfig::default()
            .with_lock_dir(dir.path())
            .with_fail_fast(fail_fast),
    );
    let registry = default_registry(Arc::clone(&config), None).unwrap();
    let definition = ProjectDefinition::from_json_str(definition).unwrap();
    let project = Project::from_definition(&definition, &registry).unwrap();
    let logger = Arc::new(MemoryLogger::new());
    let runner = BuildRunner::new(
        Arc::new(project),
        config,
        Arc::clone(&logger) as Arc<dyn BuildLogger>,
    );

    Build {
        lock_dir: dir.path().to_path_buf(),
        _dir: dir,
        runner,
        logger,
    }
}

fn count(logger: &MemoryLogger, needle: &str) -> usize {
    logger.messages().iter().filter(|m| m.contains(needle)).count()
}

fn only_failure(report: &BuildReport) -> &TaskError {
    assert_eq!(report.failed.len(), 1, "{report:?}");
    &report.failed[0].1
}

#[test]
fn same_name_on_own_ancestry_is_a_deadlock() {
    let b = build(
        r#"{
            "name": "deadlock",
            "targets": [
                {"name": "build", "tasks": [
                    {"task": "mutex", "attributes": {"name": "lockA", "timeout": "30000"}, "children": [
                        {"task": "call", "attributes": {"target": "inner"}}
                    ]}
                ]},
                {"name": "inner", "tasks": [
                    {"task": "mutex", "attributes": {"name": "LOCKA", "timeout": "30000"}, "children": [
                        {"task": "echo", "attributes": {"message": "unreachable"}}
                    ]}
                ]}
            ]
        }"#,
        true,
    );

    let start = Instant::now();
    let report = b.runner.execute(&["build"]).unwrap();
    assert!(start.elapsed() < Duration::from_secs(5), "waited for the lock");

    match only_failure(&report).root_cause() {
        TaskError::Deadlock { name, ancestry } => {
            assert_eq!(name, "LOCKA");
            assert_eq!(ancestry.first().map(String::as_str), Some("task <mutex>"));
            assert!(ancestry.iter().any(|f| f == "target 'inner'"));
            assert_eq!(ancestry.last().map(String::as_str), Some("target 'build'"));
        }
        other => panic!("expected a deadlock, got {other:?}"),
    }
    assert!(!b.logger.contains("unreachable"));
    assert_eq!(count(&b.logger, "acquired lock 'lockA'"), 1);
    assert_eq!(count(&b.logger, "released lock 'lockA'"), 1);
    assert!(b.lock_dir.join("lockA.lock").exists());
    assert!(!b.lock_dir.join("LOCKA.lock").exists(), "inner mutex touched its lock");
}

#[test]
fn uncontended_lock_runs_nested_once() {
    let b = build(
        r#"{
            "name": "single",
            "default": "build",
            "targets": [
                {"name": "build", "tasks": [
                    {"task": "mutex", "attributes": {"name": "build-lock", "timeout": "2000"}, "children": [
                        {"task": "echo", "attributes": {"message": "compiling"}}
                    ]}
                ]}
            ]
        }"#,
        true,
    );

    let start = Instant::now();
    let report = b.runner.run(&[]).unwrap();
    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(report.is_success());
    assert_eq!(count(&b.logger, "[echo] compiling"), 1);
    assert_eq!(count(&b.logger, "released lock 'build-lock'"), 1);

    let probe = NamedLock::new(&b.lock_dir, "build-lock").unwrap();
    assert!(probe.try_acquire().unwrap().is_some());
}

#[test]
fn lock_released_once_when_nested_task_fails() {
    let b = build(
        r#"{
            "name": "failing",
            "targets": [
                {"name": "build", "tasks": [
                    {"task": "mutex", "attributes": {"name": "build-lock", "timeout": "2000"}, "children": [
                        {"task": "echo", "attributes": {"message": "before"}},
                        {"task": "fail", "attributes": {"message": "compiler crashed"}},
                        {"task": "echo", "attributes": {"message": "after"}}
                    ]}
                ]}
            ]
        }"#,
        true,
    );

    let err = b.runner.run(&["build"]).unwrap_err();
    let BuildError::TargetFailed { target, source } = err else {
        panic!("expected a target failure");
    };
    assert_eq!(target, "build");
    assert!(matches!(source, TaskError::Nested { ref task, .. } if task == "mutex"));
    assert!(source.to_string().contains("compiler crashed"));

    assert_eq!(count(&b.logger, "[echo] before"), 1);
    assert_eq!(count(&b.logger, "[echo] after"), 0);
    assert_eq!(count(&b.logger, "released lock 'build-lock'"), 1);

    let probe = NamedLock::new(&b.lock_dir, "build-lock").unwrap();
    assert!(probe.try_acquire().unwrap().is_some());
}

#[test]
fn contended_lock_times_out_after_bound() {
    let b = build(
        r#"{
            "name": "contention",
            "targets": [
                {"name": "build", "tasks": [
                    {"task": "parallel", "children": [
                        {"task": "mutex", "attributes": {"name": "build-lock", "timeout": "1000"}, "children": [
                            {"task": "sleep", "attributes": {"duration": "5000"}}
                        ]},
                        {"task": "mutex", "attributes": {"name": "build-lock", "timeout": "1000"}, "children": [
                            {"task": "sleep", "attributes": {"duration": "5000"}}
                        ]}
                    ]}
                ]}
            ]
        }"#,
        true,
    );

    let start = Instant::now();
    let report = b.runner.execute(&["build"]).unwrap();
    let elapsed = start.elapsed();

    assert_eq!(report.status, BuildStatus::Failed);
    match only_failure(&report).root_cause() {
        TaskError::Timeout { name, timeout } => {
            assert_eq!(name, "build-lock");
            assert_eq!(*timeout, Duration::from_secs(1));
        }
        other => panic!("expected a timeout, got {other:?}"),
    }
    // The loser gives up at the bound; fail-fast then cuts the winner's sleep short.
    assert!(elapsed >= Duration::from_secs(1), "gave up early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(4), "waited too long: {elapsed:?}");

    let probe = NamedLock::new(&b.lock_dir, "build-lock").unwrap();
    assert!(probe.try_acquire().unwrap().is_some());
}

#[test]
fn external_holder_excludes_build() {
    let b = build(
        r#"{
            "name": "external",
            "targets": [
                {"name": "build", "tasks": [
                    {"task": "mutex", "attributes": {"name": "deploy", "timeout": "300"}}
                ]}
            ]
        }"#,
        true,
    );
    let _held = NamedLock::new(&b.lock_dir, "deploy")
        .unwrap()
        .try_acquire()
        .unwrap()
        .unwrap();

    let report = b.runner.execute(&["build"]).unwrap();
    assert!(matches!(only_failure(&report), TaskError::Timeout { .. }));
    assert_eq!(count(&b.logger, "released lock 'deploy'"), 0);
}

#[test]
fn cancellation_while_waiting_is_not_a_timeout() {
    let b = build(
        r#"{
            "name": "cancel-waiting",
            "targets": [
                {"name": "build", "tasks": [
                    {"task": "mutex", "attributes": {"name": "busy", "timeout": "30000"}, "children": [
                        {"task": "echo", "attributes": {"message": "never"}}
                    ]}
                ]}
            ]
        }"#,
        true,
    );
    let _held = NamedLock::new(&b.lock_dir, "busy")
        .unwrap()
        .try_acquire()
        .unwrap()
        .unwrap();

    let cancel = b.runner.cancellation().clone();
    let start = Instant::now();
    let report = std::thread::scope(|s| {
        s.spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            cancel.cancel();
        });
        b.runner.execute(&["build"]).unwrap()
    });

    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(report.status, BuildStatus::Cancelled);
    let err = only_failure(&report);
    assert!(err.is_cancellation());
    assert!(!matches!(err.root_cause(), TaskError::Timeout { .. }));
    assert!(!b.logger.contains("never"));
}

#[test]
fn cancellation_while_holding_releases_first() {
    let b = build(
        r#"{
            "name": "cancel-holding",
            "targets": [
                {"name": "build", "tasks": [
                    {"task": "mutex", "attributes": {"name": "held", "timeout": "1000"}, "children": [
                        {"task": "sleep", "attributes": {"duration": "30000"}},
                        {"task": "echo", "attributes": {"message": "never"}}
                    ]}
                ]}
            ]
        }"#,
        true,
    );

    let cancel = b.runner.cancellation().clone();
    let report = std::thread::scope(|s| {
        s.spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            cancel.cancel();
        });
        b.runner.execute(&["build"]).unwrap()
    });

    assert_eq!(report.status, BuildStatus::Cancelled);
    assert!(only_failure(&report).is_cancellation());
    assert_eq!(count(&b.logger, "released lock 'held'"), 1);
    assert!(!b.logger.contains("never"));

    let probe = NamedLock::new(&b.lock_dir, "held").unwrap();
    assert!(probe.try_acquire().unwrap().is_some());
}

#[test]
fn forked_branches_inherit_enclosing_mutex() {
    let b = build(
        r#"{
            "name": "fork",
            "targets": [
                {"name": "build", "tasks": [
                    {"task": "mutex", "attributes": {"name": "outer", "timeout": "30000"}, "children": [
                        {"task": "parallel", "children": [
                            {"task": "mutex", "attributes": {"name": "OUTER", "timeout": "30000"}},
                            {"task": "mutex", "attributes": {"name": "branch-only", "timeout": "30000"}}
                        ]}
                    ]}
                ]}
            ]
        }"#,
        false,
    );

    let start = Instant::now();
    let report = b.runner.execute(&["build"]).unwrap();
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(matches!(
        only_failure(&report).root_cause(),
        TaskError::Deadlock { name, .. } if name == "OUTER"
    ));
    assert_eq!(count(&b.logger, "released lock 'branch-only'"), 1);
    assert_eq!(count(&b.logger, "released lock 'outer'"), 1);
}

#[test]
fn invalid_declarations_fail_before_execution() {
    let dir = TempDir::new().unwrap();
    let config = Arc::new(EngineConfig::default().with_lock_dir(dir.path()));
    let registry = default_registry(config, None).unwrap();

    for attributes in [r#"{"name": ""}"#, r#"{"name": "x", "timeout": "0"}"#, r#"{}"#] {
        let json = format!(
            r#"{{"name": "p", "targets": [{{"name": "t", "tasks": [{{"task": "mutex", "attributes": {attributes}}}]}}]}}"#
        );
        let definition = ProjectDefinition::from_json_str(&json).unwrap();
        let err = Project::from_definition(&definition, &registry).unwrap_err();
        assert!(matches!(err, TaskError::Configuration { .. }), "{attributes}: {err:?}");
    }
}
