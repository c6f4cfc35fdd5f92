//! End-to-end validation and recovery behaviour.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use govguard::config::GovernanceConfig;
use govguard::events::EventType;
use govguard::structure::{StaticStructure, StructureKind, StructureNode};
use govguard::validator::{
    FailureReason, PathValidator, StrategyKind, ValidateOptions, ValidationStatus,
};

fn reports_validator(root: &Path) -> PathValidator {
    PathValidator::builder(GovernanceConfig::new(root))
        .structure(&StaticStructure(vec![
            StructureNode::directory("reports", "reports"),
            StructureNode::directory("y2025", "reports/2025").with_parent("reports"),
            StructureNode::file("summary", "reports/2025/summary.md").with_parent("y2025"),
        ]))
        .unwrap()
        .build()
        .unwrap()
}

fn listing(dir: &Path) -> Vec<PathBuf> {
    let mut entries: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.path().to_path_buf())
        .collect();
    entries.sort();
    entries
}

#[tokio::test]
async fn traversal_is_rejected_without_side_effects() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("root");
    fs::create_dir(&root).unwrap();
    let validator = reports_validator(&root);
    let before = listing(tmp.path());

    for raw in ["../escape", "reports/../../escape", "../root2/x", "/etc/passwd"] {
        let outcome = validator.validate_path(raw, ValidateOptions::default()).await;
        assert_eq!(outcome.status, ValidationStatus::Failed, "{raw}");
        assert_eq!(outcome.reason, Some(FailureReason::PathSecurity), "{raw}");
        assert!(outcome.attempts.is_empty());
        assert!(outcome.into_result().unwrap_err().is_security_violation());
    }

    assert_eq!(listing(tmp.path()), before);
    let metrics = validator.metrics();
    assert_eq!(metrics.total_validations, 4);
    assert_eq!(metrics.failures, 4);
    assert!(metrics.success_rate.is_none());
}

#[cfg(unix)]
#[tokio::test]
async fn symlink_escape_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("root");
    let outside = tmp.path().join("outside");
    fs::create_dir(&root).unwrap();
    fs::create_dir(&outside).unwrap();
    std::os::unix::fs::symlink(&outside, root.join("link")).unwrap();

    let validator = PathValidator::new(GovernanceConfig::new(&root)).unwrap();
    let outcome = validator
        .validate_path("link/new.txt", ValidateOptions::default())
        .await;
    assert_eq!(outcome.reason, Some(FailureReason::PathSecurity));
    assert!(!outside.join("new.txt").exists());
}

#[cfg(unix)]
#[tokio::test]
async fn dangling_link_inside_root_is_healed_at_its_target() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("root");
    let outside = tmp.path().join("outside");
    fs::create_dir_all(root.join("releases")).unwrap();
    fs::create_dir(&outside).unwrap();
    std::os::unix::fs::symlink("releases/v2", root.join("current")).unwrap();
    std::os::unix::fs::symlink("../outside/new", root.join("escape")).unwrap();

    let validator = PathValidator::new(GovernanceConfig::new(&root)).unwrap();
    let outcome = validator
        .validate_path(
            "current",
            ValidateOptions::default().expecting(StructureKind::Directory),
        )
        .await;
    assert_eq!(outcome.status, ValidationStatus::Fallback);
    assert!(root.join("releases/v2").is_dir());
    assert!(root.join("current").is_dir());

    let outcome = validator
        .validate_path("escape", ValidateOptions::default())
        .await;
    assert_eq!(outcome.reason, Some(FailureReason::PathSecurity));
    assert!(!outside.join("new").exists());
}

#[tokio::test]
async fn declared_child_is_recovered_with_ordered_events() {
    let tmp = tempfile::tempdir().unwrap();
    fs::create_dir(tmp.path().join("reports")).unwrap();
    let validator = reports_validator(tmp.path());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _sub = validator
        .events()
        .subscribe_all(move |e| sink.lock().unwrap().push(e.kind));

    let outcome = validator
        .validate_path("reports/2025", ValidateOptions::default())
        .await;

    assert_eq!(outcome.status, ValidationStatus::Recovered);
    assert_eq!(outcome.attempts.len(), 1);
    assert_eq!(outcome.attempts[0].strategy, StrategyKind::InheritStructure);
    assert!(tmp.path().join("reports/2025").is_dir());
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            EventType::StructureMissing,
            EventType::DagNodeRebuilt,
            EventType::StructureRecovered
        ]
    );

    let metrics = validator.metrics();
    assert_eq!(metrics.recovery_success, 1);
    assert_eq!(metrics.dag_nodes_rebuilt, 1);
    assert_eq!(metrics.success_rate, Some(1.0));
}

#[tokio::test]
async fn deep_file_rebuilds_parents_first() {
    let tmp = tempfile::tempdir().unwrap();
    let validator = reports_validator(tmp.path());

    let rebuilt = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&rebuilt);
    let _sub = validator.subscribe(EventType::DagNodeRebuilt, move |e| {
        sink.lock().unwrap().push(e.path.clone())
    });

    let outcome = validator
        .validate_path("reports/2025/summary.md", ValidateOptions::default())
        .await;
    assert_eq!(outcome.status, ValidationStatus::Recovered);
    assert_eq!(outcome.attempts[0].strategy, StrategyKind::DagRebuild);
    assert!(tmp.path().join("reports/2025/summary.md").is_file());
    assert_eq!(
        *rebuilt.lock().unwrap(),
        vec!["reports", "reports/2025", "reports/2025/summary.md"]
    );
}

#[tokio::test]
async fn undeclared_path_without_dag_falls_back_to_placeholder() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = GovernanceConfig::new(tmp.path());
    config.dag_enabled = false;
    let validator = PathValidator::new(config).unwrap();

    let fallbacks = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fallbacks);
    let _sub = validator.subscribe(EventType::FallbackTriggered, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let outcome = validator
        .validate_path("build/manifest.json", ValidateOptions::default())
        .await;
    assert_eq!(outcome.status, ValidationStatus::Fallback);
    assert_eq!(outcome.attempts[0].strategy, StrategyKind::TransientFallback);
    assert_eq!(fallbacks.load(Ordering::SeqCst), 1);

    let placeholder = tmp.path().join("build/manifest.json");
    assert!(placeholder.is_file());
    assert_eq!(fs::read(&placeholder).unwrap(), b"");
    assert_eq!(validator.metrics().recovery_success, 1);
}

#[tokio::test]
async fn dag_disabled_declared_path_uses_fallback() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = GovernanceConfig::new(tmp.path());
    config.dag_enabled = false;
    let validator = PathValidator::builder(config)
        .structure(&StaticStructure(vec![StructureNode::directory(
            "reports", "reports",
        )]))
        .unwrap()
        .build()
        .unwrap();

    let outcome = validator
        .validate_path("reports", ValidateOptions::default())
        .await;
    assert_eq!(outcome.status, ValidationStatus::Fallback);
    assert!(tmp.path().join("reports").is_dir());
}

#[tokio::test]
async fn fallback_restores_snapshot_content() {
    let tmp = tempfile::tempdir().unwrap();
    fs::create_dir(tmp.path().join("docs")).unwrap();
    fs::write(tmp.path().join("docs/guide.md"), "# Guide\n").unwrap();
    let validator = PathValidator::new(GovernanceConfig::new(tmp.path())).unwrap();

    validator.create_snapshot().unwrap();
    fs::remove_file(tmp.path().join("docs/guide.md")).unwrap();

    let detail = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&detail);
    let _sub = validator.subscribe(EventType::FallbackTriggered, move |e| {
        *sink.lock().unwrap() = e.detail.clone();
    });

    let outcome = validator
        .validate_path("docs/guide.md", ValidateOptions::default())
        .await;
    assert_eq!(outcome.status, ValidationStatus::Fallback);
    assert_eq!(
        fs::read_to_string(tmp.path().join("docs/guide.md")).unwrap(),
        "# Guide\n"
    );
    assert!(
        detail
            .lock()
            .unwrap()
            .as_deref()
            .is_some_and(|d| d.starts_with("restored file from snapshot"))
    );
}

#[tokio::test]
async fn snapshot_history_survives_restart() {
    let tmp = tempfile::tempdir().unwrap();
    let storage = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("VERSION"), "1.4.2\n").unwrap();

    {
        let validator = PathValidator::builder(GovernanceConfig::new(tmp.path()))
            .storage_dir(storage.path())
            .build()
            .unwrap();
        validator.create_snapshot().unwrap();
        validator.create_snapshot().unwrap();
    }
    fs::remove_file(tmp.path().join("VERSION")).unwrap();

    let validator = PathValidator::builder(GovernanceConfig::new(tmp.path()))
        .storage_dir(storage.path())
        .build()
        .unwrap();
    assert_eq!(validator.snapshot_manager().snapshots().len(), 2);

    let log = validator.snapshot_manager().log().unwrap();
    assert!(log.verify_chain().unwrap().is_empty());

    let outcome = validator
        .validate_path(
            "VERSION",
            ValidateOptions::default().expecting(StructureKind::File),
        )
        .await;
    assert_eq!(outcome.status, ValidationStatus::Fallback);
    assert_eq!(fs::read_to_string(tmp.path().join("VERSION")).unwrap(), "1.4.2\n");
}

#[tokio::test]
async fn deleted_between_attempts_exhausts_recovery() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = GovernanceConfig::new(tmp.path());
    config.max_recovery_attempts = 2;
    config.dag_enabled = false;
    let validator = PathValidator::new(config).unwrap();

    // Plays the concurrent process that removes the path right after each
    // restore.
    let root = validator.root().to_path_buf();
    let _sub = validator.subscribe(EventType::FallbackTriggered, move |e| {
        let _ = fs::remove_file(root.join(&e.path));
    });

    let outcome = validator
        .validate_path("out/result.txt", ValidateOptions::default())
        .await;
    assert_eq!(outcome.status, ValidationStatus::Failed);
    assert_eq!(outcome.reason, Some(FailureReason::RecoveryExhausted));
    assert_eq!(outcome.attempts.len(), 2);
    assert_eq!(outcome.attempts[0].attempt_number, 1);
    assert_eq!(outcome.attempts[1].attempt_number, 2);

    let metrics = validator.metrics();
    assert_eq!(metrics.recovery_failure, 1);
    assert_eq!(metrics.success_rate, Some(0.0));
}

#[tokio::test]
async fn attempts_never_exceed_the_bound() {
    let tmp = tempfile::tempdir().unwrap();
    // A file squatting on a declared directory can never be healed.
    fs::create_dir(tmp.path().join("reports")).unwrap();
    fs::write(tmp.path().join("reports/2025"), "not a directory").unwrap();

    for max in 1..=4 {
        let mut config = GovernanceConfig::new(tmp.path());
        config.max_recovery_attempts = max;
        let validator = PathValidator::builder(config)
            .structure(&StaticStructure(vec![
                StructureNode::directory("reports", "reports"),
                StructureNode::directory("y2025", "reports/2025").with_parent("reports"),
            ]))
            .unwrap()
            .build()
            .unwrap();

        let outcome = validator
            .validate_path("reports/2025", ValidateOptions::default())
            .await;
        assert_eq!(outcome.status, ValidationStatus::Failed);
        assert_eq!(outcome.attempts.len(), max as usize);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_create_the_node_once() {
    let tmp = tempfile::tempdir().unwrap();
    fs::create_dir(tmp.path().join("reports")).unwrap();
    let validator = Arc::new(reports_validator(tmp.path()));

    let rebuilt = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&rebuilt);
    let _sub = validator.subscribe(EventType::DagNodeRebuilt, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let validator = Arc::clone(&validator);
            tokio::spawn(async move {
                validator
                    .validate_path("reports/2025", ValidateOptions::default())
                    .await
            })
        })
        .collect();

    let mut recovered = 0;
    for handle in handles {
        let outcome = handle.await.unwrap();
        assert!(outcome.is_success());
        if outcome.status == ValidationStatus::Recovered {
            recovered += 1;
        } else {
            assert_eq!(outcome.status, ValidationStatus::Valid);
        }
    }

    assert_eq!(recovered, 1);
    assert_eq!(rebuilt.load(Ordering::SeqCst), 1);
    assert!(tmp.path().join("reports/2025").is_dir());
}

#[tokio::test]
async fn success_rate_stays_in_range() {
    let tmp = tempfile::tempdir().unwrap();
    fs::create_dir(tmp.path().join("reports")).unwrap();
    fs::write(tmp.path().join("blocked"), "x").unwrap();
    let validator = reports_validator(tmp.path());

    validator
        .validate_path("reports/2025", ValidateOptions::default())
        .await;
    validator
        .validate_path(
            "blocked",
            ValidateOptions::default().expecting(StructureKind::Directory),
        )
        .await;
    validator
        .validate_path("../nope", ValidateOptions::default())
        .await;

    let metrics = validator.metrics();
    assert_eq!(metrics.total_validations, 3);
    assert_eq!(metrics.failures, 2);
    assert_eq!(metrics.recovery_success, 1);
    assert_eq!(metrics.recovery_failure, 1);
    let rate = metrics.success_rate.unwrap();
    assert!((0.0..=1.0).contains(&rate));
    assert!((rate - 0.5).abs() < f64::EPSILON);
}

#[tokio::test]
async fn panicking_subscriber_does_not_abort_validation() {
    let tmp = tempfile::tempdir().unwrap();
    let validator = PathValidator::new(GovernanceConfig::new(tmp.path())).unwrap();
    let _sub = validator.subscribe(EventType::StructureMissing, |_| panic!("subscriber bug"));

    let outcome = validator
        .validate_path("cache", ValidateOptions::default())
        .await;
    assert!(outcome.is_success());
    assert!(tmp.path().join("cache").is_dir());
}

#[tokio::test]
async fn unsubscribed_handler_stops_receiving() {
    let tmp = tempfile::tempdir().unwrap();
    let validator = PathValidator::new(GovernanceConfig::new(tmp.path())).unwrap();

    let count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&count);
    let sub = validator.subscribe(EventType::StructureMissing, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    validator.validate_path("a", ValidateOptions::default()).await;
    assert!(sub.unsubscribe());
    validator.validate_path("b", ValidateOptions::default()).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn structure_rules_file_from_config() {
    let tmp = tempfile::tempdir().unwrap();
    fs::create_dir(tmp.path().join("governance")).unwrap();
    fs::write(
        tmp.path().join("governance/structure.toml"),
        r#"
[[nodes]]
id = "policies"
path = "policies"
kind = "directory"

[[nodes]]
id = "readme"
path = "policies/README.md"
kind = "file"
parent_id = "policies"
"#,
    )
    .unwrap();

    let mut config = GovernanceConfig::new(tmp.path());
    config.structure_file = Some(PathBuf::from("governance/structure.toml"));
    let validator = PathValidator::new(config).unwrap();
    assert_eq!(validator.graph().len(), 2);

    let outcomes = validator.validate_declared().await;
    assert!(outcomes.iter().all(|o| o.is_success()));
    assert!(tmp.path().join("policies/README.md").is_file());
}
