//! Backup creation and retention tests.

use std::path::Path;
use std::time::{Duration, SystemTime};

use chrono::{Local, NaiveDateTime, Timelike, Utc};
use netsecure_updater::updater::{BackupKind, BackupManager};

fn age(path: &Path, secs_ago: u64) {
    std::fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::now() - Duration::from_secs(secs_ago))
        .unwrap();
}

fn seed(dir: &Path, names_oldest_first: &[&str]) {
    std::fs::create_dir_all(dir).unwrap();
    let n = names_oldest_first.len() as u64;
    for (i, name) in names_oldest_first.iter().enumerate() {
        let path = dir.join(name);
        std::fs::write(&path, name.as_bytes()).unwrap();
        age(&path, (n - i as u64) * 600);
    }
}

#[test]
fn test_backup_adds_exactly_one_entry() {
    let dir = tempfile::tempdir().unwrap();
    let model = dir.path().join("wifi_model.pkl");
    std::fs::write(&model, b"weights").unwrap();
    let manager = BackupManager::new(dir.path().join("backups"), &model);

    let before = Utc::now() - chrono::Duration::seconds(1);
    assert!(manager.backup(&model));
    let list = manager.list().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].kind, BackupKind::Update);
    assert!(list[0].modified >= before);
    assert_eq!(std::fs::read(&list[0].path).unwrap(), b"weights");
}

#[test]
fn test_backup_of_missing_artifact_returns_false() {
    let dir = tempfile::tempdir().unwrap();
    let model = dir.path().join("wifi_model.pkl");
    let manager = BackupManager::new(dir.path().join("backups"), &model);
    assert!(!manager.backup(&model));
    assert!(manager.list().unwrap().is_empty());
}

#[test]
fn test_cleanup_keeps_most_recent() {
    let dir = tempfile::tempdir().unwrap();
    let backups = dir.path().join("backups");
    seed(
        &backups,
        &[
            "model_backup_20240101_000000.pkl",
            "pre_rollback_20240102_000000.pkl",
            "model_backup_20240103_000000.pkl",
            "model_backup_20240104_000000.pkl",
            "model_backup_20240105_000000.pkl",
        ],
    );
    let manager = BackupManager::new(&backups, &dir.path().join("wifi_model.pkl"));

    let removed = manager.cleanup(3).unwrap();
    let removed: Vec<_> = removed.into_iter().map(|b| b.file_name).collect();
    assert_eq!(
        removed,
        vec![
            "pre_rollback_20240102_000000.pkl".to_string(),
            "model_backup_20240101_000000.pkl".to_string(),
        ]
    );

    let kept: Vec<_> = manager.list().unwrap().into_iter().map(|b| b.file_name).collect();
    assert_eq!(
        kept,
        vec![
            "model_backup_20240105_000000.pkl".to_string(),
            "model_backup_20240104_000000.pkl".to_string(),
            "model_backup_20240103_000000.pkl".to_string(),
        ]
    );
}

#[test]
fn test_cleanup_is_idempotent_and_noop_under_cap() {
    let dir = tempfile::tempdir().unwrap();
    let backups = dir.path().join("backups");
    let manager = BackupManager::new(&backups, &dir.path().join("wifi_model.pkl"));
    assert!(manager.cleanup(5).unwrap().is_empty());

    seed(
        &backups,
        &["model_backup_20240101_000000.pkl", "model_backup_20240102_000000.pkl"],
    );
    assert!(manager.cleanup(5).unwrap().is_empty());
    assert_eq!(manager.cleanup(1).unwrap().len(), 1);
    assert!(manager.cleanup(1).unwrap().is_empty());
    assert_eq!(manager.list().unwrap().len(), 1);
}

#[test]
fn test_mtime_ties_broken_by_name() {
    let dir = tempfile::tempdir().unwrap();
    let backups = dir.path().join("backups");
    std::fs::create_dir_all(&backups).unwrap();
    let stamp = SystemTime::now() - Duration::from_secs(60);
    for name in ["model_backup_a.pkl", "model_backup_b.pkl"] {
        let path = backups.join(name);
        std::fs::write(&path, b"x").unwrap();
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(stamp)
            .unwrap();
    }
    let manager = BackupManager::new(&backups, &dir.path().join("wifi_model.pkl"));
    let list = manager.list().unwrap();
    assert_eq!(list[0].file_name, "model_backup_b.pkl");
    assert_eq!(list[1].file_name, "model_backup_a.pkl");
}

#[test]
fn test_same_second_counter_orders_numerically() {
    let dir = tempfile::tempdir().unwrap();
    let backups = dir.path().join("backups");
    std::fs::create_dir_all(&backups).unwrap();
    let stamp = SystemTime::now() - Duration::from_secs(60);
    for name in [
        "model_backup_20260101_120000.pkl",
        "model_backup_20260101_120000_9.pkl",
        "model_backup_20260101_120000_10.pkl",
    ] {
        let path = backups.join(name);
        std::fs::write(&path, b"x").unwrap();
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(stamp)
            .unwrap();
    }
    let manager = BackupManager::new(&backups, &dir.path().join("wifi_model.pkl"));

    let names: Vec<_> = manager.list().unwrap().into_iter().map(|b| b.file_name).collect();
    assert_eq!(
        names,
        vec![
            "model_backup_20260101_120000_10.pkl".to_string(),
            "model_backup_20260101_120000_9.pkl".to_string(),
            "model_backup_20260101_120000.pkl".to_string(),
        ]
    );
    let latest = manager.latest(BackupKind::Update).unwrap().unwrap();
    assert_eq!(latest.file_name, "model_backup_20260101_120000_10.pkl");
}

#[test]
fn test_backup_name_carries_creation_time() {
    let dir = tempfile::tempdir().unwrap();
    let model = dir.path().join("wifi_model.pkl");
    std::fs::write(&model, b"weights").unwrap();
    let manager = BackupManager::new(dir.path().join("backups"), &model);

    let called_at = Local::now().naive_local().with_nanosecond(0).unwrap();
    let info = manager.create(&model, BackupKind::Update).unwrap();
    let stem = info.file_name.strip_prefix("model_backup_").unwrap();
    let stamped = NaiveDateTime::parse_from_str(&stem[..15], "%Y%m%d_%H%M%S").unwrap();
    assert!(stamped >= called_at, "{} is older than {}", stamped, called_at);
    assert!(stamped <= Local::now().naive_local());
}

#[test]
fn test_cleanup_keeps_newest_update_backup() {
    let dir = tempfile::tempdir().unwrap();
    let backups = dir.path().join("backups");
    seed(
        &backups,
        &[
            "model_backup_20240101_000000.pkl",
            "model_backup_20240102_000000.pkl",
            "pre_rollback_20240103_000000.pkl",
            "pre_rollback_20240104_000000.pkl",
            "pre_rollback_20240105_000000.pkl",
        ],
    );
    let manager = BackupManager::new(&backups, &dir.path().join("wifi_model.pkl"));

    manager.cleanup(2).unwrap();
    let kept: Vec<_> = manager.list().unwrap().into_iter().map(|b| b.file_name).collect();
    assert_eq!(
        kept,
        vec![
            "pre_rollback_20240105_000000.pkl".to_string(),
            "model_backup_20240102_000000.pkl".to_string(),
        ]
    );

    // Already within the cap, and the update backup stays put.
    assert!(manager.cleanup(2).unwrap().is_empty());
    manager.cleanup(1).unwrap();
    let kept: Vec<_> = manager.list().unwrap().into_iter().map(|b| b.file_name).collect();
    assert_eq!(kept, vec!["model_backup_20240102_000000.pkl".to_string()]);
}
