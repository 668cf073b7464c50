//! Integration tests for the on-disk registry: concurrent writers, reopening,
//! and moving records between machines with export/import.

use std::sync::{Arc, Barrier};
use std::thread;

use chrono::Duration;
use sandbox_claude::naming::generate_identifier;
use sandbox_claude::registry::{
    now, ConfigMode, RecordFilter, Registry, RegistryError, SandboxRecord, SandboxStatus,
    DEFAULT_IMAGE,
};

fn record(identifier: &str, project: &str, container: &str) -> SandboxRecord {
    SandboxRecord::new(
        identifier,
        project,
        "feat",
        container,
        DEFAULT_IMAGE,
        ConfigMode::Mounted,
    )
}

#[test]
fn test_concurrent_writers_lose_nothing() {
    let temp = tempfile::tempdir().unwrap();
    let path = Arc::new(temp.path().join("sessions.db"));
    // Create the schema before the writers race.
    Registry::open(&path).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let path = Arc::clone(&path);
            thread::spawn(move || {
                let mut registry = Registry::open(&path).unwrap();
                for i in 0..10 {
                    let id = generate_identifier("proj", &format!("w{}", worker)).unwrap();
                    registry
                        .insert(&record(&id, "proj", &format!("c-{}-{}", worker, i)))
                        .unwrap();
                    registry
                        .update_status(&id, SandboxStatus::Running, now())
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let registry = Registry::open(&path).unwrap();
    let all = registry.all().unwrap();
    assert_eq!(all.len(), 40);
    assert!(all.iter().all(|r| r.status == SandboxStatus::Running));
    let running = registry.statistics().unwrap().count(SandboxStatus::Running);
    assert_eq!(running, 40);
}

#[test]
fn test_same_identifier_race_has_one_winner() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("sessions.db");
    Registry::open(&path).unwrap();

    for round in 0..5 {
        let id = format!("sb-race-{}", round);
        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|worker| {
                let path = path.clone();
                let id = id.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let mut registry = Registry::open(&path).unwrap();
                    let container = format!("c-{}-{}", round, worker);
                    barrier.wait();
                    registry.insert(&record(&id, "proj", &container))
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let duplicate = results
            .iter()
            .any(|r| matches!(r, Err(RegistryError::DuplicateIdentifier(dup)) if *dup == id));
        assert!(duplicate);
    }

    let registry = Registry::open(&path).unwrap();
    assert_eq!(registry.all().unwrap().len(), 5);
}

#[test]
fn test_records_survive_reopen() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("sessions.db");
    {
        let mut registry = Registry::open(&path).unwrap();
        registry.insert(&record("sb-a", "alpha", "c1")).unwrap();
        registry
            .update_status("sb-a", SandboxStatus::Stopped, now())
            .unwrap();
    }

    let registry = Registry::open(&path).unwrap();
    let found = registry.get("sb-a").unwrap().unwrap();
    assert_eq!(found.status, SandboxStatus::Stopped);
    assert_eq!(
        registry
            .find(&RecordFilter::default().project("alpha").active())
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn test_export_import_between_registries() {
    let temp = tempfile::tempdir().unwrap();
    let export = temp.path().join("registry.json");

    let mut laptop = Registry::open(&temp.path().join("laptop.db")).unwrap();
    laptop.insert(&record("sb-a", "alpha", "c1")).unwrap();
    laptop.insert(&record("sb-b", "beta", "c2")).unwrap();
    laptop
        .update_status("sb-b", SandboxStatus::Removed, now())
        .unwrap();
    assert_eq!(laptop.export(&export).unwrap(), 2);

    let mut desktop = Registry::open(&temp.path().join("desktop.db")).unwrap();
    desktop.insert(&record("sb-c", "gamma", "c3")).unwrap();
    let report = desktop.import(&export).unwrap();
    assert_eq!(report.inserted, 2);
    assert!(report.conflicts.is_empty());

    let all = desktop.all().unwrap();
    assert_eq!(all.len(), 3);
    assert!(desktop.get("sb-b").unwrap().unwrap().is_removed());

    // Importing the same file again changes nothing.
    let again = desktop.import(&export).unwrap();
    assert_eq!(again.inserted, 0);
    assert_eq!(again.updated, 0);
    assert_eq!(again.unchanged, 2);
}

#[test]
fn test_prune_keeps_recent_and_live_records() {
    let temp = tempfile::tempdir().unwrap();
    let mut registry = Registry::open(&temp.path().join("sessions.db")).unwrap();

    let mut old = record("sb-old", "alpha", "c1");
    old.created_at = now() - Duration::days(60);
    old.last_seen_at = old.created_at;
    registry.insert(&old).unwrap();
    registry
        .update_status("sb-old", SandboxStatus::Removed, old.last_seen_at)
        .unwrap();

    registry.insert(&record("sb-live", "alpha", "c2")).unwrap();
    registry
        .insert(&record("sb-recent", "alpha", "c3"))
        .unwrap();
    registry
        .update_status("sb-recent", SandboxStatus::Removed, now())
        .unwrap();

    let deleted = registry.prune(now() - Duration::days(30)).unwrap();
    assert_eq!(deleted, 1);
    assert!(registry.get("sb-old").unwrap().is_none());
    assert!(registry.get("sb-live").unwrap().is_some());
    assert!(registry.get("sb-recent").unwrap().is_some());
}
