use rusqlite::Connection;
use spacenote_core::db::migrations::builtin_migrations;
use spacenote_core::{
    DbError, DocumentTextExtractor, ErrorKind, Migration, Migrator, NewEntry, SpaceError,
    SpaceManager, STORE_FILE_NAME,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};

const DOC: &str = r#"{"type":"doc","content":[]}"#;

fn manager_with(deltas: Vec<Migration>) -> SpaceManager {
    SpaceManager::new(
        Migrator::new(deltas).unwrap(),
        Arc::new(DocumentTextExtractor),
    )
}

fn builtin_up_to(last_id: u32) -> Vec<Migration> {
    builtin_migrations()
        .into_iter()
        .filter(|migration| migration.id <= last_id)
        .collect()
}

fn applied_ids(path: &Path) -> Vec<u32> {
    let conn = Connection::open(path.join(STORE_FILE_NAME)).unwrap();
    let mut stmt = conn
        .prepare("SELECT id FROM migrations ORDER BY id;")
        .unwrap();
    let ids = stmt
        .query_map([], |row| row.get::<_, u32>(0))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    ids
}

fn table_exists(path: &Path, table: &str) -> bool {
    let conn = Connection::open(path.join(STORE_FILE_NAME)).unwrap();
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1);",
        [table],
        |row| row.get::<_, i64>(0),
    )
    .unwrap()
        == 1
}

#[test]
fn create_migrates_releases_and_rejects_existing_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("space");
    let manager = SpaceManager::with_defaults();

    let report = manager.create(&path).unwrap();
    assert_eq!(report.applied, vec![1, 2, 3, 4, 5]);
    assert!(path.join(STORE_FILE_NAME).is_file());
    assert!(!manager.is_open(&path));

    let err = manager.create(&path).unwrap_err();
    assert!(matches!(err, SpaceError::AlreadyExists(_)));
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
}

#[test]
fn open_of_missing_path_is_not_found_and_not_registered() {
    let dir = tempfile::tempdir().unwrap();
    let manager = SpaceManager::with_defaults();

    let err = manager.open(dir.path().join("missing")).unwrap_err();
    assert!(matches!(err, SpaceError::SpaceNotFound(_)));
    assert!(manager.open_paths().is_empty());

    let err = manager.open(dir.path()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound, "directory without store");
    assert!(!dir.path().join(STORE_FILE_NAME).exists());

    let file = dir.path().join("plain-file");
    std::fs::write(&file, b"not a space").unwrap();
    let err = manager.open(&file).unwrap_err();
    assert!(matches!(err, SpaceError::SpaceNotFound(_)));
}

#[test]
fn operations_on_unopened_or_closed_space_are_not_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("space");
    let manager = SpaceManager::with_defaults();
    manager.create(&path).unwrap();

    let err = manager
        .create_entry(&path, &NewEntry::log(DOC))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotOpen);
    assert_eq!(
        manager.get_setting(&path, "theme").unwrap_err().kind(),
        ErrorKind::NotOpen
    );

    let space = manager.open(&path).unwrap();
    manager.create_entry(&path, &NewEntry::log(DOC)).unwrap();
    assert_eq!(
        manager.open_paths(),
        vec![std::fs::canonicalize(&path).unwrap()]
    );

    manager.close(&path).unwrap();
    assert!(!manager.is_open(&path));
    assert!(!space.is_open());
    assert_eq!(
        space.list_top_level_entries(0, 20).unwrap_err().kind(),
        ErrorKind::NotOpen
    );
    assert_eq!(manager.close(&path).unwrap_err().kind(), ErrorKind::NotOpen);

    let reopened = manager.open(&path).unwrap();
    assert!(!Arc::ptr_eq(&space, &reopened));
    assert_eq!(reopened.list_top_level_entries(0, 20).unwrap().len(), 1);
}

#[test]
fn reopening_an_open_path_returns_the_same_handle() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("space");
    let manager = SpaceManager::with_defaults();
    manager.create(&path).unwrap();

    let first = manager.open(&path).unwrap();
    let second = manager.open(dir.path().join(".").join("space")).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn concurrent_opens_share_one_connection_and_one_migration_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("space");
    SpaceManager::with_defaults().create(&path).unwrap();

    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let mut deltas = builtin_migrations();
    deltas.push(Migration::new(
        6,
        "count_runs",
        move |tx, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            tx.execute_batch("CREATE TABLE run_probe (id INTEGER PRIMARY KEY);")?;
            Ok(())
        },
        |tx, _| {
            tx.execute_batch("DROP TABLE run_probe;")?;
            Ok(())
        },
    ));
    let manager = manager_with(deltas);

    const OPENERS: usize = 8;
    let barrier = Barrier::new(OPENERS);
    let handles = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..OPENERS)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    manager.open(&path).unwrap()
                })
            })
            .collect();
        workers
            .into_iter()
            .map(|worker| worker.join().unwrap())
            .collect::<Vec<_>>()
    });

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(handles
        .iter()
        .all(|handle| Arc::ptr_eq(handle, &handles[0])));
    assert_eq!(manager.open_paths().len(), 1);
}

#[test]
fn failed_delta_keeps_earlier_deltas_and_resumes_on_next_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("space");
    manager_with(builtin_up_to(1)).create(&path).unwrap();
    assert_eq!(applied_ids(&path), vec![1]);

    let mut broken = builtin_up_to(2);
    broken.push(Migration::new(
        3,
        "create_note_references",
        |tx, _| {
            tx.execute_batch("CREATE TABLE half_done (id INTEGER PRIMARY KEY);")?;
            Err(DbError::Transform("injected failure".to_string()))
        },
        |_, _| Ok(()),
    ));
    let failing = manager_with(broken);

    let err = failing.open(&path).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Migration);
    assert!(err.to_string().contains("injected failure"));
    match &err {
        SpaceError::Migration(DbError::Migration { id, .. }) => assert_eq!(*id, 3),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!failing.is_open(&path));
    assert!(failing.open_paths().is_empty());
    assert_eq!(applied_ids(&path), vec![1, 2]);
    assert!(!table_exists(&path, "half_done"));

    let healthy = SpaceManager::with_defaults();
    let mut progress = Vec::new();
    let space = healthy
        .open_with_progress(&path, &mut |step| progress.push((step.current, step.total, step.id)))
        .unwrap();
    assert_eq!(progress, vec![(1, 3, 3), (2, 3, 4), (3, 3, 5)]);
    assert_eq!(applied_ids(&path), vec![1, 2, 3, 4, 5]);
    space.create_entry(&NewEntry::log(DOC)).unwrap();
}

#[test]
fn failed_create_removes_the_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("space");
    let mut deltas = builtin_up_to(1);
    deltas.push(Migration::new(
        2,
        "explode",
        |_, _| Err(DbError::Transform("boom".to_string())),
        |_, _| Ok(()),
    ));

    let err = manager_with(deltas).create(&path).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Migration);
    assert!(!path.exists());
}

#[test]
fn store_written_by_newer_version_refuses_to_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("space");
    SpaceManager::with_defaults().create(&path).unwrap();

    let older = manager_with(builtin_up_to(4));
    let err = older.open(&path).unwrap_err();
    assert!(matches!(
        err,
        SpaceError::Migration(DbError::UnknownAppliedMigration { id: 5, .. })
    ));
    assert!(older.open_paths().is_empty());
}

#[test]
fn migration_status_reports_every_known_delta() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("space");
    let manager = SpaceManager::with_defaults();
    manager.create(&path).unwrap();
    manager.open(&path).unwrap();

    let status = manager.migration_status(&path).unwrap();
    let names: Vec<_> = status.iter().map(|entry| entry.name).collect();
    assert_eq!(
        names,
        vec![
            "create_notes_and_settings",
            "add_note_content_text",
            "create_note_references",
            "rebuild_note_parent_cascade",
            "archive_and_remove_contacts",
        ]
    );
    assert!(status.iter().all(|entry| entry.applied_at.is_some()));
}

#[test]
fn inspecting_a_closed_space_reports_pending_deltas_without_applying_them() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("space");
    manager_with(builtin_up_to(3)).create(&path).unwrap();

    let manager = SpaceManager::with_defaults();
    let status = manager.inspect_migrations(&path).unwrap();
    let pending: Vec<u32> = status
        .iter()
        .filter(|entry| entry.applied_at.is_none())
        .map(|entry| entry.id)
        .collect();
    assert_eq!(pending, vec![4, 5]);
    assert_eq!(applied_ids(&path), vec![1, 2, 3]);
    assert!(!manager.is_open(&path));

    manager.open(&path).unwrap();
    let status = manager.inspect_migrations(&path).unwrap();
    assert!(status.iter().all(|entry| entry.applied_at.is_some()));

    let err = manager
        .inspect_migrations(dir.path().join("missing"))
        .unwrap_err();
    assert!(matches!(err, SpaceError::SpaceNotFound(_)));
}
