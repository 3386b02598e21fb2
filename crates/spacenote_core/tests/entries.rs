use spacenote_core::{
    EntryUpdate, ErrorKind, NewEntry, NoteKind, NoteVariant, Space, SpaceError, SpaceManager,
    ValidationError,
};
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

const DOC: &str = r#"{"type":"doc","content":[{"type":"paragraph","content":[{"type":"text","text":"entry"}]}]}"#;

fn open_space() -> (TempDir, SpaceManager, Arc<Space>) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("journal");
    let manager = SpaceManager::with_defaults();
    manager.create(&path).unwrap();
    let space = manager.open(&path).unwrap();
    (dir, manager, space)
}

fn log_at(started_at: i64, ended_at: Option<i64>) -> NewEntry {
    NewEntry {
        started_at: Some(started_at),
        ended_at,
        ..NewEntry::log(DOC)
    }
}

#[test]
fn end_time_must_follow_start_time() {
    let (_dir, _manager, space) = open_space();

    for ended_at in [1_000, 999, 0] {
        let err = space.create_entry(&log_at(1_000, Some(ended_at))).unwrap_err();
        assert!(
            matches!(
                err,
                SpaceError::Validation(ValidationError::EndNotAfterStart { .. })
            ),
            "ended_at={ended_at}: {err}"
        );
    }

    let note = space.create_entry(&log_at(1_000, Some(1_001))).unwrap();
    assert_eq!(
        note.variant,
        NoteVariant::Log {
            started_at: 1_000,
            ended_at: Some(1_001)
        }
    );
    assert_eq!(space.get_entry(note.id).unwrap(), note);
}

#[test]
fn started_at_defaults_to_now() {
    let (_dir, _manager, space) = open_space();
    let before = spacenote_core::model::now_epoch_ms();
    let note = space.create_entry(&NewEntry::log(DOC)).unwrap();
    let started_at = note.started_at().unwrap();
    assert!(started_at >= before);
    assert_eq!(note.content_text.as_deref(), Some("entry"));
}

#[test]
fn entries_with_parent_never_carry_end_time() {
    let (_dir, _manager, space) = open_space();
    let parent = space.create_entry(&log_at(1_000, None)).unwrap();

    for started_at in [Some(0), Some(5_000), None] {
        let err = space
            .create_entry(&NewEntry {
                parent_id: Some(parent.id),
                started_at,
                ended_at: Some(10_000),
                ..NewEntry::log(DOC)
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    let comment = space
        .create_entry(&NewEntry {
            parent_id: Some(parent.id),
            started_at: Some(2_000),
            ..NewEntry::log(DOC)
        })
        .unwrap();
    assert_eq!(comment.kind(), NoteKind::Comment);
    assert_eq!(comment.parent_id(), Some(parent.id));

    let err = space
        .update_entry(
            comment.id,
            &EntryUpdate {
                content_json: DOC.to_string(),
                started_at: None,
                ended_at: Some(Some(9_000)),
            },
        )
        .unwrap_err();
    assert!(matches!(
        err,
        SpaceError::Validation(ValidationError::CommentWithEndTime)
    ));
}

#[test]
fn comment_on_unknown_parent_is_not_found() {
    let (_dir, _manager, space) = open_space();
    let err = space
        .create_entry(&NewEntry {
            parent_id: Some(Uuid::new_v4()),
            ..NewEntry::log(DOC)
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn top_level_pagination_returns_oldest_on_last_page() {
    let (_dir, _manager, space) = open_space();
    let mut ids_by_start = Vec::new();
    for index in 0..25_i64 {
        let note = space.create_entry(&log_at(index * 1_000, None)).unwrap();
        ids_by_start.push(note.id);
    }
    space
        .create_entry(&NewEntry {
            parent_id: Some(ids_by_start[0]),
            started_at: Some(999_999),
            ..NewEntry::log(DOC)
        })
        .unwrap();
    space.create_page("Not an entry", DOC).unwrap();

    let first = space.list_top_level_entries(0, 20).unwrap();
    assert_eq!(first.len(), 20);
    assert_eq!(first[0].started_at(), Some(24_000));

    let last = space.list_top_level_entries(20, 20).unwrap();
    let starts: Vec<_> = last.iter().filter_map(|note| note.started_at()).collect();
    assert_eq!(starts, vec![4_000, 3_000, 2_000, 1_000, 0]);
    assert!(last.iter().all(|note| note.parent_id().is_none()));

    assert_eq!(space.list_top_level_entries(0, 0).unwrap().len(), 20);
    assert_eq!(space.list_top_level_entries(0, 1_000).unwrap().len(), 25);
}

#[test]
fn children_are_listed_in_creation_order() {
    let (_dir, _manager, space) = open_space();
    let parent = space.create_entry(&log_at(1_000, None)).unwrap();
    let mut created = Vec::new();
    for started_at in [9_000, 3_000, 6_000] {
        let comment = space
            .create_entry(&NewEntry {
                parent_id: Some(parent.id),
                started_at: Some(started_at),
                ..NewEntry::log(DOC)
            })
            .unwrap();
        created.push(comment.id);
    }

    let children = space.list_child_entries(parent.id, 0, 20).unwrap();
    let ids: Vec<_> = children.iter().map(|note| note.id).collect();
    assert_eq!(ids, created);

    let err = space
        .list_child_entries(Uuid::new_v4(), 0, 20)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn update_revalidates_against_persisted_start() {
    let (_dir, _manager, space) = open_space();
    let note = space.create_entry(&log_at(5_000, None)).unwrap();

    let err = space
        .update_entry(
            note.id,
            &EntryUpdate {
                content_json: DOC.to_string(),
                started_at: None,
                ended_at: Some(Some(4_000)),
            },
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let updated = space
        .update_entry(
            note.id,
            &EntryUpdate {
                content_json: r#"{"type":"doc","content":[{"type":"text","text":"edited"}]}"#
                    .to_string(),
                started_at: Some(3_000),
                ended_at: Some(Some(4_000)),
            },
        )
        .unwrap();
    assert_eq!(updated.started_at(), Some(3_000));
    assert_eq!(updated.ended_at(), Some(4_000));
    assert_eq!(updated.content_text.as_deref(), Some("edited"));
    assert!(updated.updated_at >= note.updated_at);

    let kept = space
        .update_entry(
            note.id,
            &EntryUpdate {
                content_json: DOC.to_string(),
                started_at: None,
                ended_at: None,
            },
        )
        .unwrap();
    assert_eq!(kept.ended_at(), Some(4_000));
}

#[test]
fn update_and_delete_of_unknown_entry_are_not_found() {
    let (_dir, _manager, space) = open_space();
    let missing = Uuid::new_v4();
    let update = EntryUpdate {
        content_json: DOC.to_string(),
        started_at: None,
        ended_at: None,
    };
    assert_eq!(
        space.update_entry(missing, &update).unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(
        space.delete_entry(missing).unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[test]
fn blank_or_malformed_content_is_rejected_before_write() {
    let (_dir, _manager, space) = open_space();
    for content in ["", "   ", "{broken"] {
        let err = space.create_entry(&NewEntry::log(content)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
    assert!(space.list_top_level_entries(0, 20).unwrap().is_empty());
}
