//! Tests for the guarantees the schema enforces on its own, independent of
//! the engine code paths.

use rusqlite::params;
use task_assign::db::Database;
use task_assign::types::{AssignInput, AssignMode, AssignmentReason, TaskStatus};

/// Helper to create a fresh in-memory database for testing.
fn setup_db() -> Database {
    Database::open_in_memory().expect("Failed to create in-memory database")
}

fn seeded_db() -> Database {
    let db = setup_db();
    db.create_task(Some("t-1".to_string()), "Guarded", TaskStatus::ToDo)
        .unwrap();
    db.register_agent(Some("agent-a".to_string()), None, None, "active")
        .unwrap();
    db
}

fn insert_active(db: &Database, id: &str) -> rusqlite::Result<usize> {
    db.with_conn(|conn| {
        Ok(conn.execute(
            "INSERT INTO task_assignments (id, task_id, agent_id, active, assigned_at, reason, source_type)
             VALUES (?1, 't-1', 'agent-a', 1, 0, 'MANUAL_OVERRIDE', 'API')",
            params![id],
        ))
    })
    .unwrap()
}

#[test]
fn second_active_assignment_is_rejected_by_index() {
    let db = seeded_db();

    insert_active(&db, "as-1").expect("first active row");
    let second = insert_active(&db, "as-2");

    assert!(second.is_err(), "partial unique index must reject a second active row");
}

#[test]
fn closed_rows_do_not_count_against_the_index() {
    let db = seeded_db();
    insert_active(&db, "as-1").unwrap();

    db.with_conn(|conn| {
        conn.execute(
            "UPDATE task_assignments SET active = 0, unassigned_at = 1 WHERE id = 'as-1'",
            [],
        )?;
        Ok(())
    })
    .unwrap();

    insert_active(&db, "as-2").expect("a new active row after closing the old one");
}

#[test]
fn assignments_cannot_be_deleted() {
    let db = seeded_db();
    insert_active(&db, "as-1").unwrap();

    let result = db.with_conn(|conn| {
        Ok(conn.execute("DELETE FROM task_assignments WHERE id = 'as-1'", []))
    });
    assert!(result.unwrap().is_err());
}

#[test]
fn events_are_write_once() {
    let db = seeded_db();
    let input = AssignInput {
        agent_id: "agent-a".to_string(),
        reason: AssignmentReason::Retry,
        mode: AssignMode::Replace,
        expected_version: None,
        source: None,
        override_capacity: false,
    };
    db.assign_task("t-1", &input).unwrap();

    let (update, delete) = db
        .with_conn(|conn| {
            let update = conn.execute("UPDATE task_assignment_events SET payload = '{}'", []);
            let delete = conn.execute("DELETE FROM task_assignment_events", []);
            Ok((update, delete))
        })
        .unwrap();

    assert!(update.is_err());
    assert!(delete.is_err());
    assert_eq!(db.count_assignment_events("t-1").unwrap(), 1);
}

#[test]
fn version_cannot_go_negative() {
    let db = seeded_db();
    let result = db
        .with_conn(|conn| Ok(conn.execute("UPDATE tasks SET version = -1 WHERE id = 't-1'", [])))
        .unwrap();
    assert!(result.is_err());
}

#[test]
fn on_disk_database_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("assign.db");

    {
        let db = Database::open(&path).unwrap();
        db.create_task(Some("t-1".to_string()), "Persisted", TaskStatus::ToDo)
            .unwrap();
    }

    let db = Database::open(&path).unwrap();
    let task = db.get_task("t-1").unwrap().unwrap();
    assert_eq!(task.title, "Persisted");
    assert_eq!(task.version, 0);
}
