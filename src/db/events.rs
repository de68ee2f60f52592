//! Append-only assignment event log.

use crate::db::{Database, now_ms};
use crate::types::{AssignmentEventType, TaskAssignmentEvent};
use anyhow::Result;
use rusqlite::{Connection, params};
use serde_json::Value;

/// Append an event inside the caller's transaction. Returns the event id.
pub(crate) fn append_event(
    conn: &Connection,
    task_id: &str,
    assignment_id: &str,
    event_type: AssignmentEventType,
    payload: &Value,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO task_assignment_events (task_id, assignment_id, event_type, payload, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            task_id,
            assignment_id,
            event_type.as_str(),
            serde_json::to_string(payload)?,
            now_ms()
        ],
    )?;

    tracing::debug!(
        task_id = %task_id,
        assignment_id = %assignment_id,
        event_type = event_type.as_str(),
        "Appended assignment event"
    );

    Ok(conn.last_insert_rowid())
}

impl Database {
    /// Get the event history for a task, oldest first.
    pub fn list_assignment_events(&self, task_id: &str) -> Result<Vec<TaskAssignmentEvent>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, task_id, assignment_id, event_type, payload, created_at
                 FROM task_assignment_events
                 WHERE task_id = ?1
                 ORDER BY id ASC",
            )?;

            let rows = stmt
                .query_map(params![task_id], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let mut events = Vec::with_capacity(rows.len());
            for (id, task_id, assignment_id, event_type, payload, created_at) in rows {
                let event_type = AssignmentEventType::from_str(&event_type).ok_or_else(|| {
                    anyhow::anyhow!("Unknown assignment event type '{}'", event_type)
                })?;
                events.push(TaskAssignmentEvent {
                    id,
                    task_id,
                    assignment_id,
                    event_type,
                    payload: serde_json::from_str(&payload)?,
                    created_at,
                });
            }

            Ok(events)
        })
    }

    /// Count all events recorded for a task.
    pub fn count_assignment_events(&self, task_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM task_assignment_events WHERE task_id = ?1",
                params![task_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }
}
