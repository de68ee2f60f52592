//! Task rows as seen by the assignment engine.
//!
//! Tasks are owned by the lifecycle feature. The helpers here exist for
//! seeding and for lifecycle status changes; none of them touch `version`,
//! which only the assignment state machine advances.

use super::{Database, now_ms};
use crate::types::{Task, TaskStatus};
use anyhow::{Result, anyhow};
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

pub(crate) fn parse_task_row(row: &Row) -> rusqlite::Result<Task> {
    let status: String = row.get("status")?;
    let status = TaskStatus::from_str(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown task status '{}'", status).into(),
        )
    })?;

    Ok(Task {
        id: row.get("id")?,
        title: row.get("title")?,
        status,
        assignee_id: row.get("assignee_id")?,
        version: row.get("version")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Internal helper to get a task using an existing connection (avoids deadlock).
pub(crate) fn get_task_internal(conn: &Connection, task_id: &str) -> Result<Option<Task>> {
    let task = conn
        .query_row(
            "SELECT id, title, status, assignee_id, version, created_at, updated_at
             FROM tasks WHERE id = ?1",
            params![task_id],
            parse_task_row,
        )
        .optional()?;
    Ok(task)
}

pub(crate) fn task_exists(conn: &Connection, task_id: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM tasks WHERE id = ?1",
        params![task_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

impl Database {
    /// Create a task at version 0.
    /// If id is provided, uses it as the task ID; otherwise generates UUID7.
    pub fn create_task(
        &self,
        id: Option<String>,
        title: &str,
        status: TaskStatus,
    ) -> Result<Task> {
        let task_id = id.unwrap_or_else(|| Uuid::now_v7().to_string());
        if task_id.trim().is_empty() {
            return Err(anyhow!("Task ID cannot be empty"));
        }
        let now = now_ms();

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO tasks (id, title, status, version, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 0, ?4, ?4)",
                params![&task_id, title, status.as_str(), now],
            )?;

            Ok(Task {
                id: task_id,
                title: title.to_string(),
                status,
                assignee_id: None,
                version: 0,
                created_at: now,
                updated_at: now,
            })
        })
    }

    /// Get a task by ID.
    pub fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        self.with_conn(|conn| get_task_internal(conn, task_id))
    }

    /// Move a task to another lifecycle status (e.g. IN_PROGRESS, DONE).
    /// Leaves `assignee_id` and `version` alone.
    pub fn set_task_status(&self, task_id: &str, status: TaskStatus) -> Result<Task> {
        let now = now_ms();

        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), now, task_id],
            )?;
            if updated == 0 {
                return Err(anyhow!("Task not found: {}", task_id));
            }
            get_task_internal(conn, task_id)?.ok_or_else(|| anyhow!("Task not found: {}", task_id))
        })
    }
}
