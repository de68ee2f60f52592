//! Assignment state machine and history queries.
//!
//! Assign and Unassign each run in one `BEGIN IMMEDIATE` transaction. Every
//! precondition failure is an [`ApiError`] wrapped in `anyhow`, which aborts
//! the closure and rolls the transaction back.

use super::agents::get_agent_internal;
use super::events::append_event;
use super::sessions::link_session;
use super::tasks::{get_task_internal, task_exists};
use super::{Database, now_ms};
use crate::error::ApiError;
use crate::types::{
    AgentSummary, AssignInput, AssignMode, AssignOutcome, AssignmentEventType, AssignmentPage,
    AssignmentReason, AssignmentRecord, AssignmentSource, PageInfo, SourceType, Task,
    TaskAssignment, UnassignInput, UnassignOutcome,
};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde_json::{Value, json};
use uuid::Uuid;

/// Recorded as `assigned_by` on every row the engine writes.
pub const ASSIGNED_BY_SYSTEM: &str = "system";

const ASSIGNMENT_COLUMNS: &str = "id, task_id, agent_id, active, assigned_at, unassigned_at, \
     reason, source_type, source_session_id, assigned_by, meta";

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, message.into())
}

pub(crate) fn parse_assignment_row(row: &Row) -> rusqlite::Result<TaskAssignment> {
    let reason: String = row.get("reason")?;
    let reason = AssignmentReason::from_str(&reason)
        .ok_or_else(|| conversion_error(6, format!("unknown assignment reason '{}'", reason)))?;

    let source_type: String = row.get("source_type")?;
    let source_type = SourceType::from_str(&source_type)
        .ok_or_else(|| conversion_error(7, format!("unknown source type '{}'", source_type)))?;

    let meta: Option<String> = row.get("meta")?;
    let meta = match meta {
        Some(text) => Some(
            serde_json::from_str::<Value>(&text)
                .map_err(|e| conversion_error(10, format!("invalid assignment meta: {}", e)))?,
        ),
        None => None,
    };

    Ok(TaskAssignment {
        id: row.get("id")?,
        task_id: row.get("task_id")?,
        agent_id: row.get("agent_id")?,
        active: row.get::<_, i32>("active")? != 0,
        assigned_at: row.get("assigned_at")?,
        unassigned_at: row.get("unassigned_at")?,
        reason,
        source_type,
        source_session_id: row.get("source_session_id")?,
        assigned_by: row.get("assigned_by")?,
        meta,
    })
}

fn parse_record_row(row: &Row) -> rusqlite::Result<AssignmentRecord> {
    let assignment = parse_assignment_row(row)?;
    let agent = AgentSummary {
        id: assignment.agent_id.clone(),
        name: row.get("agent_name")?,
        role: row.get("agent_role")?,
        status: row.get("agent_status")?,
    };
    Ok(AssignmentRecord { assignment, agent })
}

/// The task's current active assignment, newest first if the index were ever
/// bypassed.
pub(crate) fn active_assignment_internal(
    conn: &Connection,
    task_id: &str,
) -> Result<Option<TaskAssignment>> {
    let sql = format!(
        "SELECT {} FROM task_assignments
         WHERE task_id = ?1 AND active = 1
         ORDER BY assigned_at DESC, id DESC
         LIMIT 1",
        ASSIGNMENT_COLUMNS
    );
    let assignment = conn
        .query_row(&sql, params![task_id], parse_assignment_row)
        .optional()?;
    Ok(assignment)
}

fn close_assignment(conn: &Connection, assignment_id: &str, now: i64) -> Result<()> {
    conn.execute(
        "UPDATE task_assignments SET active = 0, unassigned_at = ?1
         WHERE id = ?2 AND active = 1",
        params![now, assignment_id],
    )?;
    Ok(())
}

fn assignment_meta(input: &AssignInput) -> Value {
    let source = input.source.as_ref();
    json!({
        "mode": input.mode,
        "overrideCapacity": input.override_capacity,
        "requesterSession": source.and_then(|s| s.requester_session.as_deref()),
        "channel": source.and_then(|s| s.channel.as_deref()),
        "host": source.and_then(|s| s.host.as_deref()),
        "runtimeLabel": source.and_then(|s| s.runtime_label.as_deref()),
    })
}

fn insert_assignment(
    conn: &Connection,
    task_id: &str,
    input: &AssignInput,
    now: i64,
) -> Result<TaskAssignment> {
    let source_type = input
        .source
        .as_ref()
        .map(|s| s.source_type)
        .unwrap_or_default();
    let source_session_id = input.source.as_ref().and_then(|s| s.session_id.clone());
    let meta = assignment_meta(input);

    let assignment = TaskAssignment {
        id: Uuid::now_v7().to_string(),
        task_id: task_id.to_string(),
        agent_id: input.agent_id.clone(),
        active: true,
        assigned_at: now,
        unassigned_at: None,
        reason: input.reason,
        source_type,
        source_session_id,
        assigned_by: ASSIGNED_BY_SYSTEM.to_string(),
        meta: Some(meta),
    };

    conn.execute(
        "INSERT INTO task_assignments (
            id, task_id, agent_id, active, assigned_at, reason,
            source_type, source_session_id, assigned_by, meta
        ) VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            &assignment.id,
            task_id,
            &assignment.agent_id,
            now,
            assignment.reason.as_str(),
            assignment.source_type.as_str(),
            &assignment.source_session_id,
            &assignment.assigned_by,
            serde_json::to_string(&assignment.meta)?,
        ],
    )?;

    Ok(assignment)
}

/// Apply the new assignee/status and bump `version` by exactly one.
fn update_task_assignee(
    conn: &Connection,
    task: &Task,
    assignee_id: Option<&str>,
    now: i64,
) -> Result<Task> {
    let status = match assignee_id {
        Some(_) => task.status.after_assign(),
        None => task.status.after_unassign(),
    };

    conn.execute(
        "UPDATE tasks SET assignee_id = ?1, status = ?2, version = version + 1, updated_at = ?3
         WHERE id = ?4",
        params![assignee_id, status.as_str(), now, &task.id],
    )?;

    get_task_internal(conn, &task.id)?.ok_or_else(|| ApiError::task_not_found(&task.id).into())
}

fn check_task_mutable(task: &Task, expected_version: Option<i64>) -> Result<()> {
    if task.status.is_terminal() {
        return Err(ApiError::terminal_task(task.status.as_str()).into());
    }

    if let Some(expected) = expected_version
        && expected != task.version
    {
        return Err(ApiError::version_conflict(task.version).into());
    }

    Ok(())
}

fn source_value(source: Option<&AssignmentSource>) -> Result<Value> {
    Ok(match source {
        Some(source) => serde_json::to_value(source)?,
        None => Value::Null,
    })
}

impl Database {
    /// Assign `input.agent_id` to a task, replacing any active assignment.
    ///
    /// With [`AssignMode::NoopIfSame`] and the same agent already active,
    /// nothing is written and `changed` is false.
    pub fn assign_task(&self, task_id: &str, input: &AssignInput) -> Result<AssignOutcome> {
        self.with_write_tx(|tx| {
            let task =
                get_task_internal(tx, task_id)?.ok_or_else(|| ApiError::task_not_found(task_id))?;

            let agent = get_agent_internal(tx, &input.agent_id)?
                .ok_or_else(|| ApiError::agent_not_found(&input.agent_id))?;
            if !agent.is_active() {
                return Err(ApiError::agent_inactive(&agent.id, &agent.status).into());
            }

            check_task_mutable(&task, input.expected_version)?;

            let current = active_assignment_internal(tx, task_id)?;

            if let Some(existing) = &current
                && existing.agent_id == input.agent_id
                && input.mode == AssignMode::NoopIfSame
            {
                tracing::debug!(
                    task_id = %task_id,
                    agent_id = %input.agent_id,
                    "Assignment unchanged (noop_if_same)"
                );
                return Ok(AssignOutcome {
                    task_id: task_id.to_string(),
                    changed: false,
                    assignment: existing.clone(),
                    task: task.snapshot(),
                });
            }

            let now = now_ms();

            if let Some(previous) = &current {
                close_assignment(tx, &previous.id, now)?;
                append_event(
                    tx,
                    task_id,
                    &previous.id,
                    AssignmentEventType::TaskReassigned,
                    &json!({
                        "fromAgentId": previous.agent_id,
                        "toAgentId": input.agent_id,
                        "reason": input.reason,
                    }),
                )?;
            }

            let assignment = insert_assignment(tx, task_id, input, now)?;
            let updated = update_task_assignee(tx, &task, Some(&input.agent_id), now)?;

            let event_type = if current.is_some() {
                AssignmentEventType::TaskReassigned
            } else {
                AssignmentEventType::TaskAssigned
            };
            append_event(
                tx,
                task_id,
                &assignment.id,
                event_type,
                &json!({
                    "agentId": input.agent_id,
                    "reason": input.reason,
                    "source": source_value(input.source.as_ref())?,
                }),
            )?;

            if let Some(source) = &input.source
                && let Some(session_id) = source.linked_session_id()
            {
                link_session(tx, session_id, &input.agent_id, source)?;
            }

            tracing::info!(
                task_id = %task_id,
                agent_id = %input.agent_id,
                previous_agent = current.as_ref().map(|a| a.agent_id.as_str()),
                version = updated.version,
                "Task assigned"
            );

            Ok(AssignOutcome {
                task_id: task_id.to_string(),
                changed: true,
                assignment,
                task: updated.snapshot(),
            })
        })
    }

    /// Close the active assignment of a task and clear its assignee.
    pub fn unassign_task(&self, task_id: &str, input: &UnassignInput) -> Result<UnassignOutcome> {
        self.with_write_tx(|tx| {
            let task =
                get_task_internal(tx, task_id)?.ok_or_else(|| ApiError::task_not_found(task_id))?;

            check_task_mutable(&task, input.expected_version)?;

            let active = active_assignment_internal(tx, task_id)?
                .ok_or_else(|| ApiError::no_active_assignment(task_id))?;

            let now = now_ms();
            close_assignment(tx, &active.id, now)?;
            let updated = update_task_assignee(tx, &task, None, now)?;

            append_event(
                tx,
                task_id,
                &active.id,
                AssignmentEventType::TaskUnassigned,
                &json!({
                    "previousAgentId": active.agent_id,
                    "reason": input.reason,
                    "source": source_value(input.source.as_ref())?,
                }),
            )?;

            tracing::info!(
                task_id = %task_id,
                previous_agent = %active.agent_id,
                version = updated.version,
                "Task unassigned"
            );

            Ok(UnassignOutcome {
                task_id: task_id.to_string(),
                unassigned: true,
                previous_assignment_id: active.id,
                task: updated.snapshot(),
            })
        })
    }

    /// Get the active assignment of a task, if any.
    pub fn get_active_assignment(&self, task_id: &str) -> Result<Option<TaskAssignment>> {
        self.with_conn(|conn| active_assignment_internal(conn, task_id))
    }

    /// Count active assignment rows for a task (0 or 1 unless the schema is broken).
    pub fn count_active_assignments(&self, task_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM task_assignments WHERE task_id = ?1 AND active = 1",
                params![task_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// One page of a task's assignment history, newest first.
    ///
    /// `cursor` is the id of the last row of the previous page. The caller
    /// validates `limit`.
    pub fn list_assignments(
        &self,
        task_id: &str,
        limit: u32,
        cursor: Option<&str>,
    ) -> Result<AssignmentPage> {
        self.with_conn(|conn| {
            if !task_exists(conn, task_id)? {
                return Err(ApiError::task_not_found(task_id).into());
            }

            let anchor = match cursor {
                Some(cursor) => Some(
                    conn.query_row(
                        "SELECT assigned_at, id FROM task_assignments WHERE id = ?1 AND task_id = ?2",
                        params![cursor, task_id],
                        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
                    )
                    .optional()?
                    .ok_or_else(|| ApiError::validation("unknown cursor", Some("cursor")))?,
                ),
                None => None,
            };

            let select = "SELECT a.id, a.task_id, a.agent_id, a.active, a.assigned_at,
                    a.unassigned_at, a.reason, a.source_type, a.source_session_id,
                    a.assigned_by, a.meta,
                    g.name AS agent_name, g.role AS agent_role, g.status AS agent_status
                 FROM task_assignments a
                 JOIN agents g ON g.id = a.agent_id";

            let data = match &anchor {
                Some((assigned_at, id)) => {
                    let sql = format!(
                        "{} WHERE a.task_id = ?1
                           AND (a.assigned_at < ?2 OR (a.assigned_at = ?2 AND a.id < ?3))
                         ORDER BY a.assigned_at DESC, a.id DESC
                         LIMIT ?4",
                        select
                    );
                    let mut stmt = conn.prepare(&sql)?;
                    stmt.query_map(params![task_id, assigned_at, id, limit], parse_record_row)?
                        .collect::<Result<Vec<_>, _>>()?
                }
                None => {
                    let sql = format!(
                        "{} WHERE a.task_id = ?1
                         ORDER BY a.assigned_at DESC, a.id DESC
                         LIMIT ?2",
                        select
                    );
                    let mut stmt = conn.prepare(&sql)?;
                    stmt.query_map(params![task_id, limit], parse_record_row)?
                        .collect::<Result<Vec<_>, _>>()?
                }
            };

            let next_cursor = if data.len() == limit as usize {
                data.last().map(|r| r.assignment.id.clone())
            } else {
                None
            };

            Ok(AssignmentPage {
                task_id: task_id.to_string(),
                data,
                page: PageInfo { limit, next_cursor },
            })
        })
    }
}
