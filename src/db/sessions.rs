//! Session linker: associates a live external session with its agent.

use super::{Database, now_ms};
use crate::types::{AssignmentSource, ExternalSession};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, params};

/// Status written on every link.
pub const SESSION_STATUS_ACTIVE: &str = "ACTIVE";

/// Upsert the session row for `session_id` inside the caller's transaction.
///
/// Only called from Assign. A failure here propagates and rolls back the
/// whole assignment; a repeat link for the same session is an update, not
/// an error.
pub(crate) fn link_session(
    conn: &Connection,
    session_id: &str,
    agent_id: &str,
    source: &AssignmentSource,
) -> Result<()> {
    let now = now_ms();

    conn.execute(
        "INSERT INTO external_sessions (
            session_id, agent_id, requester_session, channel, host, runtime_label,
            status, last_seen_at, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
        ON CONFLICT(session_id) DO UPDATE SET
            agent_id = excluded.agent_id,
            requester_session = excluded.requester_session,
            channel = excluded.channel,
            host = excluded.host,
            runtime_label = excluded.runtime_label,
            status = excluded.status,
            last_seen_at = excluded.last_seen_at",
        params![
            session_id,
            agent_id,
            source.requester_session,
            source.channel,
            source.host,
            source.runtime_label,
            SESSION_STATUS_ACTIVE,
            now,
        ],
    )?;

    tracing::debug!(session_id = %session_id, agent_id = %agent_id, "Linked session to agent");
    Ok(())
}

impl Database {
    /// Get a linked session by its external id.
    pub fn get_external_session(&self, session_id: &str) -> Result<Option<ExternalSession>> {
        self.with_conn(|conn| {
            let session = conn
                .query_row(
                    "SELECT session_id, agent_id, requester_session, channel, host, runtime_label,
                            status, last_seen_at, created_at
                     FROM external_sessions WHERE session_id = ?1",
                    params![session_id],
                    |row| {
                        Ok(ExternalSession {
                            session_id: row.get(0)?,
                            agent_id: row.get(1)?,
                            requester_session: row.get(2)?,
                            channel: row.get(3)?,
                            host: row.get(4)?,
                            runtime_label: row.get(5)?,
                            status: row.get(6)?,
                            last_seen_at: row.get(7)?,
                            created_at: row.get(8)?,
                        })
                    },
                )
                .optional()?;
            Ok(session)
        })
    }
}
