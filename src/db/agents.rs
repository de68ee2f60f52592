//! Agent rows. Read-only from the state machine's point of view; the
//! registration helpers are for seeding.

use super::{Database, now_ms};
use crate::types::Agent;
use anyhow::{Result, anyhow};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

/// Maximum length for agent IDs.
pub const MAX_AGENT_ID_LEN: usize = 64;

/// Internal helper to get an agent using an existing connection (avoids deadlock).
pub(crate) fn get_agent_internal(conn: &Connection, agent_id: &str) -> Result<Option<Agent>> {
    let agent = conn
        .query_row(
            "SELECT id, name, role, status, created_at FROM agents WHERE id = ?1",
            params![agent_id],
            |row| {
                Ok(Agent {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    role: row.get(2)?,
                    status: row.get(3)?,
                    created_at: row.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(agent)
}

impl Database {
    /// Register a new agent.
    ///
    /// If `agent_id` is provided, it must be non-empty and at most 64 characters.
    /// If not provided, a UUID7 (time-sortable) will be generated.
    pub fn register_agent(
        &self,
        agent_id: Option<String>,
        name: Option<String>,
        role: Option<String>,
        status: &str,
    ) -> Result<Agent> {
        let id = match agent_id {
            Some(id) => {
                if id.len() > MAX_AGENT_ID_LEN {
                    return Err(anyhow!(
                        "Agent ID must be at most {} characters, got {}",
                        MAX_AGENT_ID_LEN,
                        id.len()
                    ));
                }
                if id.is_empty() {
                    return Err(anyhow!("Agent ID cannot be empty"));
                }
                id
            }
            None => Uuid::now_v7().to_string(),
        };
        let now = now_ms();

        self.with_conn(|conn| {
            if get_agent_internal(conn, &id)?.is_some() {
                return Err(anyhow!("Agent ID '{}' already registered", id));
            }

            conn.execute(
                "INSERT INTO agents (id, name, role, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![&id, name, role, status, now],
            )?;

            Ok(Agent {
                id,
                name,
                role,
                status: status.to_string(),
                created_at: now,
            })
        })
    }

    /// Get an agent by ID.
    pub fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>> {
        self.with_conn(|conn| get_agent_internal(conn, agent_id))
    }

    /// Change an agent's free-form status (e.g. "active", "paused").
    pub fn set_agent_status(&self, agent_id: &str, status: &str) -> Result<Agent> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE agents SET status = ?1 WHERE id = ?2",
                params![status, agent_id],
            )?;
            if updated == 0 {
                return Err(anyhow!("Agent not found: {}", agent_id));
            }
            get_agent_internal(conn, agent_id)?
                .ok_or_else(|| anyhow!("Agent not found: {}", agent_id))
        })
    }
}
