//! Assignment engine: the idempotency ledger wrapped around the state machine.
//!
//! Transports hand the engine validated inputs plus an optional
//! [`IdempotencyContext`] and get back a status/body pair ready to send.

use crate::config::Config;
use crate::db::Database;
use crate::db::idempotency::{IdempotencyLookup, hash_request};
use crate::error::{ApiError, ApiResult};
use crate::requests::{ListQuery, PageLimits, check_limit, require_task_id};
use crate::types::{AssignInput, AssignmentPage, UnassignInput};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Identity of a request for idempotency purposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyContext {
    pub key: String,
    pub method: String,
    pub path: String,
}

impl IdempotencyContext {
    pub fn new(key: impl Into<String>, method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            method: method.into(),
            path: path.into(),
        }
    }
}

/// A response body and status, and whether it came from the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineResponse {
    pub status: u16,
    pub body: Value,
    pub replayed: bool,
}

impl EngineResponse {
    fn fresh(body: Value) -> Self {
        Self {
            status: 200,
            body,
            replayed: false,
        }
    }

    fn replayed(status: u16, body: Value) -> Self {
        Self {
            status,
            body,
            replayed: true,
        }
    }
}

fn to_body<T: Serialize>(value: &T) -> ApiResult<Value> {
    serde_json::to_value(value).map_err(ApiError::internal)
}

/// Shared engine state. Cheap to clone.
#[derive(Clone)]
pub struct AssignmentEngine {
    db: Arc<Database>,
    idempotency_ttl: Duration,
    page_limits: PageLimits,
}

impl AssignmentEngine {
    pub fn new(db: Arc<Database>, config: &Config) -> Self {
        Self {
            db,
            idempotency_ttl: config.idempotency.ttl(),
            page_limits: config.assignments.page_limits(),
        }
    }

    /// Get the database reference.
    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn page_limits(&self) -> PageLimits {
        self.page_limits
    }

    /// Assign an agent to a task.
    pub fn assign(
        &self,
        task_id: &str,
        input: &AssignInput,
        idempotency: Option<&IdempotencyContext>,
    ) -> ApiResult<EngineResponse> {
        let task_id = require_task_id(task_id)?;
        let payload = to_body(input)?;

        self.run_idempotent(idempotency, &payload, || {
            let outcome = self.db.assign_task(task_id, input)?;
            to_body(&outcome)
        })
    }

    /// Remove the active assignment from a task.
    pub fn unassign(
        &self,
        task_id: &str,
        input: &UnassignInput,
        idempotency: Option<&IdempotencyContext>,
    ) -> ApiResult<EngineResponse> {
        let task_id = require_task_id(task_id)?;
        let payload = to_body(input)?;

        self.run_idempotent(idempotency, &payload, || {
            let outcome = self.db.unassign_task(task_id, input)?;
            to_body(&outcome)
        })
    }

    /// One page of a task's assignment history.
    pub fn list_assignments(&self, task_id: &str, query: &ListQuery) -> ApiResult<AssignmentPage> {
        let task_id = require_task_id(task_id)?;
        let limit = check_limit(query.limit, self.page_limits)?;

        Ok(self
            .db
            .list_assignments(task_id, limit, query.cursor.as_deref())?)
    }

    /// Lookup, reserve, run, commit.
    ///
    /// Only successful outcomes are committed. A failed run leaves the
    /// reservation without an outcome, so a retry with the same key runs the
    /// state machine again.
    fn run_idempotent<F>(
        &self,
        ctx: Option<&IdempotencyContext>,
        payload: &Value,
        run: F,
    ) -> ApiResult<EngineResponse>
    where
        F: FnOnce() -> ApiResult<Value>,
    {
        let Some(ctx) = ctx else {
            return run().map(EngineResponse::fresh);
        };

        let request_hash = hash_request(&ctx.method, &ctx.path, payload);

        match self
            .db
            .lookup_idempotency_key(&ctx.key, &ctx.method, &ctx.path, &request_hash)?
        {
            IdempotencyLookup::Conflict => {
                warn!(idempotency_key = %ctx.key, path = %ctx.path, "Idempotency key reused with different request");
                return Err(ApiError::idempotency_key_reused());
            }
            IdempotencyLookup::Replay { status, body } => {
                debug!(idempotency_key = %ctx.key, status, "Replaying stored response");
                return Ok(EngineResponse::replayed(status, body));
            }
            IdempotencyLookup::Pending => {
                debug!(idempotency_key = %ctx.key, "Key reserved without outcome, running again");
            }
            IdempotencyLookup::Miss => {}
        }

        self.db.reserve_idempotency_key(
            &ctx.key,
            &ctx.method,
            &ctx.path,
            &request_hash,
            self.idempotency_ttl,
        )?;

        let response = EngineResponse::fresh(run()?);

        // The mutation is already committed; a lost ledger write only costs replayability.
        if let Err(e) = self
            .db
            .commit_idempotency_key(&ctx.key, response.status, &response.body)
        {
            tracing::error!(idempotency_key = %ctx.key, error = %e, "Failed to store idempotent response");
        }

        Ok(response)
    }
}
