//! Request boundary: raw bodies, headers and query strings into typed inputs.
//!
//! Everything here is transport-agnostic so the HTTP adapter and tests share
//! one set of rules.

use crate::db::idempotency::MAX_KEY_LEN;
use crate::error::{ApiError, ApiResult};
use crate::types::{AssignInput, AssignmentSource, UnassignInput};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Pagination bounds for assignment listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    pub default_limit: u32,
    pub max_limit: u32,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default_limit: 50,
            max_limit: 200,
        }
    }
}

/// Validated listing parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub limit: u32,
    pub cursor: Option<String>,
}

/// Reject a blank path task id.
pub fn require_task_id(task_id: &str) -> ApiResult<&str> {
    if task_id.trim().is_empty() {
        return Err(ApiError::invalid_task_id());
    }
    Ok(task_id)
}

fn from_value<T: DeserializeOwned>(value: Value, what: &str) -> ApiResult<T> {
    serde_json::from_value(value)
        .map_err(|e| ApiError::validation(format!("invalid {} payload: {}", what, e), None))
}

fn check_expected_version(expected_version: Option<i64>) -> ApiResult<()> {
    match expected_version {
        Some(v) if v < 0 => Err(ApiError::validation(
            "expectedVersion must be a non-negative integer",
            Some("expectedVersion"),
        )),
        _ => Ok(()),
    }
}

fn check_source(source: Option<&AssignmentSource>) -> ApiResult<()> {
    let Some(source) = source else {
        return Ok(());
    };

    let fields = [
        ("source.sessionId", &source.session_id),
        ("source.requesterSession", &source.requester_session),
        ("source.channel", &source.channel),
        ("source.host", &source.host),
        ("source.runtimeLabel", &source.runtime_label),
    ];
    for (field, value) in fields {
        if matches!(value, Some(v) if v.is_empty()) {
            return Err(ApiError::validation(
                format!("{} must not be empty", field),
                Some(field),
            ));
        }
    }
    Ok(())
}

/// Parse an Assign body. Unparsable JSON is `INVALID_JSON`; anything that
/// parses but breaks the schema is `VALIDATION_ERROR`.
pub fn parse_assign_body(body: &[u8]) -> ApiResult<AssignInput> {
    let value: Value = serde_json::from_slice(body).map_err(|_| ApiError::invalid_json())?;
    let input: AssignInput = from_value(value, "assignment")?;

    if input.agent_id.trim().is_empty() {
        return Err(ApiError::validation("agentId is required", Some("agentId")));
    }
    check_expected_version(input.expected_version)?;
    check_source(input.source.as_ref())?;

    Ok(input)
}

/// Parse an Unassign body. An empty or unparsable body counts as `{}`.
pub fn parse_unassign_body(body: &[u8]) -> ApiResult<UnassignInput> {
    let value: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(_) => return Ok(UnassignInput::default()),
    };
    let input: UnassignInput = from_value(value, "unassign")?;

    check_expected_version(input.expected_version)?;
    check_source(input.source.as_ref())?;

    Ok(input)
}

/// Reject a page size outside `1..=limits.max_limit`.
pub fn check_limit(limit: u32, limits: PageLimits) -> ApiResult<u32> {
    if limit == 0 || limit > limits.max_limit {
        return Err(ApiError::validation(
            format!("limit must be between 1 and {}", limits.max_limit),
            Some("limit"),
        ));
    }
    Ok(limit)
}

/// Parse raw `limit`/`cursor` query values. Bounds are checked by the engine.
pub fn parse_list_query(
    limit: Option<&str>,
    cursor: Option<&str>,
    limits: PageLimits,
) -> ApiResult<ListQuery> {
    let limit = match limit {
        None => limits.default_limit,
        Some(raw) => raw.trim().parse().map_err(|_| {
            ApiError::validation("limit must be a positive integer", Some("limit"))
        })?,
    };

    Ok(ListQuery {
        limit,
        cursor: cursor.filter(|c| !c.is_empty()).map(String::from),
    })
}

/// Validate an optional `Idempotency-Key` header value.
pub fn parse_idempotency_key(raw: Option<&str>) -> ApiResult<Option<String>> {
    match raw {
        None => Ok(None),
        Some(key) if key.is_empty() || key.chars().count() > MAX_KEY_LEN => {
            Err(ApiError::validation(
                format!("Idempotency-Key must be 1-{} characters", MAX_KEY_LEN),
                Some("idempotency-key"),
            ))
        }
        Some(key) => Ok(Some(key.to_string())),
    }
}
