//! Core types for the task assignment engine.
//!
//! Request-level strings (`"manual_override"`, `"noop_if_same"`, `"session"`)
//! deserialize straight into these enums, so the state machine only ever sees
//! closed types. Storage uses the SCREAMING_SNAKE_CASE forms.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle status of a task. The engine only moves TO_DO <-> ASSIGNED;
/// every other non-terminal state is opaque to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    ToDo,
    Assigned,
    InProgress,
    Blocked,
    InReview,
    Done,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::ToDo => "TO_DO",
            TaskStatus::Assigned => "ASSIGNED",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Blocked => "BLOCKED",
            TaskStatus::InReview => "IN_REVIEW",
            TaskStatus::Done => "DONE",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "TO_DO" => Some(TaskStatus::ToDo),
            "ASSIGNED" => Some(TaskStatus::Assigned),
            "IN_PROGRESS" => Some(TaskStatus::InProgress),
            "BLOCKED" => Some(TaskStatus::Blocked),
            "IN_REVIEW" => Some(TaskStatus::InReview),
            "DONE" => Some(TaskStatus::Done),
            "CANCELLED" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }

    /// DONE and CANCELLED tasks are immune to assignment changes.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Cancelled)
    }

    /// Status after a successful assign: only TO_DO advances.
    pub fn after_assign(self) -> Self {
        match self {
            TaskStatus::ToDo => TaskStatus::Assigned,
            other => other,
        }
    }

    /// Status after a successful unassign: only ASSIGNED reverts.
    pub fn after_unassign(self) -> Self {
        match self {
            TaskStatus::Assigned => TaskStatus::ToDo,
            other => other,
        }
    }
}

/// A unit of work, as far as the engine can see it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    pub assignee_id: Option<String>,
    pub version: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Task {
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            assignee_id: self.assignee_id.clone(),
            status: self.status,
            version: self.version,
            updated_at: self.updated_at,
        }
    }
}

/// An assignable executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: Option<String>,
    pub role: Option<String>,
    /// Free-form; compared case-insensitively against "active".
    pub status: String,
    pub created_at: i64,
}

impl Agent {
    pub fn is_active(&self) -> bool {
        self.status.eq_ignore_ascii_case("active")
    }
}

/// Why an assignment was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentReason {
    #[default]
    ManualOverride,
    AutoRouting,
    Handoff,
    Retry,
    Escalation,
}

impl AssignmentReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentReason::ManualOverride => "MANUAL_OVERRIDE",
            AssignmentReason::AutoRouting => "AUTO_ROUTING",
            AssignmentReason::Handoff => "HANDOFF",
            AssignmentReason::Retry => "RETRY",
            AssignmentReason::Escalation => "ESCALATION",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "MANUAL_OVERRIDE" => Some(AssignmentReason::ManualOverride),
            "AUTO_ROUTING" => Some(AssignmentReason::AutoRouting),
            "HANDOFF" => Some(AssignmentReason::Handoff),
            "RETRY" => Some(AssignmentReason::Retry),
            "ESCALATION" => Some(AssignmentReason::Escalation),
            _ => None,
        }
    }
}

/// Where an assignment request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    #[default]
    Api,
    Session,
    Scheduler,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Api => "API",
            SourceType::Session => "SESSION",
            SourceType::Scheduler => "SCHEDULER",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "API" => Some(SourceType::Api),
            "SESSION" => Some(SourceType::Session),
            "SCHEDULER" => Some(SourceType::Scheduler),
            _ => None,
        }
    }
}

/// How Assign treats a task already held by the requested agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignMode {
    /// Always close the current assignment and open a new one.
    #[default]
    Replace,
    /// Leave a same-agent assignment untouched and report `changed: false`.
    NoopIfSame,
}

/// Origin descriptor supplied with assign/unassign requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentSource {
    #[serde(rename = "type")]
    pub source_type: SourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester_session: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_label: Option<String>,
}

impl AssignmentSource {
    /// The session id to link, if this request came from a live session.
    pub fn linked_session_id(&self) -> Option<&str> {
        match self.source_type {
            SourceType::Session => self.session_id.as_deref(),
            _ => None,
        }
    }
}

/// Read a version as an integer, also taking integral floats such as `3.0`.
fn deserialize_version<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let Some(number) = Option::<serde_json::Number>::deserialize(deserializer)? else {
        return Ok(None);
    };
    if let Some(v) = number.as_i64() {
        return Ok(Some(v));
    }
    match number.as_f64() {
        Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
            Ok(Some(f as i64))
        }
        _ => Err(serde::de::Error::custom(format!(
            "expectedVersion must be an integer, got {}",
            number
        ))),
    }
}

/// Validated input for Assign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignInput {
    pub agent_id: String,
    #[serde(default)]
    pub reason: AssignmentReason,
    #[serde(default)]
    pub mode: AssignMode,
    #[serde(default, deserialize_with = "deserialize_version")]
    pub expected_version: Option<i64>,
    #[serde(default)]
    pub source: Option<AssignmentSource>,
    /// Accepted and recorded; capacity policy lives outside the engine.
    #[serde(default)]
    pub override_capacity: bool,
}

/// Validated input for Unassign.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnassignInput {
    #[serde(default)]
    pub reason: AssignmentReason,
    #[serde(default, deserialize_with = "deserialize_version")]
    pub expected_version: Option<i64>,
    #[serde(default)]
    pub source: Option<AssignmentSource>,
}

/// One agent holding one task. Immutable once closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAssignment {
    pub id: String,
    pub task_id: String,
    pub agent_id: String,
    pub active: bool,
    pub assigned_at: i64,
    pub unassigned_at: Option<i64>,
    pub reason: AssignmentReason,
    pub source_type: SourceType,
    pub source_session_id: Option<String>,
    pub assigned_by: String,
    pub meta: Option<Value>,
}

/// Assignment-event type in the append-only log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentEventType {
    TaskAssigned,
    TaskReassigned,
    TaskUnassigned,
}

impl AssignmentEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentEventType::TaskAssigned => "TASK_ASSIGNED",
            AssignmentEventType::TaskReassigned => "TASK_REASSIGNED",
            AssignmentEventType::TaskUnassigned => "TASK_UNASSIGNED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "TASK_ASSIGNED" => Some(AssignmentEventType::TaskAssigned),
            "TASK_REASSIGNED" => Some(AssignmentEventType::TaskReassigned),
            "TASK_UNASSIGNED" => Some(AssignmentEventType::TaskUnassigned),
            _ => None,
        }
    }
}

/// Write-once audit record of an assignment transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAssignmentEvent {
    pub id: i64,
    pub task_id: String,
    pub assignment_id: String,
    pub event_type: AssignmentEventType,
    pub payload: Value,
    pub created_at: i64,
}

/// Session side-table row linking a live session to its agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSession {
    pub session_id: String,
    pub agent_id: String,
    pub requester_session: Option<String>,
    pub channel: Option<String>,
    pub host: Option<String>,
    pub runtime_label: Option<String>,
    pub status: String,
    pub last_seen_at: i64,
    pub created_at: i64,
}

/// The task fields callers need to resynchronize after a mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub assignee_id: Option<String>,
    pub status: TaskStatus,
    pub version: i64,
    pub updated_at: i64,
}

/// Result of Assign.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignOutcome {
    pub task_id: String,
    pub changed: bool,
    pub assignment: TaskAssignment,
    pub task: TaskSnapshot,
}

/// Result of Unassign.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnassignOutcome {
    pub task_id: String,
    pub unassigned: bool,
    pub previous_assignment_id: String,
    pub task: TaskSnapshot,
}

/// Agent fields embedded in assignment listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSummary {
    pub id: String,
    pub name: Option<String>,
    pub role: Option<String>,
    pub status: String,
}

/// An assignment row with its agent, for history listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentRecord {
    #[serde(flatten)]
    pub assignment: TaskAssignment,
    pub agent: AgentSummary,
}

/// Pagination block of a listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub limit: u32,
    pub next_cursor: Option<String>,
}

/// One page of a task's assignment history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentPage {
    pub task_id: String,
    pub data: Vec<AssignmentRecord>,
    pub page: PageInfo,
}
