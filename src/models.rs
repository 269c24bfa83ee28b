use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

// ============ Database Models ============

/// A sales branch/office. Owns zero or one queue.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct Unit {
    /// Unique identifier for the unit.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Name of the unit's responsible party.
    pub responsible_name: Option<String>,
    /// Email of the unit's responsible party.
    pub responsible_email: Option<String>,
    /// Whether the unit's queue accepts triggers.
    pub active: bool,
    /// Timestamp of creation.
    pub created_at: DateTime<Utc>,
}

/// A sales consultant.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize, ToSchema)]
pub struct Agent {
    /// Unique identifier for the agent.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Contact email.
    pub email: String,
    /// Contact phone.
    pub phone: Option<String>,
    /// Inactive agents are never selected by a rotation.
    pub active: bool,
}

/// One agent's slot within a unit's queue.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize, ToSchema)]
pub struct QueueEntry {
    pub unit_id: Uuid,
    pub agent_id: Uuid,
    /// 1-based, contiguous within a unit.
    pub position: i32,
}

/// A date-range during which an agent does not receive leads for a unit.
///
/// The interval is half-open: `starts_at` is inside it, `ends_at` is not.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct Absence {
    pub id: Uuid,
    pub unit_id: Uuid,
    pub agent_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub reason: String,
    /// Reference to whoever registered the absence.
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Absence {
    /// Whether `now` falls inside `[starts_at, ends_at)`.
    pub fn covers(&self, now: DateTime<Utc>) -> bool {
        self.starts_at <= now && now < self.ends_at
    }

    /// Whether the absence intersects the window `[from, to)`; open ends are unbounded.
    pub fn overlaps(&self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> bool {
        from.map_or(true, |from| self.ends_at > from) && to.map_or(true, |to| self.starts_at < to)
    }
}

/// Immutable record of one rotation.
///
/// Agent and unit display fields are copied at write time so the audit trail survives
/// later edits to either record.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct AssignmentLogEntry {
    pub id: Uuid,
    pub unit_id: Uuid,
    pub agent_id: Uuid,
    pub agent_name: String,
    pub agent_email: String,
    pub agent_phone: Option<String>,
    pub unit_name: String,
    pub unit_responsible_name: Option<String>,
    pub unit_responsible_email: Option<String>,
    /// Position the agent held when selected.
    pub previous_position: i32,
    /// Lead or attendance reference passed by the caller, if any.
    pub lead_id: Option<String>,
    pub assigned_at: DateTime<Utc>,
}

// ============ Views ============

/// Queue entry joined with agent display data and current absence state.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct QueueViewEntry {
    pub position: i32,
    pub agent_id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub active: bool,
    /// Whether an absence covers the moment the view was built.
    pub absent: bool,
}

/// Read-only projection of a unit's queue for display.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QueueView {
    pub unit: Unit,
    pub entries: Vec<QueueViewEntry>,
    pub generated_at: DateTime<Utc>,
}

/// Registry view of a unit member.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct UnitMember {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub agent: Agent,
    pub absent: bool,
}

/// Public profile of the agent returned by a rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AgentProfile {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

/// Unit display info returned by a rotation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UnitSummary {
    pub id: Uuid,
    pub name: String,
}

impl From<&Unit> for UnitSummary {
    fn from(unit: &Unit) -> Self {
        Self {
            id: unit.id,
            name: unit.name.clone(),
        }
    }
}

/// One page of assignment history, newest first.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AssignmentPage {
    pub items: Vec<AssignmentLogEntry>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

// ============ Request Models ============

/// Body for `PUT /units/:unit_id/queue`.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct SetQueueRequest {
    /// Agents in the desired order; the first one gets position 1.
    pub agent_ids: Vec<Uuid>,
}

/// Body for `PUT /units/:unit_id/active`.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct SetActiveRequest {
    pub active: bool,
}

/// Body for creating or replacing an absence.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct AbsenceRequest {
    pub agent_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    #[serde(default)]
    pub reason: String,
    pub created_by: Option<String>,
}

/// Filters for listing absences.
#[derive(Debug, Clone, Default)]
pub struct AbsenceFilter {
    pub agent_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}
