//! Storage seams for the lead queue.
//!
//! Each component gets its own trait; [`LeadQueueStore`] bundles them so handlers can hold
//! a single `Arc<dyn LeadQueueStore>`. Implementations: [`crate::db_storage`] (PostgreSQL)
//! and [`crate::memory_store`] (in-process).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{
    Absence, AbsenceFilter, AbsenceRequest, Agent, AssignmentPage, QueueEntry, QueueViewEntry,
    Unit, UnitMember,
};
use crate::rotation::{Assignment, RotationRequest};

pub const DEFAULT_HISTORY_LIMIT: i64 = 50;
pub const MAX_HISTORY_LIMIT: i64 = 500;
pub const MAX_REASON_LEN: usize = 500;

/// Read-only view of units, agents and their absence state.
#[async_trait]
pub trait AgentRegistry: Send + Sync {
    async fn list_units(&self) -> Result<Vec<Unit>, AppError>;
    async fn get_unit(&self, unit_id: Uuid) -> Result<Unit, AppError>;
    async fn get_agent(&self, agent_id: Uuid) -> Result<Agent, AppError>;
    async fn list_members(&self, unit_id: Uuid, now: DateTime<Utc>)
        -> Result<Vec<UnitMember>, AppError>;
    /// Agents with an absence in this unit covering `now`.
    async fn absent_agents(&self, unit_id: Uuid, now: DateTime<Utc>)
        -> Result<HashSet<Uuid>, AppError>;
}

/// Absence management used by the dashboard.
#[async_trait]
pub trait AbsenceStore: Send + Sync {
    async fn list_absences(
        &self,
        unit_id: Uuid,
        filter: &AbsenceFilter,
    ) -> Result<Vec<Absence>, AppError>;
    async fn create_absence(
        &self,
        unit_id: Uuid,
        request: &AbsenceRequest,
    ) -> Result<Absence, AppError>;
    async fn update_absence(
        &self,
        unit_id: Uuid,
        absence_id: Uuid,
        request: &AbsenceRequest,
    ) -> Result<Absence, AppError>;
    async fn delete_absence(&self, unit_id: Uuid, absence_id: Uuid) -> Result<(), AppError>;
}

/// Ordered queue per unit plus its on/off switch.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Entries sorted by position; empty when the unit has no queue.
    async fn get_queue(&self, unit_id: Uuid) -> Result<Vec<QueueEntry>, AppError>;
    async fn get_queue_view(
        &self,
        unit_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueViewEntry>, AppError>;
    /// Replaces the whole queue with `agent_ids` at positions `1..=N`, all or nothing.
    async fn replace_queue(
        &self,
        unit_id: Uuid,
        agent_ids: &[Uuid],
    ) -> Result<Vec<QueueEntry>, AppError>;
    async fn is_active(&self, unit_id: Uuid) -> Result<bool, AppError>;
    async fn set_active(&self, unit_id: Uuid, active: bool) -> Result<Unit, AppError>;
}

/// Append-only rotation history. Appends happen only inside [`RotationStore::rotate`].
#[async_trait]
pub trait AssignmentLog: Send + Sync {
    async fn list_assignments(
        &self,
        unit_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<AssignmentPage, AppError>;
    /// Deletes the unit's history and returns how many entries were removed.
    async fn clear_assignments(&self, unit_id: Uuid) -> Result<u64, AppError>;
}

/// The serialized read-select-write path of a trigger.
#[async_trait]
pub trait RotationStore: Send + Sync {
    /// Selects the next agent, rewrites the queue and appends the log entry atomically.
    async fn rotate(
        &self,
        unit_id: Uuid,
        request: &RotationRequest,
    ) -> Result<Assignment, AppError>;
}

pub trait LeadQueueStore:
    AgentRegistry + AbsenceStore + QueueStore + AssignmentLog + RotationStore
{
}

impl<T> LeadQueueStore for T where
    T: AgentRegistry + AbsenceStore + QueueStore + AssignmentLog + RotationStore
{
}

/// Rejects duplicate ids in a reorder payload.
pub fn validate_queue_ids(agent_ids: &[Uuid]) -> Result<(), AppError> {
    let mut seen = HashSet::with_capacity(agent_ids.len());
    for id in agent_ids {
        if !seen.insert(id) {
            return Err(AppError::Validation(format!(
                "Agent {} appears more than once in the queue",
                id
            )));
        }
    }
    Ok(())
}

/// Fails unless every id resolves to an active agent.
pub fn validate_queue_agents(agent_ids: &[Uuid], agents: &[Agent]) -> Result<(), AppError> {
    for id in agent_ids {
        match agents.iter().find(|a| a.id == *id) {
            None => {
                return Err(AppError::Validation(format!("Agent {} does not exist", id)));
            }
            Some(agent) if !agent.active => {
                return Err(AppError::Validation(format!(
                    "Agent '{}' is inactive and cannot join a queue",
                    agent.name
                )));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Interval and reason checks shared by create and update.
pub fn validate_absence(request: &AbsenceRequest) -> Result<(), AppError> {
    if request.ends_at <= request.starts_at {
        return Err(AppError::Validation(
            "Absence end must be after its start".to_string(),
        ));
    }
    if request.reason.chars().count() > MAX_REASON_LEN {
        return Err(AppError::Validation(format!(
            "Absence reason must be at most {} characters",
            MAX_REASON_LEN
        )));
    }
    Ok(())
}

/// Fails when the agent is missing or inactive.
pub fn ensure_agent_active(agent: &Agent) -> Result<(), AppError> {
    if agent.active {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "Agent '{}' is inactive",
            agent.name
        )))
    }
}

/// Normalizes paging parameters: limit within `1..=MAX_HISTORY_LIMIT`, offset non-negative.
pub fn page_bounds(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    let limit = limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let offset = offset.unwrap_or(0).max(0);
    (limit, offset)
}

pub fn unit_not_found(unit_id: Uuid) -> AppError {
    AppError::NotFound(format!("Unit {} not found", unit_id))
}

pub fn agent_not_found(agent_id: Uuid) -> AppError {
    AppError::NotFound(format!("Agent {} not found", agent_id))
}

pub fn absence_not_found(absence_id: Uuid) -> AppError {
    AppError::NotFound(format!("Absence {} not found", absence_id))
}
