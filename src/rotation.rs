//! Round-robin selection for a unit's lead queue.
//!
//! The planning step is storage-independent: stores load a [`RotationSnapshot`] under the
//! unit's lock, call [`plan_rotation`], and persist the returned order together with the
//! log entry built by [`build_log_entry`] in a single atomic write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{Agent, AgentProfile, AssignmentLogEntry, Unit, UnitSummary};

/// An agent together with the position it currently holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSlot {
    pub agent: Agent,
    pub position: i32,
}

/// Everything a rotation reads, captured under the unit lock.
#[derive(Debug, Clone)]
pub struct RotationSnapshot {
    pub unit: Unit,
    /// Slots sorted by position ascending.
    pub slots: Vec<QueueSlot>,
    /// Agents with an absence covering `now`.
    pub absent: HashSet<Uuid>,
}

/// Parameters of a single trigger call.
#[derive(Debug, Clone, Default)]
pub struct RotationRequest {
    /// Fixed evaluation instant. `None` reads the clock once the unit lock is held, which
    /// keeps log timestamps in commit order.
    pub now: Option<DateTime<Utc>>,
    pub lead_id: Option<String>,
}

impl RotationRequest {
    pub fn now() -> Self {
        Self::default()
    }

    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Some(now),
            lead_id: None,
        }
    }

    pub fn with_lead(mut self, lead_id: impl Into<String>) -> Self {
        self.lead_id = Some(lead_id.into());
        self
    }
}

/// Outcome of [`plan_rotation`]: who gets the lead and the order to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationPlan {
    pub selected: QueueSlot,
    /// Agent ids in their new order; index 0 becomes position 1.
    pub new_order: Vec<Uuid>,
}

/// Result of a committed rotation, returned to the trigger caller.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Assignment {
    pub log_id: Uuid,
    pub agent: AgentProfile,
    pub previous_position: i32,
    pub unit: UnitSummary,
    pub lead_id: Option<String>,
    pub assigned_at: DateTime<Utc>,
}

impl Assignment {
    pub fn from_log(unit: &Unit, entry: &AssignmentLogEntry) -> Self {
        Self {
            log_id: entry.id,
            agent: AgentProfile {
                id: entry.agent_id,
                name: entry.agent_name.clone(),
                email: entry.agent_email.clone(),
                phone: entry.agent_phone.clone(),
            },
            previous_position: entry.previous_position,
            unit: UnitSummary::from(unit),
            lead_id: entry.lead_id.clone(),
            assigned_at: entry.assigned_at,
        }
    }
}

fn is_eligible(slot: &QueueSlot, absent: &HashSet<Uuid>) -> bool {
    slot.agent.active && !absent.contains(&slot.agent.id)
}

/// Selects the first eligible agent and moves only that agent to the tail.
///
/// New order is `[after selected] + [before selected] + [selected]`, so agents skipped for
/// absence keep their relative order instead of being pushed back. `slots` must already be
/// sorted by position.
pub fn plan_rotation(
    slots: &[QueueSlot],
    absent: &HashSet<Uuid>,
) -> Result<RotationPlan, AppError> {
    if slots.is_empty() {
        return Err(AppError::EmptyQueue(
            "No agents configured in this unit's queue".to_string(),
        ));
    }

    let index = slots
        .iter()
        .position(|slot| is_eligible(slot, absent))
        .ok_or_else(|| {
            AppError::NoEligibleAgent(format!(
                "All {} agents in the queue are absent or inactive",
                slots.len()
            ))
        })?;

    let selected = slots[index].clone();
    let new_order = slots[index + 1..]
        .iter()
        .chain(&slots[..index])
        .map(|slot| slot.agent.id)
        .chain(std::iter::once(selected.agent.id))
        .collect();

    Ok(RotationPlan {
        selected,
        new_order,
    })
}

/// Runs the full checks of a trigger against a loaded snapshot.
pub fn plan_for_snapshot(snapshot: &RotationSnapshot) -> Result<RotationPlan, AppError> {
    if !snapshot.unit.active {
        return Err(AppError::Inactive(format!(
            "Queue for unit '{}' is disabled",
            snapshot.unit.name
        )));
    }

    plan_rotation(&snapshot.slots, &snapshot.absent)
}

/// Builds the audit record for a planned rotation, copying display fields.
pub fn build_log_entry(
    unit: &Unit,
    plan: &RotationPlan,
    request: &RotationRequest,
    assigned_at: DateTime<Utc>,
) -> AssignmentLogEntry {
    let agent = &plan.selected.agent;

    AssignmentLogEntry {
        id: Uuid::new_v4(),
        unit_id: unit.id,
        agent_id: agent.id,
        agent_name: agent.name.clone(),
        agent_email: agent.email.clone(),
        agent_phone: agent.phone.clone(),
        unit_name: unit.name.clone(),
        unit_responsible_name: unit.responsible_name.clone(),
        unit_responsible_email: unit.responsible_email.clone(),
        previous_position: plan.selected.position,
        lead_id: request.lead_id.clone(),
        assigned_at,
    }
}

/// Checks that positions form exactly `1..=N` once sorted.
pub fn check_positions(positions: &[i32]) -> Result<(), AppError> {
    let mut sorted = positions.to_vec();
    sorted.sort_unstable();

    for (expected, actual) in (1..).zip(&sorted) {
        if *actual != expected {
            return Err(AppError::Validation(format!(
                "Queue positions are not contiguous: expected {}, found {}",
                expected, actual
            )));
        }
    }

    Ok(())
}
