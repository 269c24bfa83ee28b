use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::models::{AgentProfile, UnitSummary};
use crate::rotation::Assignment;

/// Optional query parameters of the roleta trigger.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TriggerQuery {
    /// Lead or attendance reference recorded in the assignment log.
    pub lead_id: Option<String>,
}

/// Response of a successful trigger.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TriggerResponse {
    /// Always "assigned".
    pub status: String,
    /// Agent that receives the lead.
    pub agent: AgentProfile,
    /// Position the agent held before this rotation.
    pub previous_position: i32,
    pub unit: UnitSummary,
    pub assigned_at: DateTime<Utc>,
    pub log_id: Uuid,
    pub lead_id: Option<String>,
}

impl From<Assignment> for TriggerResponse {
    fn from(assignment: Assignment) -> Self {
        Self {
            status: "assigned".to_string(),
            agent: assignment.agent,
            previous_position: assignment.previous_position,
            unit: assignment.unit,
            assigned_at: assignment.assigned_at,
            log_id: assignment.log_id,
            lead_id: assignment.lead_id,
        }
    }
}
