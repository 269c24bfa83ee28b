//! In-process implementation of the lead queue store.
//!
//! Rotations stage the queue rewrite and the log append, then commit both under one write
//! guard, so a failure at any staged step leaves the state untouched. [`FailPoint`]s let
//! tests interrupt a rotation between those steps.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::{OwnedMutexGuard, RwLock};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{
    Absence, AbsenceFilter, AbsenceRequest, Agent, AssignmentLogEntry, AssignmentPage,
    QueueEntry, QueueViewEntry, Unit, UnitMember,
};
use crate::rotation::{self, Assignment, QueueSlot, RotationRequest, RotationSnapshot};
use crate::store::{
    absence_not_found, agent_not_found, ensure_agent_active, unit_not_found, validate_absence,
    validate_queue_agents, validate_queue_ids, AbsenceStore, AgentRegistry, AssignmentLog,
    QueueStore, RotationStore,
};
use crate::unit_lock::UnitLocks;

/// Where an injected storage failure interrupts a rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    /// The new queue order is staged, the log entry is not.
    AfterQueueWrite,
    /// Both writes are staged, nothing is committed.
    AfterLogAppend,
}

#[derive(Default)]
struct MemoryState {
    units: HashMap<Uuid, Unit>,
    agents: HashMap<Uuid, Agent>,
    members: HashMap<Uuid, Vec<Uuid>>,
    /// Agent ids in position order.
    queues: HashMap<Uuid, Vec<Uuid>>,
    absences: Vec<Absence>,
    /// Commit order, oldest first.
    log: Vec<AssignmentLogEntry>,
    fail_point: Option<FailPoint>,
}

impl MemoryState {
    fn unit(&self, unit_id: Uuid) -> Result<&Unit, AppError> {
        self.units.get(&unit_id).ok_or_else(|| unit_not_found(unit_id))
    }

    fn absent_at(&self, unit_id: Uuid, now: DateTime<Utc>) -> HashSet<Uuid> {
        self.absences
            .iter()
            .filter(|a| a.unit_id == unit_id && a.covers(now))
            .map(|a| a.agent_id)
            .collect()
    }

    /// Queue slots in position order. A queued id without an agent record is a broken
    /// store, not an agent to skip.
    fn slots(&self, unit_id: Uuid) -> Result<Vec<QueueSlot>, AppError> {
        self.queues
            .get(&unit_id)
            .into_iter()
            .flatten()
            .zip(1..)
            .map(|(agent_id, position)| {
                let agent = self.agents.get(agent_id).ok_or_else(|| {
                    AppError::StorageError(format!(
                        "Queue of unit {} references unknown agent {}",
                        unit_id, agent_id
                    ))
                })?;
                Ok(QueueSlot {
                    agent: agent.clone(),
                    position,
                })
            })
            .collect()
    }

    fn snapshot(&self, unit_id: Uuid, now: DateTime<Utc>) -> Result<RotationSnapshot, AppError> {
        Ok(RotationSnapshot {
            unit: self.unit(unit_id)?.clone(),
            slots: self.slots(unit_id)?,
            absent: self.absent_at(unit_id, now),
        })
    }

    fn checked_agent(&self, agent_id: Uuid) -> Result<&Agent, AppError> {
        let agent = self
            .agents
            .get(&agent_id)
            .ok_or_else(|| agent_not_found(agent_id))?;
        ensure_agent_active(agent)?;
        Ok(agent)
    }

    /// Consumes the injected failure if it targets `point`.
    fn trip(&mut self, point: FailPoint) -> Result<(), AppError> {
        if self.fail_point == Some(point) {
            self.fail_point = None;
            return Err(AppError::StorageError(format!(
                "injected failure at {:?}",
                point
            )));
        }
        Ok(())
    }
}

fn queue_entries(unit_id: Uuid, ids: &[Uuid]) -> Vec<QueueEntry> {
    ids.iter()
        .zip(1..)
        .map(|(agent_id, position)| QueueEntry {
            unit_id,
            agent_id: *agent_id,
            position,
        })
        .collect()
}

/// Lead queue store kept entirely in memory.
pub struct MemoryLeadQueueStore {
    state: RwLock<MemoryState>,
    locks: UnitLocks,
}

impl Default for MemoryLeadQueueStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl MemoryLeadQueueStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            locks: UnitLocks::new(lock_timeout),
        }
    }

    pub fn locks(&self) -> &UnitLocks {
        &self.locks
    }

    /// Takes the unit lock, refusing unknown units so the lock registry only ever holds
    /// real unit ids.
    async fn lock_existing(&self, unit_id: Uuid) -> Result<OwnedMutexGuard<()>, AppError> {
        self.state.read().await.unit(unit_id)?;
        self.locks.acquire(unit_id).await
    }

    pub async fn insert_unit(&self, name: &str) -> Unit {
        let unit = Unit {
            id: Uuid::new_v4(),
            name: name.to_string(),
            responsible_name: None,
            responsible_email: None,
            active: true,
            created_at: Utc::now(),
        };
        self.put_unit(unit.clone()).await;
        unit
    }

    pub async fn put_unit(&self, unit: Unit) {
        self.state.write().await.units.insert(unit.id, unit);
    }

    /// Registers an active agent and makes it a member of `unit_id`.
    pub async fn insert_agent(&self, unit_id: Uuid, name: &str) -> Agent {
        let agent = Agent {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: format!("{}@imob.com.br", name.to_lowercase()),
            phone: None,
            active: true,
        };
        self.put_agent(agent.clone()).await;
        self.add_member(unit_id, agent.id).await;
        agent
    }

    pub async fn put_agent(&self, agent: Agent) {
        self.state.write().await.agents.insert(agent.id, agent);
    }

    pub async fn add_member(&self, unit_id: Uuid, agent_id: Uuid) {
        let mut state = self.state.write().await;
        let members = state.members.entry(unit_id).or_default();
        if !members.contains(&agent_id) {
            members.push(agent_id);
        }
    }

    /// Deletes an agent with its memberships, queue slots and absences, the way the
    /// database cascades. Remaining queue positions close the gap.
    pub async fn remove_agent(&self, agent_id: Uuid) {
        let mut state = self.state.write().await;
        state.agents.remove(&agent_id);
        for members in state.members.values_mut() {
            members.retain(|id| *id != agent_id);
        }
        for queue in state.queues.values_mut() {
            queue.retain(|id| *id != agent_id);
        }
        state.absences.retain(|a| a.agent_id != agent_id);
    }

    pub async fn set_agent_active(&self, agent_id: Uuid, active: bool) {
        if let Some(agent) = self.state.write().await.agents.get_mut(&agent_id) {
            agent.active = active;
        }
    }

    /// Arms a one-shot failure for the next rotation that reaches `point`.
    pub async fn inject_failure(&self, point: FailPoint) {
        self.state.write().await.fail_point = Some(point);
    }

    /// The unit's history in commit order, oldest first.
    pub async fn assignment_log(&self, unit_id: Uuid) -> Vec<AssignmentLogEntry> {
        self.state
            .read()
            .await
            .log
            .iter()
            .filter(|e| e.unit_id == unit_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AgentRegistry for MemoryLeadQueueStore {
    async fn list_units(&self) -> Result<Vec<Unit>, AppError> {
        let state = self.state.read().await;
        let mut units: Vec<Unit> = state.units.values().cloned().collect();
        units.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(units)
    }

    async fn get_unit(&self, unit_id: Uuid) -> Result<Unit, AppError> {
        self.state.read().await.unit(unit_id).cloned()
    }

    async fn get_agent(&self, agent_id: Uuid) -> Result<Agent, AppError> {
        self.state
            .read()
            .await
            .agents
            .get(&agent_id)
            .cloned()
            .ok_or_else(|| agent_not_found(agent_id))
    }

    async fn list_members(
        &self,
        unit_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<UnitMember>, AppError> {
        let state = self.state.read().await;
        state.unit(unit_id)?;
        let absent = state.absent_at(unit_id, now);

        let mut members: Vec<UnitMember> = state
            .members
            .get(&unit_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.agents.get(id))
            .map(|agent| UnitMember {
                agent: agent.clone(),
                absent: absent.contains(&agent.id),
            })
            .collect();
        members.sort_by(|a, b| a.agent.name.cmp(&b.agent.name));
        Ok(members)
    }

    async fn absent_agents(
        &self,
        unit_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<HashSet<Uuid>, AppError> {
        Ok(self.state.read().await.absent_at(unit_id, now))
    }
}

#[async_trait]
impl AbsenceStore for MemoryLeadQueueStore {
    async fn list_absences(
        &self,
        unit_id: Uuid,
        filter: &AbsenceFilter,
    ) -> Result<Vec<Absence>, AppError> {
        let state = self.state.read().await;
        state.unit(unit_id)?;

        let mut absences: Vec<Absence> = state
            .absences
            .iter()
            .filter(|a| a.unit_id == unit_id)
            .filter(|a| filter.agent_id.map_or(true, |id| a.agent_id == id))
            .filter(|a| a.overlaps(filter.from, filter.to))
            .cloned()
            .collect();
        absences.sort_by_key(|a| a.starts_at);
        Ok(absences)
    }

    async fn create_absence(
        &self,
        unit_id: Uuid,
        request: &AbsenceRequest,
    ) -> Result<Absence, AppError> {
        let mut state = self.state.write().await;
        state.unit(unit_id)?;
        state.checked_agent(request.agent_id)?;
        validate_absence(request)?;

        let absence = Absence {
            id: Uuid::new_v4(),
            unit_id,
            agent_id: request.agent_id,
            starts_at: request.starts_at,
            ends_at: request.ends_at,
            reason: request.reason.clone(),
            created_by: request.created_by.clone(),
            created_at: Utc::now(),
        };
        state.absences.push(absence.clone());
        Ok(absence)
    }

    async fn update_absence(
        &self,
        unit_id: Uuid,
        absence_id: Uuid,
        request: &AbsenceRequest,
    ) -> Result<Absence, AppError> {
        let mut state = self.state.write().await;
        state.unit(unit_id)?;
        state.checked_agent(request.agent_id)?;
        validate_absence(request)?;

        let absence = state
            .absences
            .iter_mut()
            .find(|a| a.id == absence_id && a.unit_id == unit_id)
            .ok_or_else(|| absence_not_found(absence_id))?;
        absence.agent_id = request.agent_id;
        absence.starts_at = request.starts_at;
        absence.ends_at = request.ends_at;
        absence.reason = request.reason.clone();
        absence.created_by = request.created_by.clone();
        Ok(absence.clone())
    }

    async fn delete_absence(&self, unit_id: Uuid, absence_id: Uuid) -> Result<(), AppError> {
        let mut state = self.state.write().await;
        let before = state.absences.len();
        state
            .absences
            .retain(|a| !(a.id == absence_id && a.unit_id == unit_id));

        if state.absences.len() == before {
            return Err(absence_not_found(absence_id));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueStore for MemoryLeadQueueStore {
    async fn get_queue(&self, unit_id: Uuid) -> Result<Vec<QueueEntry>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .queues
            .get(&unit_id)
            .map(|ids| queue_entries(unit_id, ids))
            .unwrap_or_default())
    }

    async fn get_queue_view(
        &self,
        unit_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueViewEntry>, AppError> {
        let state = self.state.read().await;
        let absent = state.absent_at(unit_id, now);

        Ok(state
            .slots(unit_id)?
            .into_iter()
            .map(|slot| QueueViewEntry {
                position: slot.position,
                agent_id: slot.agent.id,
                absent: absent.contains(&slot.agent.id),
                name: slot.agent.name,
                email: slot.agent.email,
                phone: slot.agent.phone,
                active: slot.agent.active,
            })
            .collect())
    }

    async fn replace_queue(
        &self,
        unit_id: Uuid,
        agent_ids: &[Uuid],
    ) -> Result<Vec<QueueEntry>, AppError> {
        let _guard = self.lock_existing(unit_id).await?;
        let mut state = self.state.write().await;

        state.unit(unit_id)?;
        validate_queue_ids(agent_ids)?;
        let agents: Vec<Agent> = agent_ids
            .iter()
            .filter_map(|id| state.agents.get(id).cloned())
            .collect();
        validate_queue_agents(agent_ids, &agents)?;

        state.queues.insert(unit_id, agent_ids.to_vec());
        tracing::info!("Queue for unit {} replaced with {} agents", unit_id, agent_ids.len());
        Ok(queue_entries(unit_id, agent_ids))
    }

    async fn is_active(&self, unit_id: Uuid) -> Result<bool, AppError> {
        Ok(self.state.read().await.unit(unit_id)?.active)
    }

    async fn set_active(&self, unit_id: Uuid, active: bool) -> Result<Unit, AppError> {
        let mut state = self.state.write().await;
        let unit = state
            .units
            .get_mut(&unit_id)
            .ok_or_else(|| unit_not_found(unit_id))?;
        unit.active = active;
        Ok(unit.clone())
    }
}

#[async_trait]
impl AssignmentLog for MemoryLeadQueueStore {
    async fn list_assignments(
        &self,
        unit_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<AssignmentPage, AppError> {
        let state = self.state.read().await;
        state.unit(unit_id)?;

        let entries: Vec<&AssignmentLogEntry> = state
            .log
            .iter()
            .rev()
            .filter(|e| e.unit_id == unit_id)
            .collect();
        let items = entries
            .iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .map(|e| (*e).clone())
            .collect();

        Ok(AssignmentPage {
            items,
            total: entries.len() as i64,
            limit,
            offset,
        })
    }

    async fn clear_assignments(&self, unit_id: Uuid) -> Result<u64, AppError> {
        let mut state = self.state.write().await;
        state.unit(unit_id)?;

        let before = state.log.len();
        state.log.retain(|e| e.unit_id != unit_id);
        Ok((before - state.log.len()) as u64)
    }
}

#[async_trait]
impl RotationStore for MemoryLeadQueueStore {
    async fn rotate(
        &self,
        unit_id: Uuid,
        request: &RotationRequest,
    ) -> Result<Assignment, AppError> {
        let _guard = self.lock_existing(unit_id).await?;
        let now = request.now.unwrap_or_else(Utc::now);

        let snapshot = self.state.read().await.snapshot(unit_id, now)?;
        let plan = rotation::plan_for_snapshot(&snapshot)?;
        let entry = rotation::build_log_entry(&snapshot.unit, &plan, request, now);

        let mut state = self.state.write().await;
        let staged_queue = plan.new_order;
        state.trip(FailPoint::AfterQueueWrite)?;
        let staged_log = entry.clone();
        state.trip(FailPoint::AfterLogAppend)?;

        state.queues.insert(unit_id, staged_queue);
        state.log.push(staged_log);

        Ok(Assignment::from_log(&snapshot.unit, &entry))
    }
}
