use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::errors::{AppError, ResultExt};
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

/// PostgreSQL storage for units, queues, absences and the assignment log.
///
/// Queue mutations of one unit are serialized twice: by the in-process [`UnitLocks`] and by
/// a `FOR UPDATE` lock on the unit row, which also covers other processes sharing the
/// database. Both waits are bounded by the same timeout.
pub struct PgLeadQueueStorage {
    pool: PgPool,
    locks: UnitLocks,
}

#[derive(sqlx::FromRow)]
struct SlotRow {
    position: i32,
    #[sqlx(flatten)]
    agent: Agent,
}

impl PgLeadQueueStorage {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self {
            pool,
            locks: UnitLocks::new(lock_timeout),
        }
    }

    pub fn locks(&self) -> &UnitLocks {
        &self.locks
    }

    /// Takes the in-process unit lock, refusing unknown units so the lock registry only
    /// ever holds real unit ids.
    async fn lock_existing(&self, unit_id: Uuid) -> Result<OwnedMutexGuard<()>, AppError> {
        self.get_unit(unit_id).await?;
        self.locks.acquire(unit_id).await
    }

    /// Renumbers a unit's positions to `1..=N`, keeping the current relative order.
    ///
    /// Used by the integrity tool to repair gaps or duplicates left by manual edits.
    pub async fn renumber_queue(&self, unit_id: Uuid) -> Result<u64, AppError> {
        let _guard = self.lock_existing(unit_id).await?;
        let mut tx = self.pool.begin().await?;
        set_lock_timeout(&mut tx, self.locks.timeout()).await?;
        lock_unit(&mut tx, unit_id).await?;

        let result = sqlx::query(
            r#"
            UPDATE queue_entries q
            SET position = r.rn
            FROM (
                SELECT agent_id, row_number() OVER (ORDER BY position, agent_id)::int AS rn
                FROM queue_entries
                WHERE unit_id = $1
            ) r
            WHERE q.unit_id = $1 AND q.agent_id = r.agent_id AND q.position <> r.rn
            "#,
        )
        .bind(unit_id)
        .execute(&mut *tx)
        .await
        .context("renumbering queue positions")?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }
}

/// Bounds row-lock waits for the rest of the transaction.
async fn set_lock_timeout(conn: &mut PgConnection, timeout: Duration) -> Result<(), AppError> {
    sqlx::query("SELECT set_config('lock_timeout', $1, true)")
        .bind(format!("{}ms", timeout.as_millis().max(1)))
        .execute(&mut *conn)
        .await
        .context("setting lock_timeout")?;
    Ok(())
}

/// Loads the unit and holds its row lock until the transaction ends.
async fn lock_unit(conn: &mut PgConnection, unit_id: Uuid) -> Result<Unit, AppError> {
    sqlx::query_as::<_, Unit>(
        r#"
        SELECT id, name, responsible_name, responsible_email, active, created_at
        FROM units
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(unit_id)
    .fetch_optional(&mut *conn)
    .await
    .context("locking unit")?
    .ok_or_else(|| unit_not_found(unit_id))
}

/// Wall-clock time of the database server, shared by every process rotating a unit.
async fn database_clock(conn: &mut PgConnection) -> Result<DateTime<Utc>, AppError> {
    sqlx::query_scalar::<_, DateTime<Utc>>("SELECT clock_timestamp()")
        .fetch_one(&mut *conn)
        .await
        .context("reading database clock")
}

async fn load_slots(conn: &mut PgConnection, unit_id: Uuid) -> Result<Vec<QueueSlot>, AppError> {
    let rows = sqlx::query_as::<_, SlotRow>(
        r#"
        SELECT q.position, a.id, a.name, a.email, a.phone, a.active
        FROM queue_entries q
        JOIN agents a ON a.id = q.agent_id
        WHERE q.unit_id = $1
        ORDER BY q.position ASC
        "#,
    )
    .bind(unit_id)
    .fetch_all(&mut *conn)
    .await
    .context("loading queue")?;

    Ok(rows
        .into_iter()
        .map(|row| QueueSlot {
            agent: row.agent,
            position: row.position,
        })
        .collect())
}

async fn load_absent(
    conn: &mut PgConnection,
    unit_id: Uuid,
    now: DateTime<Utc>,
) -> Result<HashSet<Uuid>, AppError> {
    let ids = sqlx::query_scalar::<_, Uuid>(
        r#"
        SELECT DISTINCT agent_id
        FROM absences
        WHERE unit_id = $1 AND starts_at <= $2 AND ends_at > $2
        "#,
    )
    .bind(unit_id)
    .bind(now)
    .fetch_all(&mut *conn)
    .await
    .context("loading absences")?;

    Ok(ids.into_iter().collect())
}

/// Deletes the unit's entries and bulk-inserts `agent_ids` at positions `1..=N`.
async fn write_queue(
    conn: &mut PgConnection,
    unit_id: Uuid,
    agent_ids: &[Uuid],
) -> Result<(), AppError> {
    sqlx::query("DELETE FROM queue_entries WHERE unit_id = $1")
        .bind(unit_id)
        .execute(&mut *conn)
        .await
        .context("clearing queue")?;

    sqlx::query(
        r#"
        INSERT INTO queue_entries (unit_id, agent_id, position)
        SELECT $1, t.agent_id, t.ord::int
        FROM UNNEST($2::uuid[]) WITH ORDINALITY AS t(agent_id, ord)
        "#,
    )
    .bind(unit_id)
    .bind(agent_ids)
    .execute(&mut *conn)
    .await
    .context("inserting queue order")?;

    Ok(())
}

async fn insert_log(conn: &mut PgConnection, entry: &AssignmentLogEntry) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO assignment_log (
            id, unit_id, agent_id, agent_name, agent_email, agent_phone,
            unit_name, unit_responsible_name, unit_responsible_email,
            previous_position, lead_id, assigned_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(entry.id)
    .bind(entry.unit_id)
    .bind(entry.agent_id)
    .bind(&entry.agent_name)
    .bind(&entry.agent_email)
    .bind(&entry.agent_phone)
    .bind(&entry.unit_name)
    .bind(&entry.unit_responsible_name)
    .bind(&entry.unit_responsible_email)
    .bind(entry.previous_position)
    .bind(&entry.lead_id)
    .bind(entry.assigned_at)
    .execute(&mut *conn)
    .await
    .context("appending assignment log")?;

    Ok(())
}

#[async_trait]
impl AgentRegistry for PgLeadQueueStorage {
    async fn list_units(&self) -> Result<Vec<Unit>, AppError> {
        let units = sqlx::query_as::<_, Unit>(
            "SELECT id, name, responsible_name, responsible_email, active, created_at FROM units ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(units)
    }

    async fn get_unit(&self, unit_id: Uuid) -> Result<Unit, AppError> {
        sqlx::query_as::<_, Unit>(
            "SELECT id, name, responsible_name, responsible_email, active, created_at FROM units WHERE id = $1",
        )
        .bind(unit_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| unit_not_found(unit_id))
    }

    async fn get_agent(&self, agent_id: Uuid) -> Result<Agent, AppError> {
        sqlx::query_as::<_, Agent>("SELECT id, name, email, phone, active FROM agents WHERE id = $1")
            .bind(agent_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| agent_not_found(agent_id))
    }

    async fn list_members(
        &self,
        unit_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<UnitMember>, AppError> {
        self.get_unit(unit_id).await?;

        let members = sqlx::query_as::<_, UnitMember>(
            r#"
            SELECT a.id, a.name, a.email, a.phone, a.active,
                   EXISTS (
                       SELECT 1 FROM absences ab
                       WHERE ab.unit_id = m.unit_id AND ab.agent_id = a.id
                         AND ab.starts_at <= $2 AND ab.ends_at > $2
                   ) AS absent
            FROM unit_agents m
            JOIN agents a ON a.id = m.agent_id
            WHERE m.unit_id = $1
            ORDER BY a.name
            "#,
        )
        .bind(unit_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(members)
    }

    async fn absent_agents(
        &self,
        unit_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<HashSet<Uuid>, AppError> {
        let mut conn = self.pool.acquire().await?;
        load_absent(&mut conn, unit_id, now).await
    }
}

#[async_trait]
impl AbsenceStore for PgLeadQueueStorage {
    async fn list_absences(
        &self,
        unit_id: Uuid,
        filter: &AbsenceFilter,
    ) -> Result<Vec<Absence>, AppError> {
        self.get_unit(unit_id).await?;

        let absences = sqlx::query_as::<_, Absence>(
            r#"
            SELECT id, unit_id, agent_id, starts_at, ends_at, reason, created_by, created_at
            FROM absences
            WHERE unit_id = $1
              AND ($2::uuid IS NULL OR agent_id = $2)
              AND ($3::timestamptz IS NULL OR ends_at > $3)
              AND ($4::timestamptz IS NULL OR starts_at < $4)
            ORDER BY starts_at ASC
            "#,
        )
        .bind(unit_id)
        .bind(filter.agent_id)
        .bind(filter.from)
        .bind(filter.to)
        .fetch_all(&self.pool)
        .await?;
        Ok(absences)
    }

    async fn create_absence(
        &self,
        unit_id: Uuid,
        request: &AbsenceRequest,
    ) -> Result<Absence, AppError> {
        self.get_unit(unit_id).await?;
        ensure_agent_active(&self.get_agent(request.agent_id).await?)?;
        validate_absence(request)?;

        let absence = sqlx::query_as::<_, Absence>(
            r#"
            INSERT INTO absences (id, unit_id, agent_id, starts_at, ends_at, reason, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, unit_id, agent_id, starts_at, ends_at, reason, created_by, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(unit_id)
        .bind(request.agent_id)
        .bind(request.starts_at)
        .bind(request.ends_at)
        .bind(&request.reason)
        .bind(&request.created_by)
        .fetch_one(&self.pool)
        .await
        .context("creating absence")?;

        tracing::info!(
            "Absence {} registered for agent {} in unit {}",
            absence.id,
            absence.agent_id,
            unit_id
        );
        Ok(absence)
    }

    async fn update_absence(
        &self,
        unit_id: Uuid,
        absence_id: Uuid,
        request: &AbsenceRequest,
    ) -> Result<Absence, AppError> {
        self.get_unit(unit_id).await?;
        ensure_agent_active(&self.get_agent(request.agent_id).await?)?;
        validate_absence(request)?;

        sqlx::query_as::<_, Absence>(
            r#"
            UPDATE absences
            SET agent_id = $3, starts_at = $4, ends_at = $5, reason = $6, created_by = $7
            WHERE id = $1 AND unit_id = $2
            RETURNING id, unit_id, agent_id, starts_at, ends_at, reason, created_by, created_at
            "#,
        )
        .bind(absence_id)
        .bind(unit_id)
        .bind(request.agent_id)
        .bind(request.starts_at)
        .bind(request.ends_at)
        .bind(&request.reason)
        .bind(&request.created_by)
        .fetch_optional(&self.pool)
        .await
        .context("updating absence")?
        .ok_or_else(|| absence_not_found(absence_id))
    }

    async fn delete_absence(&self, unit_id: Uuid, absence_id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM absences WHERE id = $1 AND unit_id = $2")
            .bind(absence_id)
            .bind(unit_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(absence_not_found(absence_id));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueStore for PgLeadQueueStorage {
    async fn get_queue(&self, unit_id: Uuid) -> Result<Vec<QueueEntry>, AppError> {
        let entries = sqlx::query_as::<_, QueueEntry>(
            "SELECT unit_id, agent_id, position FROM queue_entries WHERE unit_id = $1 ORDER BY position ASC",
        )
        .bind(unit_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    async fn get_queue_view(
        &self,
        unit_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueViewEntry>, AppError> {
        let entries = sqlx::query_as::<_, QueueViewEntry>(
            r#"
            SELECT q.position, a.id AS agent_id, a.name, a.email, a.phone, a.active,
                   EXISTS (
                       SELECT 1 FROM absences ab
                       WHERE ab.unit_id = q.unit_id AND ab.agent_id = q.agent_id
                         AND ab.starts_at <= $2 AND ab.ends_at > $2
                   ) AS absent
            FROM queue_entries q
            JOIN agents a ON a.id = q.agent_id
            WHERE q.unit_id = $1
            ORDER BY q.position ASC
            "#,
        )
        .bind(unit_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    async fn replace_queue(
        &self,
        unit_id: Uuid,
        agent_ids: &[Uuid],
    ) -> Result<Vec<QueueEntry>, AppError> {
        let _guard = self.lock_existing(unit_id).await?;
        let mut tx = self.pool.begin().await?;
        set_lock_timeout(&mut tx, self.locks.timeout()).await?;
        lock_unit(&mut tx, unit_id).await?;

        validate_queue_ids(agent_ids)?;
        let agents = sqlx::query_as::<_, Agent>(
            "SELECT id, name, email, phone, active FROM agents WHERE id = ANY($1)",
        )
        .bind(agent_ids)
        .fetch_all(&mut *tx)
        .await
        .context("loading agents for queue")?;
        validate_queue_agents(agent_ids, &agents)?;

        write_queue(&mut tx, unit_id, agent_ids).await?;
        tx.commit().await.context("committing queue replacement")?;

        tracing::info!(
            "Queue for unit {} replaced with {} agents",
            unit_id,
            agent_ids.len()
        );
        self.get_queue(unit_id).await
    }

    async fn is_active(&self, unit_id: Uuid) -> Result<bool, AppError> {
        sqlx::query_scalar::<_, bool>("SELECT active FROM units WHERE id = $1")
            .bind(unit_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| unit_not_found(unit_id))
    }

    async fn set_active(&self, unit_id: Uuid, active: bool) -> Result<Unit, AppError> {
        sqlx::query_as::<_, Unit>(
            r#"
            UPDATE units SET active = $2
            WHERE id = $1
            RETURNING id, name, responsible_name, responsible_email, active, created_at
            "#,
        )
        .bind(unit_id)
        .bind(active)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| unit_not_found(unit_id))
    }
}

#[async_trait]
impl AssignmentLog for PgLeadQueueStorage {
    async fn list_assignments(
        &self,
        unit_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<AssignmentPage, AppError> {
        self.get_unit(unit_id).await?;

        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM assignment_log WHERE unit_id = $1",
        )
        .bind(unit_id)
        .fetch_one(&self.pool)
        .await?;

        let items = sqlx::query_as::<_, AssignmentLogEntry>(
            r#"
            SELECT id, unit_id, agent_id, agent_name, agent_email, agent_phone,
                   unit_name, unit_responsible_name, unit_responsible_email,
                   previous_position, lead_id, assigned_at
            FROM assignment_log
            WHERE unit_id = $1
            ORDER BY assigned_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(unit_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(AssignmentPage {
            items,
            total,
            limit,
            offset,
        })
    }

    async fn clear_assignments(&self, unit_id: Uuid) -> Result<u64, AppError> {
        self.get_unit(unit_id).await?;

        let result = sqlx::query("DELETE FROM assignment_log WHERE unit_id = $1")
            .bind(unit_id)
            .execute(&self.pool)
            .await?;

        tracing::info!(
            "Cleared {} assignment log entries for unit {}",
            result.rows_affected(),
            unit_id
        );
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RotationStore for PgLeadQueueStorage {
    async fn rotate(
        &self,
        unit_id: Uuid,
        request: &RotationRequest,
    ) -> Result<Assignment, AppError> {
        let _guard = self.lock_existing(unit_id).await?;

        // Dropping `tx` on any early return rolls back both writes.
        let mut tx = self.pool.begin().await.context("opening rotation transaction")?;
        set_lock_timeout(&mut tx, self.locks.timeout()).await?;

        let unit = lock_unit(&mut tx, unit_id).await?;
        let now = match request.now {
            Some(now) => now,
            None => database_clock(&mut tx).await?,
        };
        let slots = load_slots(&mut tx, unit_id).await?;
        let absent = load_absent(&mut tx, unit_id, now).await?;
        let snapshot = RotationSnapshot {
            unit,
            slots,
            absent,
        };

        let plan = rotation::plan_for_snapshot(&snapshot)?;
        let entry = rotation::build_log_entry(&snapshot.unit, &plan, request, now);

        write_queue(&mut tx, unit_id, &plan.new_order).await?;
        insert_log(&mut tx, &entry).await?;
        tx.commit().await.context("committing rotation")?;

        tracing::info!(
            "Unit {} rotated: agent {} selected from position {}",
            unit_id,
            entry.agent_id,
            entry.previous_position
        );
        Ok(Assignment::from_log(&snapshot.unit, &entry))
    }
}
