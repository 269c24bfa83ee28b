use std::collections::HashSet;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use rust_roleta_api::db::Database;
use rust_roleta_api::db_storage::PgLeadQueueStorage;
use rust_roleta_api::errors::ErrorKind;
use rust_roleta_api::rotation::RotationRequest;
use rust_roleta_api::store::{AssignmentLog, QueueStore, RotationStore};

/// Integration tests against a real PostgreSQL database.
/// Marked ignored to avoid running against production by accident; set TEST_DATABASE_URL to run.
async fn connect() -> anyhow::Result<Database> {
    let db_url = env::var("TEST_DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("Set TEST_DATABASE_URL to run this test"))?;

    let db = Database::new(&db_url, 10).await?;
    db.migrate().await?;
    Ok(db)
}

/// Creates a fresh unit with `n` member agents and returns their ids.
async fn seed_unit(db: &Database, n: usize) -> anyhow::Result<(Uuid, Vec<Uuid>)> {
    let unit_id = Uuid::new_v4();
    sqlx::query("INSERT INTO units (id, name) VALUES ($1, $2)")
        .bind(unit_id)
        .bind(format!("Unidade {}", &unit_id.to_string()[..8]))
        .execute(&db.pool)
        .await?;

    let mut agents = Vec::with_capacity(n);
    for i in 0..n {
        let agent_id = Uuid::new_v4();
        sqlx::query("INSERT INTO agents (id, name, email) VALUES ($1, $2, $3)")
            .bind(agent_id)
            .bind(format!("Corretor {}", i))
            .bind(format!("corretor{}.{}@imob.com.br", i, agent_id.simple()))
            .execute(&db.pool)
            .await?;
        sqlx::query("INSERT INTO unit_agents (unit_id, agent_id) VALUES ($1, $2)")
            .bind(unit_id)
            .bind(agent_id)
            .execute(&db.pool)
            .await?;
        agents.push(agent_id);
    }

    Ok((unit_id, agents))
}

#[tokio::test]
#[ignore]
async fn rotation_rewrites_queue_and_logs() -> anyhow::Result<()> {
    let db = connect().await?;
    let storage = PgLeadQueueStorage::new(db.pool.clone(), Duration::from_secs(5));
    let (unit_id, agents) = seed_unit(&db, 3).await?;

    storage.replace_queue(unit_id, &agents).await?;

    let first = storage.rotate(unit_id, &RotationRequest::now().with_lead("lead-1")).await?;
    assert_eq!(first.agent.id, agents[0]);
    assert_eq!(first.previous_position, 1);

    let order: Vec<Uuid> = storage
        .get_queue(unit_id)
        .await?
        .into_iter()
        .map(|e| e.agent_id)
        .collect();
    assert_eq!(order, vec![agents[1], agents[2], agents[0]]);

    let page = storage.list_assignments(unit_id, 10, 0).await?;
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].lead_id.as_deref(), Some("lead-1"));

    assert_eq!(storage.clear_assignments(unit_id).await?, 1);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn concurrent_rotations_select_distinct_agents() -> anyhow::Result<()> {
    let db = connect().await?;
    let storage = Arc::new(PgLeadQueueStorage::new(
        db.pool.clone(),
        Duration::from_secs(5),
    ));
    let (unit_id, agents) = seed_unit(&db, 6).await?;
    storage.replace_queue(unit_id, &agents).await?;

    let handles: Vec<_> = (0..agents.len())
        .map(|_| {
            let storage = storage.clone();
            tokio::spawn(async move { storage.rotate(unit_id, &RotationRequest::now()).await })
        })
        .collect();

    let mut selected = HashSet::new();
    for handle in handles {
        let assignment = handle.await??;
        assert!(selected.insert(assignment.agent.id));
    }
    assert_eq!(selected.len(), agents.len());

    let page = storage.list_assignments(unit_id, 50, 0).await?;
    let mut committed: Vec<Uuid> = page.items.iter().map(|e| e.agent_id).collect();
    committed.reverse();
    assert_eq!(committed, agents);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn empty_queue_leaves_log_untouched() -> anyhow::Result<()> {
    let db = connect().await?;
    let storage = PgLeadQueueStorage::new(db.pool.clone(), Duration::from_secs(5));
    let (unit_id, _) = seed_unit(&db, 0).await?;

    let err = storage
        .rotate(unit_id, &RotationRequest::now())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EmptyQueue);
    assert_eq!(storage.list_assignments(unit_id, 10, 0).await?.total, 0);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn renumber_repairs_position_gaps() -> anyhow::Result<()> {
    let db = connect().await?;
    let storage = PgLeadQueueStorage::new(db.pool.clone(), Duration::from_secs(5));
    let (unit_id, agents) = seed_unit(&db, 3).await?;
    storage.replace_queue(unit_id, &agents).await?;

    sqlx::query("UPDATE queue_entries SET position = position * 10 WHERE unit_id = $1")
        .bind(unit_id)
        .execute(&db.pool)
        .await?;

    assert_eq!(storage.renumber_queue(unit_id).await?, 3);
    let positions: Vec<i32> = storage
        .get_queue(unit_id)
        .await?
        .into_iter()
        .map(|e| e.position)
        .collect();
    assert_eq!(positions, vec![1, 2, 3]);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn unknown_unit_is_rejected_before_locking() -> anyhow::Result<()> {
    let db = connect().await?;
    let storage = PgLeadQueueStorage::new(db.pool.clone(), Duration::from_secs(5));

    for _ in 0..50 {
        let err = storage
            .rotate(Uuid::new_v4(), &RotationRequest::now())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
    assert_eq!(storage.locks().registered().await, 0);
    Ok(())
}
