//! Checks every unit's queue for position gaps or duplicates and optionally repairs them.
//!
//! Usage: `check_queue_integrity [--repair]`

use chrono::Utc;
use rust_roleta_api::config::Config;
use rust_roleta_api::db::Database;
use rust_roleta_api::db_storage::PgLeadQueueStorage;
use rust_roleta_api::rotation::check_positions;
use rust_roleta_api::store::{AgentRegistry, QueueStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let repair = std::env::args().skip(1).any(|arg| arg == "--repair");

    let config = Config::from_env()?;
    let db = Database::new(&config.database_url, 2).await?;
    let storage = PgLeadQueueStorage::new(db.pool.clone(), config.lock_timeout());

    let units = storage.list_units().await?;
    tracing::info!("Checking queues of {} units", units.len());

    let now = Utc::now();
    let mut broken = 0;

    for unit in &units {
        let entries = storage.get_queue(unit.id).await?;
        let positions: Vec<i32> = entries.iter().map(|e| e.position).collect();

        let inactive = storage
            .get_queue_view(unit.id, now)
            .await?
            .into_iter()
            .filter(|e| !e.active)
            .count();
        if inactive > 0 {
            tracing::warn!(
                "Unit '{}' ({}): {} inactive agents still queued",
                unit.name,
                unit.id,
                inactive
            );
        }

        if let Err(e) = check_positions(&positions) {
            broken += 1;
            tracing::warn!("Unit '{}' ({}): {}", unit.name, unit.id, e);

            if repair {
                let renumbered = storage.renumber_queue(unit.id).await?;
                tracing::info!(
                    "Unit '{}' ({}): renumbered {} entries",
                    unit.name,
                    unit.id,
                    renumbered
                );
            }
        }
    }

    tracing::info!(
        "Integrity check complete: {} of {} units with broken positions{}",
        broken,
        units.len(),
        if repair && broken > 0 { " (repaired)" } else { "" }
    );

    if broken > 0 && !repair {
        std::process::exit(1);
    }

    Ok(())
}
