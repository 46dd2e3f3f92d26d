//! Optional monitoring surface (spec §8): a small async HTTP server
//! exposing live counters and a historical store of race reports, kept
//! entirely outside the synchronous detector core. This is the one place
//! the teacher's axum/sqlx/tracing stack survives the transformation
//! verbatim — it only ever reads a snapshot `main` publishes after each
//! batch of events, never touches `Engine::handle` directly, and is off
//! by default (`MonitoringSection::enabled`).

use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::config::MonitoringSection;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::report::RaceReport;

#[derive(Clone)]
pub struct ApiState {
    metrics: Arc<Metrics>,
    pool: SqlitePool,
}

#[derive(Serialize)]
struct StoredRace {
    id: i64,
    kind: String,
    address: String,
    first_iid: String,
    second_iid: String,
    object: Option<String>,
    recorded_at: String,
}

impl ApiState {
    /// Opens (creating if needed) the SQLite store named by `section` and
    /// runs its one-table migration.
    pub async fn connect(section: &MonitoringSection, metrics: Arc<Metrics>) -> anyhow::Result<Self> {
        let url = format!("sqlite://{}?mode=rwc", section.sqlite_path.display());
        let pool = SqlitePoolOptions::new().max_connections(4).connect(&url).await?;
        Self::migrate(&pool).await?;
        Ok(Self { metrics, pool })
    }

    /// In-memory store, for tests and for `CILKSAN`-style one-shot runs
    /// that don't want a file left behind.
    #[cfg(test)]
    async fn connect_in_memory(metrics: Arc<Metrics>) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await?;
        Self::migrate(&pool).await?;
        Ok(Self { metrics, pool })
    }

    async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS races (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                address TEXT NOT NULL,
                first_iid TEXT NOT NULL,
                second_iid TEXT NOT NULL,
                object TEXT,
                recorded_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Publishes freshly-collected reports into the historical store.
    /// Called by `main`'s replay loop after a batch of events, never from
    /// inside `Engine::handle` itself.
    pub async fn publish(&self, reports: &[RaceReport]) -> anyhow::Result<()> {
        for report in reports {
            sqlx::query(
                "INSERT INTO races (kind, address, first_iid, second_iid, object) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(report.kind.to_string())
            .bind(format!("{:#x}", report.addr))
            .bind(report.first.iid.to_string())
            .bind(report.second.iid.to_string())
            .bind(report.object_descriptor.clone())
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new().route("/metrics", get(metrics_handler)).route("/races", get(races_handler)).with_state(state)
}

async fn metrics_handler(State(state): State<ApiState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

async fn races_handler(State(state): State<ApiState>) -> Json<Vec<StoredRace>> {
    let rows = sqlx::query(
        "SELECT id, kind, address, first_iid, second_iid, object, recorded_at \
         FROM races ORDER BY id DESC LIMIT 200",
    )
    .fetch_all(&state.pool)
    .await
    .unwrap_or_default();

    let races = rows
        .into_iter()
        .map(|row| StoredRace {
            id: row.get("id"),
            kind: row.get("kind"),
            address: row.get("address"),
            first_iid: row.get("first_iid"),
            second_iid: row.get("second_iid"),
            object: row.get("object"),
            recorded_at: row.get("recorded_at"),
        })
        .collect();
    Json(races)
}

/// Binds and serves the monitoring surface until the process exits. Spun
/// up from `main` only when `MonitoringSection::enabled` is set.
pub async fn serve(section: &MonitoringSection, state: ApiState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&section.listen_addr).await?;
    tracing::info!(addr = %section.listen_addr, "monitoring surface listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsu::Dsu;
    use crate::lockset::Lockset;
    use crate::report::NormalizedKind;
    use crate::shadow::AccessRecord;
    use detsan_abi::Iid;

    fn rec(iid: u32, dsu: &mut Dsu) -> AccessRecord {
        AccessRecord { iid: Iid(iid), bid: dsu.make(), lockset: Lockset::empty() }
    }

    #[tokio::test]
    async fn publish_then_metrics_snapshot_and_races_round_trip() {
        let metrics = Arc::new(Metrics::new());
        metrics.inc_events();
        let state = ApiState::connect_in_memory(metrics.clone()).await.unwrap();

        let mut dsu = Dsu::new();
        let report = RaceReport {
            kind: NormalizedKind::ReadWrite,
            addr: 0x4000,
            first: rec(1, &mut dsu),
            second: rec(2, &mut dsu),
            object_descriptor: Some("Global object g".to_string()),
        };
        state.publish(std::slice::from_ref(&report)).await.unwrap();

        let snap = state.metrics.snapshot();
        assert_eq!(snap.events_processed, 1);

        let row = sqlx::query("SELECT kind, object FROM races").fetch_one(&state.pool).await.unwrap();
        let kind: String = row.get("kind");
        let object: Option<String> = row.get("object");
        assert_eq!(kind, "RW");
        assert_eq!(object.as_deref(), Some("Global object g"));
    }
}
