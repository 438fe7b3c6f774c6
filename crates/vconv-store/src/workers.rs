//! Worker fleet repository.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use vconv_models::{OfflineMode, Worker, WorkerKind, WorkerStatus};

use crate::{CatalogStore, Page, StoreResult, Tx};

const WORKER_COLUMNS: &str =
    "id, name, kind, supports_vr, status, last_heartbeat, current_task_id, offline_request";

#[derive(Debug, FromRow)]
struct WorkerRow {
    id: i64,
    name: String,
    kind: i16,
    supports_vr: bool,
    status: i16,
    last_heartbeat: Option<DateTime<Utc>>,
    current_task_id: Option<i64>,
    offline_request: i16,
}

impl TryFrom<WorkerRow> for Worker {
    type Error = crate::StoreError;

    fn try_from(row: WorkerRow) -> Result<Self, Self::Error> {
        Ok(Worker {
            id: row.id,
            name: row.name,
            kind: WorkerKind::try_from(row.kind)?,
            supports_vr: row.supports_vr,
            status: WorkerStatus::try_from(row.status)?,
            last_heartbeat: row.last_heartbeat,
            current_task_id: row.current_task_id,
            offline_request: OfflineMode::try_from(row.offline_request)?,
        })
    }
}

impl CatalogStore {
    /// Register a brand-new worker as Idle with a fresh heartbeat.
    pub async fn insert_worker(
        &self,
        tx: &mut Tx,
        name: &str,
        kind: WorkerKind,
        supports_vr: bool,
    ) -> StoreResult<Worker> {
        let row = sqlx::query_as::<_, WorkerRow>(&format!(
            "INSERT INTO workers (name, kind, supports_vr, status, last_heartbeat) \
             VALUES ($1, $2, $3, $4, NOW()) RETURNING {WORKER_COLUMNS}"
        ))
        .bind(name)
        .bind(i16::from(kind))
        .bind(supports_vr)
        .bind(i16::from(WorkerStatus::Idle))
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| crate::StoreError::on_insert(e, "worker", name))?;
        Worker::try_from(row)
    }

    /// Reclaim an expired name for a new live instance: reset to Idle,
    /// clear task and offline flags, adopt the new capabilities.
    pub async fn revive_worker(
        &self,
        tx: &mut Tx,
        id: i64,
        kind: WorkerKind,
        supports_vr: bool,
    ) -> StoreResult<Worker> {
        let row = sqlx::query_as::<_, WorkerRow>(&format!(
            "UPDATE workers SET kind = $2, supports_vr = $3, status = $4, \
             last_heartbeat = NOW(), current_task_id = NULL, offline_request = 0 \
             WHERE id = $1 RETURNING {WORKER_COLUMNS}"
        ))
        .bind(id)
        .bind(i16::from(kind))
        .bind(supports_vr)
        .bind(i16::from(WorkerStatus::Idle))
        .fetch_one(&mut **tx)
        .await?;
        Worker::try_from(row)
    }

    pub async fn worker_by_id(&self, id: i64) -> StoreResult<Option<Worker>> {
        let row = sqlx::query_as::<_, WorkerRow>(&format!(
            "SELECT {WORKER_COLUMNS} FROM workers WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        row.map(Worker::try_from).transpose()
    }

    /// Lock a worker row by name; registration races serialize here.
    pub async fn lock_worker_by_name(
        &self,
        tx: &mut Tx,
        name: &str,
    ) -> StoreResult<Option<Worker>> {
        let row = sqlx::query_as::<_, WorkerRow>(&format!(
            "SELECT {WORKER_COLUMNS} FROM workers WHERE name = $1 FOR UPDATE"
        ))
        .bind(name)
        .fetch_optional(&mut **tx)
        .await?;
        row.map(Worker::try_from).transpose()
    }

    /// Lock a worker row by id.
    pub async fn lock_worker(&self, tx: &mut Tx, id: i64) -> StoreResult<Option<Worker>> {
        let row = sqlx::query_as::<_, WorkerRow>(&format!(
            "SELECT {WORKER_COLUMNS} FROM workers WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;
        row.map(Worker::try_from).transpose()
    }

    /// Stamp a heartbeat, reviving an Offline worker to Idle. The name must
    /// still match the registration. Returns false when no row matched.
    pub async fn record_heartbeat(&self, id: i64, name: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE workers SET last_heartbeat = NOW(), \
             status = CASE WHEN status = $3 THEN $4 ELSE status END \
             WHERE id = $1 AND name = $2",
        )
        .bind(id)
        .bind(name)
        .bind(i16::from(WorkerStatus::Offline))
        .bind(i16::from(WorkerStatus::Idle))
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Dispatch and progress requests also count as liveness signals.
    pub async fn touch_heartbeat(&self, tx: &mut Tx, id: i64) -> StoreResult<()> {
        sqlx::query("UPDATE workers SET last_heartbeat = NOW() WHERE id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn set_offline_request(&self, id: i64, mode: OfflineMode) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE workers SET offline_request = $2 WHERE id = $1")
            .bind(id)
            .bind(i16::from(mode))
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Busy with a task: status and back-reference move together.
    pub async fn set_worker_busy(&self, tx: &mut Tx, id: i64, task_id: i64) -> StoreResult<()> {
        sqlx::query("UPDATE workers SET status = $2, current_task_id = $3 WHERE id = $1")
            .bind(id)
            .bind(i16::from(WorkerStatus::Busy))
            .bind(task_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Back to Idle with no task attached.
    pub async fn set_worker_idle(&self, tx: &mut Tx, id: i64) -> StoreResult<()> {
        sqlx::query("UPDATE workers SET status = $2, current_task_id = NULL WHERE id = $1")
            .bind(id)
            .bind(i16::from(WorkerStatus::Idle))
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Heartbeat expiry: Offline, pending retirement flags dropped.
    pub async fn set_worker_offline(&self, tx: &mut Tx, id: i64) -> StoreResult<()> {
        sqlx::query(
            "UPDATE workers SET status = $2, current_task_id = NULL, offline_request = 0 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(i16::from(WorkerStatus::Offline))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Workers whose heartbeat predates `cutoff` and are not yet Offline.
    /// Ids only; the sweep re-locks and re-checks each row.
    pub async fn expired_worker_ids(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM workers WHERE status <> $1 \
             AND (last_heartbeat IS NULL OR last_heartbeat < $2)",
        )
        .bind(i16::from(WorkerStatus::Offline))
        .bind(cutoff)
        .fetch_all(self.pool())
        .await?;
        Ok(ids)
    }

    pub async fn list_workers(&self, page: Page) -> StoreResult<(Vec<Worker>, i64)> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM workers")
            .fetch_one(self.pool())
            .await?;
        let rows = sqlx::query_as::<_, WorkerRow>(&format!(
            "SELECT {WORKER_COLUMNS} FROM workers ORDER BY id LIMIT $1 OFFSET $2"
        ))
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(self.pool())
        .await?;
        let workers = rows
            .into_iter()
            .map(Worker::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((workers, total))
    }

    /// Administrative field update; absent fields keep their value.
    pub async fn update_worker(
        &self,
        id: i64,
        name: Option<&str>,
        kind: Option<WorkerKind>,
        supports_vr: Option<bool>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE workers SET name = COALESCE($2, name), kind = COALESCE($3, kind), \
             supports_vr = COALESCE($4, supports_vr) WHERE id = $1",
        )
        .bind(id)
        .bind(name)
        .bind(kind.map(i16::from))
        .bind(supports_vr)
        .execute(self.pool())
        .await
        .map_err(|e| crate::StoreError::on_insert(e, "worker", name.unwrap_or("")))?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_worker(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM workers WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
