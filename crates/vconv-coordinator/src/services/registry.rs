//! Worker registry: registration, heartbeats, operator-requested
//! retirement.

use tracing::{info, warn};

use vconv_events::{EventBus, TaskAction, TaskEvent};
use vconv_models::{OfflineMode, Worker, WorkerKind};
use vconv_store::CatalogStore;

use crate::error::{ApiError, ApiResult};
use crate::services::liveness::WORKER_OFFLINE_MESSAGE;

pub struct WorkerRegistry {
    catalog: CatalogStore,
    events: EventBus,
    heartbeat_timeout: chrono::Duration,
}

impl WorkerRegistry {
    pub fn new(
        catalog: CatalogStore,
        events: EventBus,
        heartbeat_timeout: chrono::Duration,
    ) -> Self {
        Self {
            catalog,
            events,
            heartbeat_timeout,
        }
    }

    /// Create or revive a worker row.
    ///
    /// A fresh heartbeat on an existing row means the name is held by a
    /// live instance: conflict. An expired row is reclaimed; any task it
    /// still holds is cascade-failed first, and the new instance starts
    /// clean with the capabilities it just declared.
    pub async fn register(
        &self,
        name: &str,
        kind: WorkerKind,
        supports_vr: bool,
    ) -> ApiResult<Worker> {
        let mut tx = self.catalog.begin().await?;
        let existing = self.catalog.lock_worker_by_name(&mut tx, name).await?;

        let (worker, orphan_event) = match existing {
            None => {
                let worker = self
                    .catalog
                    .insert_worker(&mut tx, name, kind, supports_vr)
                    .await
                    .map_err(|e| {
                        if e.is_duplicate() {
                            ApiError::conflict(format!("worker name '{name}' already registered"))
                        } else {
                            ApiError::Store(e)
                        }
                    })?;
                info!(worker = name, kind = %kind, "registered new worker");
                (worker, None)
            }
            Some(existing) => {
                if !existing.heartbeat_expired(chrono::Utc::now(), self.heartbeat_timeout) {
                    return Err(ApiError::conflict(format!(
                        "worker name '{name}' is held by a live instance"
                    )));
                }

                // Reclaim: fail whatever the dead instance left running
                let mut orphan_event = None;
                if let Some(task_id) = existing.current_task_id {
                    if let Some(task) = self.catalog.lock_task(&mut tx, task_id).await? {
                        if !task.status.is_terminal() {
                            warn!(
                                worker = name,
                                task_id = %task.task_uuid,
                                "failing orphan task during re-registration"
                            );
                            let failed = super::fail_task_in_tx(
                                &self.catalog,
                                &mut tx,
                                &task,
                                WORKER_OFFLINE_MESSAGE,
                            )
                            .await?;
                            orphan_event =
                                Some(TaskEvent::new(TaskAction::Failed, failed.descriptor()));
                        }
                    }
                }

                let worker = self
                    .catalog
                    .revive_worker(&mut tx, existing.id, kind, supports_vr)
                    .await?;
                info!(worker = name, kind = %kind, "reclaimed expired worker registration");
                (worker, orphan_event)
            }
        };

        tx.commit().await.map_err(vconv_store::StoreError::from)?;
        if let Some(event) = orphan_event {
            self.events.publish(event);
        }
        Ok(worker)
    }

    /// Stamp a heartbeat; an Offline worker flips back to Idle.
    pub async fn heartbeat(&self, worker_id: i64, name: &str) -> ApiResult<()> {
        let matched = self.catalog.record_heartbeat(worker_id, name).await?;
        if !matched {
            return Err(ApiError::not_found(format!(
                "no worker {worker_id} named '{name}'"
            )));
        }
        Ok(())
    }

    /// Flag a worker for retirement; the dispatcher reads the flag and
    /// refuses further assignments.
    pub async fn request_offline(&self, worker_id: i64, mode: OfflineMode) -> ApiResult<()> {
        let found = self.catalog.set_offline_request(worker_id, mode).await?;
        if !found {
            return Err(ApiError::not_found(format!("no worker {worker_id}")));
        }
        info!(worker_id, mode = ?mode, "offline requested");
        Ok(())
    }

    pub async fn cancel_offline(&self, worker_id: i64) -> ApiResult<()> {
        let found = self
            .catalog
            .set_offline_request(worker_id, OfflineMode::None)
            .await?;
        if !found {
            return Err(ApiError::not_found(format!("no worker {worker_id}")));
        }
        Ok(())
    }
}
