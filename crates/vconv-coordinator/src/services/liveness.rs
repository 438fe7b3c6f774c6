//! Liveness monitor: periodic sweeps for dead workers and stalled tasks.
//!
//! Both sweeps are idempotent and safe to interleave: the candidate list
//! is read without locks, then every row is re-locked and re-checked in
//! its own transaction before anything is mutated.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::interval;
use tracing::{error, info, warn};

use vconv_events::{EventBus, TaskAction, TaskEvent};
use vconv_models::WorkerStatus;
use vconv_store::{CatalogStore, StoreResult};

use crate::metrics;

/// Canonical message for tasks lost to a dead worker.
pub const WORKER_OFFLINE_MESSAGE: &str = "Worker offline, task terminated";
/// Canonical message for tasks that stopped reporting progress.
pub const TASK_STALL_MESSAGE: &str = "Task exceeded 60s without update";

pub struct LivenessMonitor {
    catalog: CatalogStore,
    events: EventBus,
    heartbeat_timeout: chrono::Duration,
    stall_timeout: chrono::Duration,
    sweep_interval: Duration,
}

impl LivenessMonitor {
    pub fn new(
        catalog: CatalogStore,
        events: EventBus,
        heartbeat_timeout: chrono::Duration,
        stall_timeout: chrono::Duration,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            catalog,
            events,
            heartbeat_timeout,
            stall_timeout,
            sweep_interval,
        }
    }

    /// Spawn both sweep loops. Each runs on its own timer indefinitely.
    pub fn spawn(self: Arc<Self>) {
        info!(
            interval_secs = self.sweep_interval.as_secs(),
            "starting liveness sweeps"
        );
        let monitor = Arc::clone(&self);
        tokio::spawn(async move {
            let mut ticker = interval(monitor.sweep_interval);
            loop {
                ticker.tick().await;
                if let Err(e) = monitor.sweep_workers_once().await {
                    error!(error = %e, "worker sweep failed");
                }
            }
        });
        tokio::spawn(async move {
            let mut ticker = interval(self.sweep_interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep_tasks_once().await {
                    error!(error = %e, "task sweep failed");
                }
            }
        });
    }

    /// One pass over workers with expired heartbeats. Returns how many
    /// went offline.
    pub async fn sweep_workers_once(&self) -> StoreResult<u32> {
        let cutoff = Utc::now() - self.heartbeat_timeout;
        let ids = self.catalog.expired_worker_ids(cutoff).await?;
        let mut offlined = 0u32;
        for id in ids {
            match self.offline_worker(id).await {
                Ok(true) => offlined += 1,
                Ok(false) => {}
                Err(e) => error!(worker_id = id, error = %e, "failed to offline worker"),
            }
        }
        if offlined > 0 {
            warn!(count = offlined, "workers went offline");
        }
        Ok(offlined)
    }

    /// Offline a single worker, cascade-failing its task if any. The row
    /// is re-checked under lock so a heartbeat that raced the sweep wins.
    async fn offline_worker(&self, worker_id: i64) -> StoreResult<bool> {
        let mut tx = self.catalog.begin().await?;
        let Some(worker) = self.catalog.lock_worker(&mut tx, worker_id).await? else {
            return Ok(false);
        };
        let cutoff_now = Utc::now();
        if worker.status == WorkerStatus::Offline
            || !worker.heartbeat_expired(cutoff_now, self.heartbeat_timeout)
        {
            return Ok(false);
        }

        let mut event = None;
        if let Some(task_id) = worker.current_task_id {
            if let Some(task) = self.catalog.lock_task(&mut tx, task_id).await? {
                if !task.status.is_terminal() {
                    let failed = super::fail_task_in_tx(
                        &self.catalog,
                        &mut tx,
                        &task,
                        WORKER_OFFLINE_MESSAGE,
                    )
                    .await?;
                    event = Some(TaskEvent::new(TaskAction::Failed, failed.descriptor()));
                }
            }
        }
        self.catalog.set_worker_offline(&mut tx, worker.id).await?;
        tx.commit().await?;

        warn!(worker = %worker.name, "worker heartbeat expired, marked offline");
        metrics::record_worker_offline();
        if let Some(event) = event {
            metrics::record_task_terminal("failed");
            self.events.publish(event);
        }
        Ok(true)
    }

    /// One pass over running tasks without recent progress. Returns how
    /// many were failed.
    pub async fn sweep_tasks_once(&self) -> StoreResult<u32> {
        let cutoff = Utc::now() - self.stall_timeout;
        let ids = self.catalog.stalled_running_task_ids(cutoff).await?;
        let mut failed = 0u32;
        for id in ids {
            match self.fail_stalled_task(id).await {
                Ok(true) => failed += 1,
                Ok(false) => {}
                Err(e) => error!(task_id = id, error = %e, "failed to reap stalled task"),
            }
        }
        if failed > 0 {
            warn!(count = failed, "stalled tasks failed");
        }
        Ok(failed)
    }

    /// Fail one stalled task; its worker stays registered and returns to
    /// Idle (the stall says nothing about the worker's own liveness).
    async fn fail_stalled_task(&self, task_id: i64) -> StoreResult<bool> {
        let mut tx = self.catalog.begin().await?;
        let Some(task) = self.catalog.lock_task(&mut tx, task_id).await? else {
            return Ok(false);
        };
        if !task.stalled(Utc::now(), self.stall_timeout) {
            return Ok(false);
        }

        let failed = super::fail_task_in_tx(&self.catalog, &mut tx, &task, TASK_STALL_MESSAGE)
            .await?;
        if let Some(worker) = self.catalog.lock_worker(&mut tx, task.worker_id).await? {
            if worker.current_task_id == Some(task.id) {
                self.catalog.set_worker_idle(&mut tx, worker.id).await?;
            }
        }
        tx.commit().await?;

        warn!(task_id = %task.task_uuid, "task stalled, marked failed");
        metrics::record_task_terminal("failed");
        self.events
            .publish(TaskEvent::new(TaskAction::Failed, failed.descriptor()));
        Ok(true)
    }
}
