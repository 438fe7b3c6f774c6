//! Dispatcher: match a requesting worker to the next candidate video.

use tracing::{debug, info};
use uuid::Uuid;

use vconv_events::{EventBus, TaskAction, TaskEvent};
use vconv_models::{OfflineMode, Task, WorkerKind};
use vconv_store::{CandidateFilter, CatalogStore, NewTask};

use crate::error::{ApiError, ApiResult};
use crate::metrics;

/// A `POST /tasks` pull from a worker.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub worker_id: i64,
    pub kind: WorkerKind,
    pub supports_vr: bool,
    pub dest_path: Option<String>,
}

/// Dispatch result handed back to the HTTP layer.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// A task was created and linked; stream progress to `PATCH /tasks`.
    Assigned(Task),
    /// Nothing matches the worker's capabilities right now.
    NoCandidate,
    /// The operator asked this worker to retire; no task assigned.
    OfflineRequested(OfflineMode),
}

pub struct Dispatcher {
    catalog: CatalogStore,
    events: EventBus,
}

impl Dispatcher {
    pub fn new(catalog: CatalogStore, events: EventBus) -> Self {
        Self { catalog, events }
    }

    /// Run the assignment algorithm in a single transaction.
    ///
    /// Candidate selection takes the highest-bitrate match under
    /// `FOR UPDATE SKIP LOCKED`, so concurrent pulls serialize on the row
    /// and can never hand out the same video twice.
    pub async fn dispatch(&self, request: DispatchRequest) -> ApiResult<DispatchOutcome> {
        let mut tx = self.catalog.begin().await?;

        let worker = self
            .catalog
            .lock_worker(&mut tx, request.worker_id)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("no worker {}", request.worker_id)))?;

        // A pull is also a liveness signal
        self.catalog.touch_heartbeat(&mut tx, worker.id).await?;

        if worker.offline_request != OfflineMode::None {
            let mode = worker.offline_request;
            tx.commit().await.map_err(vconv_store::StoreError::from)?;
            info!(worker = %worker.name, mode = ?mode, "refusing dispatch, retirement pending");
            return Ok(DispatchOutcome::OfflineRequested(mode));
        }

        let filter = CandidateFilter::for_worker(request.kind, request.supports_vr);
        let Some(video) = self.catalog.claim_candidate(&mut tx, &filter).await? else {
            tx.commit().await.map_err(vconv_store::StoreError::from)?;
            debug!(worker = %worker.name, "no dispatch candidate");
            return Ok(DispatchOutcome::NoCandidate);
        };

        let task = self
            .catalog
            .insert_running_task(
                &mut tx,
                &NewTask {
                    task_uuid: Uuid::new_v4(),
                    video_id: video.id,
                    worker_id: worker.id,
                    worker_name: worker.name.clone(),
                    source_path: video.path.clone(),
                    dest_path: request.dest_path.clone(),
                },
            )
            .await?;
        self.catalog
            .set_video_dispatched(&mut tx, video.id, task.id)
            .await?;
        self.catalog
            .set_worker_busy(&mut tx, worker.id, task.id)
            .await?;

        tx.commit().await.map_err(vconv_store::StoreError::from)?;

        info!(
            task_id = %task.task_uuid,
            worker = %worker.name,
            video = %video.path,
            bitrate_kbps = video.bitrate_kbps,
            "dispatched task"
        );
        metrics::record_dispatch(request.kind.as_str());
        self.events
            .publish(TaskEvent::new(TaskAction::Created, task.descriptor()));

        Ok(DispatchOutcome::Assigned(task))
    }
}
