//! Coordinator components: each owns a store handle and, where it produces
//! lifecycle events, an event-bus handle. No module-level mutable state.

pub mod dispatcher;
pub mod liveness;
pub mod registry;
pub mod scanner;
pub mod tracker;

pub use dispatcher::{DispatchOutcome, DispatchRequest, Dispatcher};
pub use liveness::LivenessMonitor;
pub use registry::WorkerRegistry;
pub use scanner::{Scanner, ScanSummary};
pub use tracker::{TaskTracker, TaskUpdate};

use vconv_models::{LogLevel, Task, TranscodeStatus};
use vconv_store::{CatalogStore, StoreResult, Tx};

/// Cascade-fail a non-terminal task inside an ongoing transaction: the
/// task goes to Failed with `message`, its video follows, and an ERROR
/// audit row is appended. Worker state is the caller's business (the
/// liveness worker sweep leaves it Offline, everything else returns it
/// to Idle).
pub(crate) async fn fail_task_in_tx(
    catalog: &CatalogStore,
    tx: &mut Tx,
    task: &Task,
    message: &str,
) -> StoreResult<Task> {
    let failed = catalog.fail_task(tx, task.id, message, None, None).await?;
    catalog
        .set_video_terminal(tx, task.video_id, TranscodeStatus::Failed)
        .await?;
    catalog
        .append_log(tx, Some(task.id), LogLevel::Error, message)
        .await?;
    Ok(failed)
}
