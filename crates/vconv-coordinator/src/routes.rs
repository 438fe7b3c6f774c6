//! API routes.

use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::handlers::health::health;
use crate::handlers::logs::{create_log, list_logs};
use crate::handlers::tasks::{create_task, get_task, list_tasks, update_task};
use crate::handlers::videos::{get_video, list_videos};
use crate::handlers::workers::{
    cancel_offline, create_worker, delete_worker, get_worker, heartbeat, list_workers,
    request_offline, update_worker,
};
use crate::middleware::{cors_layer, trace_layer};
use crate::state::AppState;
use crate::ws::socket_handler;

/// Create the coordinator router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let worker_routes = Router::new()
        .route("/workers", post(create_worker).get(list_workers))
        .route("/workers/heartbeat", post(heartbeat))
        .route(
            "/workers/:worker_id",
            get(get_worker).put(update_worker).delete(delete_worker),
        )
        .route(
            "/workers/:worker_id/offline",
            post(request_offline).delete(cancel_offline),
        );

    let task_routes = Router::new()
        .route("/tasks", post(create_task).get(list_tasks))
        .route("/tasks/:task_id", get(get_task).patch(update_task));

    let video_routes = Router::new()
        .route("/videos", get(list_videos))
        .route("/videos/:video_id", get(get_video));

    let log_routes = Router::new().route("/logs", get(list_logs).post(create_log));

    let api_routes = Router::new()
        .merge(worker_routes)
        .merge(task_routes)
        .merge(video_routes)
        .merge(log_routes);

    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/socket", get(socket_handler))
        .route("/health", get(health))
        .merge(metrics_routes)
        .layer(trace_layer())
        .layer(cors_layer())
        .with_state(state)
}
