//! Prometheus metrics.

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::services::ScanSummary;

/// Install the recorder and describe the metric families.
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    describe_counter!(
        "vconv_tasks_dispatched_total",
        "Tasks handed to workers, labeled by worker kind"
    );
    describe_counter!(
        "vconv_tasks_terminal_total",
        "Tasks reaching a terminal state, labeled by outcome"
    );
    describe_counter!(
        "vconv_workers_offline_total",
        "Workers declared offline by the liveness sweep"
    );
    describe_counter!("vconv_scan_files_seen_total", "Files visited by scans");
    describe_counter!("vconv_scan_videos_inserted_total", "New catalog rows from scans");
    describe_gauge!("vconv_ws_connections", "Open realtime channel connections");

    handle
}

pub fn record_dispatch(kind: &'static str) {
    counter!("vconv_tasks_dispatched_total", "kind" => kind).increment(1);
}

pub fn record_task_terminal(outcome: &'static str) {
    counter!("vconv_tasks_terminal_total", "outcome" => outcome).increment(1);
}

pub fn record_worker_offline() {
    counter!("vconv_workers_offline_total").increment(1);
}

pub fn record_scan(summary: &ScanSummary) {
    counter!("vconv_scan_files_seen_total").increment(summary.files_seen);
    counter!("vconv_scan_videos_inserted_total").increment(summary.inserted);
}

pub fn set_ws_connections(count: i64) {
    gauge!("vconv_ws_connections").set(count as f64);
}
