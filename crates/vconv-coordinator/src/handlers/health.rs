//! Liveness probe.

use serde::Serialize;

use crate::response::ApiResponse;

#[derive(Debug, Serialize)]
pub struct HealthData {
    status: &'static str,
}

pub async fn health() -> ApiResponse<HealthData> {
    ApiResponse::ok(HealthData { status: "healthy" })
}
