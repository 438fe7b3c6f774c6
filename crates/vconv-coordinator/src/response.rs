//! JSON response envelope.
//!
//! Every API body is `{code, message, data?}` with `code` mirroring the
//! HTTP status.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Success envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            code: StatusCode::OK.as_u16(),
            message: "ok".to_string(),
            data: Some(data),
        }
    }

    pub fn created(data: T) -> Self {
        Self {
            code: StatusCode::CREATED.as_u16(),
            message: "created".to_string(),
            data: Some(data),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

impl ApiResponse<()> {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            code: StatusCode::OK.as_u16(),
            message: message.into(),
            data: None,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::OK);
        (status, Json(self)).into_response()
    }
}

/// Paginated list payload.
#[derive(Debug, Serialize)]
pub struct PageData<T: Serialize> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

impl<T: Serialize> PageData<T> {
    pub fn new(items: Vec<T>, total: i64, page: vconv_store::Page) -> Self {
        Self {
            items,
            total,
            page: page.number,
            page_size: page.size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_envelope() {
        let body = serde_json::to_value(ApiResponse::ok(42)).unwrap();
        assert_eq!(body["code"], 200);
        assert_eq!(body["data"], 42);
    }

    #[test]
    fn test_message_only_envelope_omits_data() {
        let body = serde_json::to_value(ApiResponse::message("done")).unwrap();
        assert_eq!(body["code"], 200);
        assert_eq!(body["message"], "done");
        assert!(body.get("data").is_none());
    }
}
