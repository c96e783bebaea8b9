//! Error envelope: every failure serialises as
//! `{"error": {"code", "message", "details?"}}` with the status from the
//! runtime taxonomy.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};

use gateway_runtime::GatewayError;

pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::BAD_REQUEST);
        if status.is_server_error() {
            tracing::error!(error = %self.0, code = self.0.code(), "request failed");
        }
        let mut body = json!({
            "error": {
                "code": self.0.code(),
                "message": self.0.public_message(),
            }
        });
        let details = self.0.details();
        if details != Value::Null {
            body["error"]["details"] = details;
        }
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
