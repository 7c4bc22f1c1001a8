use crate::error::FulfillmentError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Missing or malformed actor identity")]
    MissingIdentity,
    #[error(transparent)]
    Fulfillment(#[from] FulfillmentError),
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    success: bool,
    error_code: &'static str,
    message: String,
}

/// `{ "success": true, "data": ... }`
#[derive(Debug, serde::Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        let ApiError::Fulfillment(e) = self else {
            return StatusCode::UNAUTHORIZED;
        };
        match e {
            FulfillmentError::OrderNotFound(_)
            | FulfillmentError::DriverNotFound(_)
            | FulfillmentError::CodeNotFound => StatusCode::NOT_FOUND,
            FulfillmentError::InvalidTransition { .. }
            | FulfillmentError::TerminalState(_)
            | FulfillmentError::ConcurrentModification
            | FulfillmentError::NoDriverAvailable
            | FulfillmentError::DriverUnavailable(_)
            | FulfillmentError::AlreadyUsed
            | FulfillmentError::CodeMismatch => StatusCode::CONFLICT,
            FulfillmentError::DispatchTimedOut => StatusCode::GATEWAY_TIMEOUT,
            FulfillmentError::Unauthorized => StatusCode::FORBIDDEN,
            FulfillmentError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            FulfillmentError::Framework(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::MissingIdentity => "UNAUTHORIZED_ACCESS",
            ApiError::Fulfillment(e) => e.code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {self}");
            "Internal server error".to_owned()
        } else {
            self.to_string()
        };
        let body = ErrorBody {
            success: false,
            error_code: self.code(),
            message,
        };
        (status, Json(body)).into_response()
    }
}
