use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use coincast_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::Store(err) => match err {
                StoreError::UserNotFound(_) | StoreError::StreamNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                StoreError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
                StoreError::SelfJoinRejected => StatusCode::FORBIDDEN,
                StoreError::InvalidAmount(_) => StatusCode::BAD_REQUEST,
                StoreError::UsernameTaken(_) => StatusCode::CONFLICT,
            },
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}
