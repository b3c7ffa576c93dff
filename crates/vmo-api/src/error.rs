use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found")]
    NotFound,

    #[error("{0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error(transparent)]
    Orchestrator(#[from] vmo_infra::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        use vmo_infra::Error as E;

        match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Orchestrator(e) if e.is_invalid_input() => StatusCode::BAD_REQUEST,
            ApiError::Orchestrator(e) => match e {
                E::ImageNotFound(_) | E::InvalidConfig(_) => StatusCode::BAD_REQUEST,
                E::ResourceVanished { .. } => StatusCode::NOT_FOUND,
                E::FatalTermination { .. } => StatusCode::CONFLICT,
                E::TimedOut { .. } => StatusCode::GATEWAY_TIMEOUT,
                E::RemoteCallFailed { .. } | E::Plane(_) | E::Decode(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
