use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use trellis_html::RenderError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("page render failed: {0}")]
    Render(#[from] RenderError),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
    }
}
