// SPDX-License-Identifier: PolyForm-Shield-1.0

//! Error taxonomy (§7) and its mapping onto HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use tfaas_runtime::{ImageError, LoadError};
use tfaas_store::StoreError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Malformed(String),
    #[error("{0}")]
    BadInput(String),
    #[error("{0}")]
    LoadError(String),
    #[error("{0}")]
    RuntimeError(String),
    #[error("{0}")]
    IoError(String),
    #[error("{0}")]
    Conflict(String),
}

impl GatewayError {
    fn status(&self) -> StatusCode {
        match self {
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Malformed(_) | GatewayError::BadInput(_) | GatewayError::Conflict(_) => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::LoadError(_) | GatewayError::RuntimeError(_) | GatewayError::IoError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::warn!(%status, error = %self, "request failed");
        (status, axum::Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(name) => GatewayError::NotFound(format!("model '{name}' not found")),
            StoreError::Malformed { .. } => GatewayError::Malformed(err.to_string()),
            StoreError::Io { .. } => GatewayError::IoError(err.to_string()),
        }
    }
}

impl From<LoadError> for GatewayError {
    fn from(err: LoadError) -> Self {
        match &err {
            LoadError::NotFound(name) => GatewayError::NotFound(format!("model '{name}' not found")),
            LoadError::Malformed(_) => GatewayError::Malformed(err.to_string()),
            LoadError::GraphUnreadable { .. }
            | LoadError::GraphImport(..)
            | LoadError::LabelsUnreadable { .. }
            | LoadError::SavedModelLoad(..) => GatewayError::LoadError(err.to_string()),
        }
    }
}

impl From<ImageError> for GatewayError {
    fn from(err: ImageError) -> Self {
        match err {
            // Building/running the one-shot decode graph failed because the
            // bytes didn't actually decode as the selected format (§7:
            // "image decode failure" is BadInput, not a runtime fault).
            ImageError::SessionRun(_) => GatewayError::BadInput(err.to_string()),
            ImageError::GraphBuild(_) | ImageError::SessionCreate(_) => {
                GatewayError::RuntimeError(err.to_string())
            }
        }
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::IoError(err.to_string())
    }
}
