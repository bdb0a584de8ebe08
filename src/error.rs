// ⚠️ Error taxonomy for the time-bank import pipeline
//
// Parsing anomalies never show up here: malformed lines, entries before a
// header and unmatched names are skipped and only counted. What remains are
// the failures a caller has to react to.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    /// Upload exceeds the configured maximum; rejected before extraction.
    #[error("upload of {size} bytes exceeds the {limit} byte limit")]
    UploadTooLarge { size: usize, limit: usize },

    #[error("no file content was uploaded")]
    EmptyUpload,

    /// The document could not be turned into text. No entries were touched.
    #[error("failed to extract text from report: {0}")]
    Extraction(String),

    /// Zero recognized entries while the empty-report policy is `reject`.
    /// No entries were touched.
    #[error("report contained no recognizable time-bank entries")]
    EmptyReport,

    /// Reading the roster or replacing the snapshot failed. The replace runs
    /// in one transaction, so the previous snapshot is still in place.
    #[error("failed to persist time-bank snapshot: {0:#}")]
    Persistence(anyhow::Error),
}

impl IngestError {
    /// Whether the caller sent something we can never process, as opposed to
    /// a failure on our side.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, IngestError::Persistence(_))
    }
}

#[cfg(feature = "server")]
mod response {
    use super::IngestError;
    use axum::{
        http::StatusCode,
        response::{IntoResponse, Response},
        Json,
    };

    impl IntoResponse for IngestError {
        fn into_response(self) -> Response {
            let status = match &self {
                IngestError::UploadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                IngestError::EmptyUpload => StatusCode::BAD_REQUEST,
                IngestError::Extraction(_) | IngestError::EmptyReport => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                IngestError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };

            // Storage details stay in the log
            let message = if self.is_client_error() {
                self.to_string()
            } else {
                tracing::error!("{}", self);
                "Failed to process report".to_string()
            };

            (
                status,
                Json(serde_json::json!({
                    "success": false,
                    "data": null,
                    "error": message,
                })),
            )
                .into_response()
        }
    }
}
