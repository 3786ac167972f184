//! Multipart form submission

use crate::error::HttpAppError;
use crate::middleware::request_id::RequestId;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::State,
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use intake_core::{AcceptedUpload, AppError, FormField, Rejection, StoredFile};
use intake_processing::parse_boundary;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::Instrument;

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub files: Vec<StoredFile>,
    pub fields: Vec<FormField>,
    /// Accepted files per field name.
    pub counts: BTreeMap<String, usize>,
}

impl From<AcceptedUpload> for SubmitResponse {
    fn from(upload: AcceptedUpload) -> Self {
        let counts = upload.count_by_field();
        Self {
            files: upload.files,
            fields: upload.fields,
            counts,
        }
    }
}

/// Stream a `multipart/form-data` body through the intake pipeline.
pub async fn submit_form(
    State(state): State<Arc<AppState>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, HttpAppError> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| Rejection::malformed("Missing or invalid Content-Type header"))?;
    let boundary = parse_boundary(content_type)?;

    let span = tracing::info_span!("intake", request_id = %request_id);

    let upload = state
        .pipeline
        .run(&boundary, body.into_data_stream())
        .instrument(span)
        .await?;

    if !upload.has_files() {
        return Err(AppError::NoFilesUploaded.into());
    }

    Ok((StatusCode::OK, Json(SubmitResponse::from(upload))))
}
