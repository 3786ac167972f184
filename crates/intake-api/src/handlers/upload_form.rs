//! Upload form page

use crate::error::HttpAppError;
use crate::state::{AppState, UPLOAD_FORM_TEMPLATE};
use axum::{extract::State, response::Html};
use intake_core::{AppError, FieldPolicy};
use minijinja::context;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
struct FileInputView<'a> {
    name: &'a str,
    accept: String,
    multiple: bool,
    max_count: u32,
    max_size: String,
}

impl<'a> FileInputView<'a> {
    fn new(name: &'a str, policy: &FieldPolicy) -> Self {
        Self {
            name,
            accept: policy
                .allowed_mime_types
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(","),
            multiple: policy.max_count > 1,
            max_count: policy.max_count,
            max_size: human_size(policy.max_bytes_per_file),
        }
    }
}

fn human_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;
    if bytes >= MIB && bytes % MIB == 0 {
        format!("{} MB", bytes / MIB)
    } else if bytes >= KIB && bytes % KIB == 0 {
        format!("{} KB", bytes / KIB)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Render the HTML upload form with one file input per policy field.
pub async fn upload_form(State(state): State<Arc<AppState>>) -> Result<Html<String>, HttpAppError> {
    let inputs: Vec<FileInputView<'_>> = state
        .pipeline
        .policy()
        .fields
        .iter()
        .map(|(name, policy)| FileInputView::new(name, policy))
        .collect();

    let html = state
        .templates
        .get_template(UPLOAD_FORM_TEMPLATE)
        .and_then(|template| {
            template.render(context! {
                action => "/submitform",
                fields => inputs,
            })
        })
        .map_err(|e| AppError::Internal(format!("Failed to render upload form: {}", e)))?;

    Ok(Html(html))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(3 * 1024 * 1024), "3 MB");
        assert_eq!(human_size(512 * 1024), "512 KB");
        assert_eq!(human_size(1000), "1000 bytes");
    }
}
