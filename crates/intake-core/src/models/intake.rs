use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};

use serde::Serialize;

/// A file part that passed policy and was durably written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredFile {
    pub field_name: String,
    pub stored_name: String,
    pub original_filename: String,
    pub mime_type: String,
    pub size_bytes: u64,
    /// Backend location. Never serialized into client responses.
    #[serde(skip_serializing)]
    pub storage_path: String,
}

/// A plain (non-file) form field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormField {
    pub name: String,
    pub value: String,
}

/// Outcome of a request whose every part satisfied the policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AcceptedUpload {
    /// Stored files in the order their parts appeared.
    pub files: Vec<StoredFile>,
    /// Plain fields in the order they appeared.
    pub fields: Vec<FormField>,
}

impl AcceptedUpload {
    pub fn has_files(&self) -> bool {
        !self.files.is_empty()
    }

    pub fn count_by_field(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for file in &self.files {
            *counts.entry(file.field_name.clone()).or_insert(0) += 1;
        }
        counts
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size_bytes).sum()
    }
}

/// Machine-readable reason for refusing a whole request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionKind {
    MalformedMultipart,
    UnexpectedField,
    UnsupportedMediaType,
    TooManyFiles,
    FileTooLarge,
    FieldValueTooLarge,
    TooManyParts,
    StorageWriteFailed,
}

impl RejectionKind {
    pub fn code(&self) -> &'static str {
        match self {
            RejectionKind::MalformedMultipart => "MALFORMED_MULTIPART",
            RejectionKind::UnexpectedField => "UNEXPECTED_FIELD",
            RejectionKind::UnsupportedMediaType => "UNSUPPORTED_MEDIA_TYPE",
            RejectionKind::TooManyFiles => "TOO_MANY_FILES",
            RejectionKind::FileTooLarge => "FILE_TOO_LARGE",
            RejectionKind::FieldValueTooLarge => "FIELD_VALUE_TOO_LARGE",
            RejectionKind::TooManyParts => "TOO_MANY_PARTS",
            RejectionKind::StorageWriteFailed => "STORAGE_WRITE_FAILED",
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            RejectionKind::MalformedMultipart
            | RejectionKind::UnexpectedField
            | RejectionKind::TooManyFiles => 400,
            RejectionKind::FileTooLarge
            | RejectionKind::FieldValueTooLarge
            | RejectionKind::TooManyParts => 413,
            RejectionKind::UnsupportedMediaType => 415,
            RejectionKind::StorageWriteFailed => 500,
        }
    }

    /// Client-fault rejections map to 4xx; only storage failures are ours.
    pub fn is_client_fault(&self) -> bool {
        !matches!(self, RejectionKind::StorageWriteFailed)
    }
}

impl Display for RejectionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.code())
    }
}

/// Terminal refusal of a request. Nothing written for the request survives it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{reason}: {detail}")]
pub struct Rejection {
    pub reason: RejectionKind,
    pub detail: String,
}

impl Rejection {
    pub fn new(reason: RejectionKind, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::new(RejectionKind::MalformedMultipart, detail)
    }

    pub fn storage_failed(detail: impl Into<String>) -> Self {
        Self::new(RejectionKind::StorageWriteFailed, detail)
    }
}

/// Either every file of the request was stored, or none was.
pub type IntakeResult = Result<AcceptedUpload, Rejection>;

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(field: &str, size: u64) -> StoredFile {
        StoredFile {
            field_name: field.to_string(),
            stored_name: format!("{}-{}", field, size),
            original_filename: "a.bin".to_string(),
            mime_type: "application/pdf".to_string(),
            size_bytes: size,
            storage_path: "/tmp/x".to_string(),
        }
    }

    #[test]
    fn test_count_by_field_and_totals() {
        let upload = AcceptedUpload {
            files: vec![stored("docs", 10), stored("img", 5), stored("docs", 1)],
            fields: vec![],
        };
        let counts = upload.count_by_field();
        assert_eq!(counts.get("docs"), Some(&2));
        assert_eq!(counts.get("img"), Some(&1));
        assert_eq!(upload.total_bytes(), 16);
        assert!(upload.has_files());
    }

    #[test]
    fn test_storage_path_is_not_serialized() {
        let json = serde_json::to_value(stored("docs", 3)).unwrap();
        assert!(json.get("storage_path").is_none());
        assert_eq!(json["size_bytes"], 3);
    }

    #[test]
    fn test_rejection_kind_status_classes() {
        assert_eq!(RejectionKind::MalformedMultipart.http_status_code(), 400);
        assert_eq!(RejectionKind::FileTooLarge.http_status_code(), 413);
        assert_eq!(RejectionKind::UnsupportedMediaType.http_status_code(), 415);
        assert_eq!(RejectionKind::StorageWriteFailed.http_status_code(), 500);
        assert!(!RejectionKind::StorageWriteFailed.is_client_fault());
        assert!(RejectionKind::TooManyFiles.is_client_fault());
    }

    #[test]
    fn test_rejection_display_includes_code() {
        let rejection = Rejection::new(RejectionKind::TooManyFiles, "too many");
        assert_eq!(rejection.to_string(), "TOO_MANY_FILES: too many");
        assert_eq!(
            serde_json::to_value(rejection.reason).unwrap(),
            serde_json::json!("TOO_MANY_FILES")
        );
    }
}
