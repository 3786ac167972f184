//! Error types module
//!
//! This module provides the core error type used throughout Intake.
//! Pipeline rejections and server faults are unified under `AppError`, which self-describes its HTTP presentation through
//! [`ErrorMetadata`].

use crate::models::{Rejection, RejectionKind};

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for recoverable issues like resource limits
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Metadata for error responses - defines how an error should be presented
pub trait ErrorMetadata {
    /// HTTP status code to return
    fn http_status_code(&self) -> u16;

    /// Machine-readable error code (e.g., "FILE_TOO_LARGE")
    fn error_code(&self) -> &'static str;

    /// Whether this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Suggested action for the client
    fn suggested_action(&self) -> Option<&'static str>;

    /// Client-facing message (may differ from internal error message)
    fn client_message(&self) -> String;

    /// Whether details should be hidden in production
    fn is_sensitive(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Upload rejected: {0}")]
    Rejected(#[from] Rejection),

    #[error("No files uploaded")]
    NoFilesUploaded,

    #[error("Internal error: {0}")]
    Internal(String),
}

fn rejection_suggested_action(kind: RejectionKind) -> &'static str {
    match kind {
        RejectionKind::MalformedMultipart => "Send a well-formed multipart/form-data body",
        RejectionKind::UnexpectedField => "Upload files only on the documented form fields",
        RejectionKind::UnsupportedMediaType => "Check the allowed file types for this field",
        RejectionKind::TooManyFiles => "Reduce the number of files for this field",
        RejectionKind::FileTooLarge => "Reduce file size and resubmit the whole form",
        RejectionKind::FieldValueTooLarge => "Shorten the form field value",
        RejectionKind::TooManyParts => "Send fewer form fields in one request",
        RejectionKind::StorageWriteFailed => "Resubmit the whole upload after a short delay",
    }
}

/// Static metadata for each variant: (http_status, error_code, recoverable, suggested_action, sensitive, log_level).
/// client_message stays per-variant for dynamic content.
fn app_error_static_metadata(
    err: &AppError,
) -> (
    u16,
    &'static str,
    bool,
    Option<&'static str>,
    bool,
    LogLevel,
) {
    match err {
        AppError::Rejected(rejection) => {
            let kind = rejection.reason;
            let client_fault = kind.is_client_fault();
            (
                kind.http_status_code(),
                kind.code(),
                !client_fault,
                Some(rejection_suggested_action(kind)),
                !client_fault,
                if client_fault {
                    LogLevel::Debug
                } else {
                    LogLevel::Error
                },
            )
        }
        AppError::NoFilesUploaded => (
            400,
            "NO_FILES_UPLOADED",
            false,
            Some("Attach at least one file"),
            false,
            LogLevel::Debug,
        ),
        AppError::Internal(_) => (
            500,
            "INTERNAL_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
    }
}

impl AppError {
    /// Get the error type name for detailed error responses
    pub fn error_type(&self) -> &str {
        match self {
            AppError::Rejected(_) => "Rejected",
            AppError::NoFilesUploaded => "NoFilesUploaded",
            AppError::Internal(_) => "Internal",
        }
    }

    /// Get detailed error information including error chain
    pub fn detailed_message(&self) -> String {
        use std::error::Error;

        let mut details = self.to_string();

        let mut source = self.source();
        let mut depth = 0;
        while let Some(err) = source {
            depth += 1;
            if depth > 5 {
                details.push_str("\n  ... (truncated)");
                break;
            }
            details.push_str(&format!("\n  Caused by: {}", err));
            source = err.source();
        }

        details
    }
}

impl ErrorMetadata for AppError {
    fn http_status_code(&self) -> u16 {
        app_error_static_metadata(self).0
    }

    fn error_code(&self) -> &'static str {
        app_error_static_metadata(self).1
    }

    fn is_recoverable(&self) -> bool {
        app_error_static_metadata(self).2
    }

    fn suggested_action(&self) -> Option<&'static str> {
        app_error_static_metadata(self).3
    }

    fn is_sensitive(&self) -> bool {
        app_error_static_metadata(self).4
    }

    fn log_level(&self) -> LogLevel {
        app_error_static_metadata(self).5
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Rejected(rejection) if rejection.reason.is_client_fault() => {
                rejection.detail.clone()
            }
            AppError::Rejected(_) => "Failed to store uploaded files".to_string(),
            AppError::NoFilesUploaded => "No files uploaded".to_string(),
            AppError::Internal(_) => "Internal server error".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_metadata_file_too_large() {
        let err = AppError::from(Rejection::new(
            RejectionKind::FileTooLarge,
            "File exceeds the limit of 3145728 bytes for field 'userfile'",
        ));
        assert_eq!(err.http_status_code(), 413);
        assert_eq!(err.error_code(), "FILE_TOO_LARGE");
        assert!(!err.is_recoverable());
        assert!(err.client_message().contains("userfile"));
        assert!(!err.is_sensitive());
        assert_eq!(err.log_level(), LogLevel::Debug);
    }

    #[test]
    fn test_error_metadata_storage_write_failed_hides_detail() {
        let err = AppError::from(Rejection::storage_failed(
            "Failed to write /var/lib/intake/abc.part: disk full",
        ));
        assert_eq!(err.http_status_code(), 500);
        assert_eq!(err.error_code(), "STORAGE_WRITE_FAILED");
        assert!(err.is_recoverable());
        assert!(err.is_sensitive());
        assert!(!err.client_message().contains("/var/lib"));
        assert_eq!(err.log_level(), LogLevel::Error);
    }

    #[test]
    fn test_error_metadata_no_files() {
        let err = AppError::NoFilesUploaded;
        assert_eq!(err.http_status_code(), 400);
        assert_eq!(err.error_code(), "NO_FILES_UPLOADED");
        assert_eq!(err.client_message(), "No files uploaded");
    }

    #[test]
    fn test_error_metadata_suggested_actions() {
        let err = AppError::Internal("boom".to_string());
        assert_eq!(err.suggested_action(), Some("Retry after a short delay"));
        assert_eq!(err.client_message(), "Internal server error");

        let err = AppError::from(Rejection::new(RejectionKind::UnsupportedMediaType, "nope"));
        assert_eq!(err.http_status_code(), 415);
        assert_eq!(
            err.suggested_action(),
            Some("Check the allowed file types for this field")
        );
    }

    #[test]
    fn test_detailed_message_names_rejection() {
        let err = AppError::from(Rejection::new(
            RejectionKind::UnexpectedField,
            "Files are not accepted for field 'avatar'",
        ));
        let details = err.detailed_message();
        assert!(details.starts_with("Upload rejected: "));
        assert!(details.contains("avatar"));
    }
}
