//! Default limits and the built-in upload policy values.

/// 3 MiB, the per-file cap of the built-in policy.
pub const DEFAULT_MAX_FILE_BYTES: u64 = 3 * 1024 * 1024;

pub const DEFAULT_MAX_HEADER_BYTES: usize = 8 * 1024;
pub const DEFAULT_MAX_FIELD_VALUE_BYTES: usize = 1024 * 1024;
pub const DEFAULT_MAX_PARTS: usize = 100;

/// Image field of the built-in policy (one JPEG or PNG).
pub const DEFAULT_IMAGE_FIELD: &str = "userfile";
/// Document field of the built-in policy (up to three PDFs).
pub const DEFAULT_DOCUMENT_FIELD: &str = "userdocuments";

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_LOCAL_STORAGE_PATH: &str = "./uploads";
