//! Generated names for stored uploads.

use chrono::Utc;
use uuid::Uuid;

const MAX_EXTENSION_LENGTH: usize = 16;

/// Build a fresh stored name: `{unix_millis}-{uuid}{.ext}`.
///
/// Only the validated extension of the client filename is reused.
pub fn stored_name(original_filename: Option<&str>) -> String {
    let millis = Utc::now().timestamp_millis();
    let id = Uuid::new_v4().simple();

    match original_filename.and_then(safe_extension) {
        Some(ext) => format!("{}-{}.{}", millis, id, ext),
        None => format!("{}-{}", millis, id),
    }
}

/// Lowercased last extension of `filename`, if it is 1-16 ASCII alphanumerics.
pub fn safe_extension(filename: &str) -> Option<String> {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let (stem, ext) = base.rsplit_once('.')?;

    // Dotfiles like ".env" have no extension
    if stem.is_empty() {
        return None;
    }
    if ext.is_empty()
        || ext.len() > MAX_EXTENSION_LENGTH
        || !ext.bytes().all(|b| b.is_ascii_alphanumeric())
    {
        return None;
    }

    Some(ext.to_ascii_lowercase())
}
