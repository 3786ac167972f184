//! Shared object-name validation for storage backends.

use crate::traits::{StorageError, StorageResult};

const MAX_NAME_LENGTH: usize = 255;

/// Reject names that could escape the storage root or collide with
/// in-progress temporary files.
pub fn validate_name(name: &str) -> StorageResult<()> {
    if name.is_empty() || name.len() > MAX_NAME_LENGTH {
        return Err(StorageError::InvalidKey(format!(
            "Object name must be 1-{} bytes long",
            MAX_NAME_LENGTH
        )));
    }

    if name.contains("..")
        || name.starts_with('.')
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return Err(StorageError::InvalidKey(
            "Object name contains invalid characters".to_string(),
        ));
    }

    Ok(())
}
