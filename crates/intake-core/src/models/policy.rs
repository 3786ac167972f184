use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_DOCUMENT_FIELD, DEFAULT_IMAGE_FIELD, DEFAULT_MAX_FIELD_VALUE_BYTES,
    DEFAULT_MAX_FILE_BYTES, DEFAULT_MAX_HEADER_BYTES, DEFAULT_MAX_PARTS,
};

/// Normalize a MIME type to its essence by stripping parameters
/// (e.g. "Image/JPEG; charset=binary" -> "image/jpeg").
pub fn mime_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_ascii_lowercase()
}

/// Acceptance rules for one form field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldPolicy {
    pub allowed_mime_types: BTreeSet<String>,
    pub max_count: u32,
    pub max_bytes_per_file: u64,
}

impl FieldPolicy {
    pub fn new<I, S>(allowed_mime_types: I, max_count: u32, max_bytes_per_file: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed_mime_types: allowed_mime_types
                .into_iter()
                .map(|t| mime_essence(t.as_ref()))
                .collect(),
            max_count,
            max_bytes_per_file,
        }
    }

    /// Whether the declared type's essence is on the allowlist. Parameters on
    /// the declared type never widen the match.
    pub fn allows_mime(&self, declared: &str) -> bool {
        let essence = mime_essence(declared);
        self.allowed_mime_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&essence))
    }

    fn validate(&self, field_name: &str) -> Result<(), anyhow::Error> {
        if self.max_count == 0 {
            return Err(anyhow::anyhow!(
                "Field '{}' must allow at least one file (max_count >= 1)",
                field_name
            ));
        }
        if self.max_bytes_per_file == 0 {
            return Err(anyhow::anyhow!(
                "Field '{}' must allow a non-zero file size",
                field_name
            ));
        }
        if self.allowed_mime_types.is_empty() {
            return Err(anyhow::anyhow!(
                "Field '{}' must list at least one allowed MIME type",
                field_name
            ));
        }
        for mime in &self.allowed_mime_types {
            let valid = mime
                .split_once('/')
                .map(|(ty, sub)| !ty.is_empty() && !sub.is_empty() && !sub.contains('/'))
                .unwrap_or(false);
            if !valid {
                return Err(anyhow::anyhow!(
                    "Field '{}' has an invalid MIME type '{}' (expected type/subtype)",
                    field_name,
                    mime
                ));
            }
        }
        Ok(())
    }
}

/// Structural limits applied to every request regardless of field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeLimits {
    /// Largest accepted header block of a single part.
    pub max_header_bytes: usize,
    /// Largest accepted value of a plain (non-file) form field.
    pub max_field_value_bytes: usize,
    /// Maximum number of parts, files and plain fields together.
    pub max_parts: usize,
}

impl Default for IntakeLimits {
    fn default() -> Self {
        Self {
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            max_field_value_bytes: DEFAULT_MAX_FIELD_VALUE_BYTES,
            max_parts: DEFAULT_MAX_PARTS,
        }
    }
}

/// Field name -> acceptance rules, plus request-wide limits.
///
/// Loaded once at start-up and shared read-only between requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPolicy {
    pub fields: BTreeMap<String, FieldPolicy>,
    #[serde(default)]
    pub limits: IntakeLimits,
}

impl UploadPolicy {
    /// Empty policy: every file part is an unexpected field.
    pub fn empty() -> Self {
        Self {
            fields: BTreeMap::new(),
            limits: IntakeLimits::default(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, policy: FieldPolicy) -> Self {
        self.fields.insert(name.into(), policy);
        self
    }

    pub fn with_limits(mut self, limits: IntakeLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldPolicy> {
        self.fields.get(name)
    }

    /// Parse a JSON policy document and validate it.
    pub fn from_json(json: &str) -> Result<Self, anyhow::Error> {
        let parsed: UploadPolicy = serde_json::from_str(json)
            .map_err(|e| anyhow::anyhow!("Invalid upload policy JSON: {}", e))?;
        let policy = parsed.normalized();
        policy.validate()?;
        Ok(policy)
    }

    /// Lowercase and strip parameters from every allowlisted MIME type.
    pub fn normalized(self) -> Self {
        let fields = self
            .fields
            .into_iter()
            .map(|(name, field)| {
                let normalized = FieldPolicy::new(
                    field.allowed_mime_types.iter(),
                    field.max_count,
                    field.max_bytes_per_file,
                );
                (name.trim().to_string(), normalized)
            })
            .collect();
        Self {
            fields,
            limits: self.limits,
        }
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.fields.is_empty() {
            return Err(anyhow::anyhow!(
                "Upload policy must declare at least one file field"
            ));
        }
        for (name, field) in &self.fields {
            if name.is_empty() {
                return Err(anyhow::anyhow!("Upload policy contains an empty field name"));
            }
            field.validate(name)?;
        }
        if self.limits.max_header_bytes == 0
            || self.limits.max_field_value_bytes == 0
            || self.limits.max_parts == 0
        {
            return Err(anyhow::anyhow!("Upload policy limits must all be at least 1"));
        }
        Ok(())
    }
}

impl Default for UploadPolicy {
    /// One JPEG/PNG on `userfile`, up to three PDFs on `userdocuments`, 3 MiB each.
    fn default() -> Self {
        UploadPolicy::empty()
            .with_field(
                DEFAULT_IMAGE_FIELD,
                FieldPolicy::new(["image/jpeg", "image/png"], 1, DEFAULT_MAX_FILE_BYTES),
            )
            .with_field(
                DEFAULT_DOCUMENT_FIELD,
                FieldPolicy::new(["application/pdf"], 3, DEFAULT_MAX_FILE_BYTES),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_essence_strips_parameters() {
        assert_eq!(mime_essence("Image/JPEG; charset=binary"), "image/jpeg");
        assert_eq!(mime_essence("  application/pdf "), "application/pdf");
    }

    #[test]
    fn test_allows_mime_ignores_parameters_and_case() {
        let field = FieldPolicy::new(["image/jpeg", "image/png"], 1, 10);
        assert!(field.allows_mime("image/jpeg"));
        assert!(field.allows_mime("IMAGE/PNG; foo=bar"));
        assert!(!field.allows_mime("text/plain"));
        assert!(!field.allows_mime("image/jpeg2"));
    }

    #[test]
    fn test_default_policy_matches_builtin_fields() {
        let policy = UploadPolicy::default();
        let image = policy.field("userfile").unwrap();
        assert_eq!(image.max_count, 1);
        assert_eq!(image.max_bytes_per_file, 3 * 1024 * 1024);
        let docs = policy.field("userdocuments").unwrap();
        assert_eq!(docs.max_count, 3);
        assert!(docs.allows_mime("application/pdf"));
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_from_json_normalizes_and_defaults_limits() {
        let policy = UploadPolicy::from_json(
            r#"{"fields": {"avatar": {"allowed_mime_types": ["IMAGE/PNG"], "max_count": 2, "max_bytes_per_file": 1024}}}"#,
        )
        .unwrap();
        let avatar = policy.field("avatar").unwrap();
        assert!(avatar.allowed_mime_types.contains("image/png"));
        assert_eq!(policy.limits, IntakeLimits::default());
    }

    #[test]
    fn test_from_json_rejects_invalid_policies() {
        assert!(UploadPolicy::from_json(r#"{"fields": {}}"#).is_err());
        assert!(UploadPolicy::from_json(
            r#"{"fields": {"a": {"allowed_mime_types": ["image/png"], "max_count": 0, "max_bytes_per_file": 1}}}"#
        )
        .is_err());
        assert!(UploadPolicy::from_json(
            r#"{"fields": {"a": {"allowed_mime_types": ["png"], "max_count": 1, "max_bytes_per_file": 1}}}"#
        )
        .is_err());
        assert!(UploadPolicy::from_json("not json").is_err());
    }
}
