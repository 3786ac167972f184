use super::MultipartError;

const MAX_BOUNDARY_LENGTH: usize = 70;

/// Extract the boundary from a `multipart/form-data` Content-Type value.
///
/// Accepts quoted and token boundaries of 1-70 characters from the RFC 2046
/// `bchars` set.
pub fn parse_boundary(content_type: &str) -> Result<String, MultipartError> {
    let mut segments = content_type.split(';');
    let media_type = segments.next().unwrap_or_default().trim();
    if !media_type.eq_ignore_ascii_case("multipart/form-data") {
        return Err(MultipartError::NotMultipart);
    }

    let raw = segments
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim())
        .ok_or_else(|| MultipartError::InvalidBoundary("missing boundary parameter".to_string()))?;

    let boundary = match raw.strip_prefix('"') {
        Some(rest) => rest.strip_suffix('"').ok_or_else(|| {
            MultipartError::InvalidBoundary("unterminated quoted boundary".to_string())
        })?,
        None => raw,
    };

    if boundary.is_empty() || boundary.len() > MAX_BOUNDARY_LENGTH {
        return Err(MultipartError::InvalidBoundary(format!(
            "boundary must be 1-{} characters",
            MAX_BOUNDARY_LENGTH
        )));
    }
    if boundary.ends_with(' ') || !boundary.bytes().all(is_bchar) {
        return Err(MultipartError::InvalidBoundary(
            "boundary contains invalid characters".to_string(),
        ));
    }

    Ok(boundary.to_string())
}

fn is_bchar(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"'()+_,-./:=? ".contains(&b)
}
