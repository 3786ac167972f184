use percent_encoding::percent_decode_str;

use super::MultipartError;

/// RFC 7578 default for file parts that declare no Content-Type.
const DEFAULT_FILE_MIME_TYPE: &str = "text/plain";

/// Headers of one multipart part. Untrusted client input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartHeader {
    pub field_name: String,
    pub original_filename: Option<String>,
    pub declared_mime_type: Option<String>,
}

impl PartHeader {
    /// Parse a header block (without the terminating blank line).
    pub fn parse(block: &[u8]) -> Result<Self, MultipartError> {
        let text = std::str::from_utf8(block)
            .map_err(|_| MultipartError::Malformed("Part headers are not valid UTF-8".to_string()))?;

        let mut disposition: Option<String> = None;
        let mut content_type: Option<String> = None;

        for (name, value) in header_lines(text)? {
            if name.eq_ignore_ascii_case("content-disposition") {
                disposition.get_or_insert(value);
            } else if name.eq_ignore_ascii_case("content-type") {
                content_type.get_or_insert(value);
            }
        }

        let disposition = disposition.ok_or_else(|| {
            MultipartError::Malformed("Part is missing a Content-Disposition header".to_string())
        })?;
        let (kind, params) = parse_disposition(&disposition)?;
        if !kind.eq_ignore_ascii_case("form-data") {
            return Err(MultipartError::Malformed(format!(
                "Unsupported Content-Disposition type '{}'",
                kind
            )));
        }

        let field_name = param(&params, "name")
            .filter(|name| !name.is_empty())
            .ok_or_else(|| MultipartError::Malformed("Part is missing a field name".to_string()))?
            .to_string();

        let original_filename = param(&params, "filename*")
            .and_then(decode_ext_value)
            .or_else(|| param(&params, "filename").map(str::to_string));

        Ok(PartHeader {
            field_name,
            original_filename,
            declared_mime_type: content_type.filter(|ct| !ct.is_empty()),
        })
    }

    /// File parts carry a Content-Type or a filename; everything else is a
    /// plain form field.
    pub fn is_file(&self) -> bool {
        self.declared_mime_type.is_some() || self.original_filename.is_some()
    }

    /// A file input submitted with nothing selected (`filename=""`).
    pub fn is_empty_file_input(&self) -> bool {
        matches!(self.original_filename.as_deref(), Some(""))
    }

    /// Declared MIME type, falling back to `text/plain` for file parts.
    pub fn mime_type(&self) -> &str {
        self.declared_mime_type
            .as_deref()
            .unwrap_or(DEFAULT_FILE_MIME_TYPE)
    }
}

/// Split a header block into (name, value) pairs, unfolding continuation lines.
fn header_lines(text: &str) -> Result<Vec<(String, String)>, MultipartError> {
    let mut headers: Vec<(String, String)> = Vec::new();

    for line in text.split("\r\n") {
        if line.is_empty() {
            continue;
        }
        if line.starts_with([' ', '\t']) {
            let (_, value) = headers.last_mut().ok_or_else(|| {
                MultipartError::Malformed("Part headers start with a continuation line".to_string())
            })?;
            value.push(' ');
            value.push_str(line.trim());
            continue;
        }
        let (name, value) = line.split_once(':').ok_or_else(|| {
            MultipartError::Malformed(format!("Invalid part header line '{}'", line))
        })?;
        let name = name.trim();
        if name.is_empty() {
            return Err(MultipartError::Malformed("Empty part header name".to_string()));
        }
        headers.push((name.to_string(), value.trim().to_string()));
    }

    Ok(headers)
}

/// Parse `form-data; name="x"; filename="y"` into the type and its parameters.
/// Parameter names are lowercased; quoted values honour backslash escapes.
fn parse_disposition(value: &str) -> Result<(String, Vec<(String, String)>), MultipartError> {
    let (kind, mut rest) = match value.find(';') {
        Some(idx) => (&value[..idx], &value[idx + 1..]),
        None => (value, ""),
    };
    let mut params = Vec::new();

    loop {
        rest = rest.trim_start_matches(|c: char| c == ';' || c.is_whitespace());
        if rest.is_empty() {
            break;
        }

        let name_end = rest.find(['=', ';']).unwrap_or(rest.len());
        let name = rest[..name_end].trim().to_ascii_lowercase();
        rest = &rest[name_end..];

        let Some(after_eq) = rest.strip_prefix('=') else {
            // Valueless parameter
            continue;
        };
        let after_eq = after_eq.trim_start();

        let (param_value, remaining) = if let Some(quoted) = after_eq.strip_prefix('"') {
            read_quoted(quoted)?
        } else {
            let end = after_eq.find(';').unwrap_or(after_eq.len());
            (after_eq[..end].trim().to_string(), &after_eq[end..])
        };

        params.push((name, param_value));
        rest = remaining;
    }

    Ok((kind.trim().to_string(), params))
}

fn read_quoted(input: &str) -> Result<(String, &str), MultipartError> {
    let mut value = String::new();
    let mut chars = input.char_indices();

    while let Some((idx, c)) = chars.next() {
        match c {
            '"' => return Ok((value, &input[idx + 1..])),
            '\\' => match chars.next() {
                Some((_, escaped)) => value.push(escaped),
                None => break,
            },
            _ => value.push(c),
        }
    }

    Err(MultipartError::Malformed(
        "Unterminated quoted string in Content-Disposition".to_string(),
    ))
}

fn param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

/// Decode an RFC 5987 `charset'lang'value` parameter. Only UTF-8 is supported.
fn decode_ext_value(value: &str) -> Option<String> {
    let mut pieces = value.splitn(3, '\'');
    let charset = pieces.next()?;
    let _language = pieces.next()?;
    let encoded = pieces.next()?;

    if !charset.eq_ignore_ascii_case("utf-8") {
        return None;
    }

    percent_decode_str(encoded)
        .decode_utf8()
        .ok()
        .map(|decoded| decoded.into_owned())
}
