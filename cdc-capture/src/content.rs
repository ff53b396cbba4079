use thiserror::Error;

/// Subtypes of `application/*` that carry human-readable text.
const TEXTUAL_APPLICATION_SUBTYPES: [&str; 7] = [
    "atom+xml",
    "ecmascript",
    "json",
    "javascript",
    "rss+xml",
    "soap+xml",
    "xhtml+xml",
];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MediaTypeError {
    #[error("malformed media type {0:?}: missing '/' separator")]
    MalformedMediaType(String),
}

#[derive(Debug, PartialEq, Eq)]
pub struct MediaType<'a> {
    pub main: &'a str,
    pub subtype: &'a str,
}

/// Parses the `type/subtype` part of a Content-Type value, ignoring any `;` parameters.
pub fn parse_media_type(content_type: &str) -> Result<MediaType<'_>, MediaTypeError> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim();

    match essence.split_once('/') {
        Some((main, subtype)) => Ok(MediaType {
            main: main.trim(),
            subtype: subtype.trim(),
        }),
        None => Err(MediaTypeError::MalformedMediaType(essence.to_string())),
    }
}

/// Returns true when content of this media type should not be treated as text.
/// Malformed media types are considered binary.
pub fn is_binary(content_type: &str) -> bool {
    match parse_media_type(content_type) {
        Ok(MediaType { main: "text", .. }) => false,
        Ok(MediaType {
            main: "application",
            subtype,
        }) => !TEXTUAL_APPLICATION_SUBTYPES.contains(&subtype),
        Ok(_) => true,
        Err(_) => true,
    }
}
