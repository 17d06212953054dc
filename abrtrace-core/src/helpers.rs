// Copyright (c) The abrtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::entry::TraceEntry;

/// Strips MIME type parameters: `application/x-mpegURL; charset=utf-8`
/// becomes `application/x-mpegURL`.
pub(crate) fn strip_mime_params(content_type: &str) -> &str {
    content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
}

/// Standard reason phrase for an HTTP status code, `"Unknown"` if the code is
/// not one of the usual suspects.
pub(crate) fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// MIME types whose bodies are written as text rather than base64 when a
/// destination format distinguishes the two.
const TEXT_MIME_PREFIXES: &[&str] = &[
    "text/",
    "application/json",
    "application/xml",
    "application/javascript",
    "application/vnd.apple.mpegurl",
    "application/x-mpegurl",
    "application/dash+xml",
];

/// Returns true if a body with this MIME type is conventionally textual.
pub(crate) fn is_text_mime_type(mime_type: &str) -> bool {
    let lower = mime_type.to_ascii_lowercase();
    TEXT_MIME_PREFIXES
        .iter()
        .any(|prefix| lower.starts_with(prefix))
}

/// Picks a file extension (with leading dot) for an entry's body file, from
/// the MIME type first and the URL path as a fallback. Empty if unknown.
pub(crate) fn extension_for_entry(entry: &TraceEntry) -> String {
    if let Some(mime_type) = entry.response().mime_type() {
        if let Some(format) = crate::abr::AbrFormat::from_mime_type(mime_type) {
            return format.extension().to_owned();
        }
        let extension = match mime_type.to_ascii_lowercase().as_str() {
            "application/vnd.vast+xml" | "application/vnd.vmap+xml" | "application/xml"
            | "text/xml" => ".xml",
            "application/json" | "text/json" => ".json",
            _ => "",
        };
        if !extension.is_empty() {
            return extension.to_owned();
        }
    }

    let path = entry.request().url().path();
    let last_segment = path.rsplit('/').next().unwrap_or_default();
    match last_segment.rsplit_once('.') {
        Some((_, extension)) if !extension.is_empty() => {
            format!(".{}", extension.to_ascii_lowercase())
        }
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{HeaderMap, RequestDetails, ResponseBody, ResponseDetails, Timeline};
    use url::Url;

    fn entry(url: &str, content_type: Option<&str>) -> TraceEntry {
        TraceEntry::new(
            0,
            "e0",
            RequestDetails::new(
                "GET",
                Url::parse(url).expect("valid URL"),
                HeaderMap::new(),
            ),
            ResponseDetails::new(
                200,
                HeaderMap::new(),
                content_type.map(str::to_owned),
                ResponseBody::default(),
            ),
            Timeline::default(),
        )
    }

    #[test]
    fn test_strip_mime_params() {
        assert_eq!(
            strip_mime_params("application/dash+xml; charset=utf-8"),
            "application/dash+xml"
        );
        assert_eq!(strip_mime_params("text/plain"), "text/plain");
    }

    #[test]
    fn test_extension_prefers_mime_type() {
        let e = entry("https://x.test/playlist", Some("application/x-mpegURL"));
        assert_eq!(extension_for_entry(&e), ".m3u8");

        let e = entry("https://x.test/vast?id=1", Some("application/vnd.vast+xml"));
        assert_eq!(extension_for_entry(&e), ".xml");
    }

    #[test]
    fn test_extension_falls_back_to_url() {
        let e = entry("https://x.test/segment.TS", None);
        assert_eq!(extension_for_entry(&e), ".ts");

        let e = entry("https://x.test/no-extension", None);
        assert_eq!(extension_for_entry(&e), "");
    }
}
