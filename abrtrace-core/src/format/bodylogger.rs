// Copyright (c) The abrtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The bodylogger format adapter.
//!
//! Bodylogger files are plain-text service logs in which each record is a
//! timestamped block: a `REQUEST:` line carrying the origin path and a
//! correlation id, optional query-parameter and header sections, and the
//! response body between `[TYPE_START service session]` and `[TYPE_END]`
//! markers. Only the response side of the exchange is logged, so entries are
//! synthesized as successful `GET`s and the MIME type is sniffed from the
//! body.
//!
//! This format is read-only: there is no serializer, and the log-origin
//! metadata (log type, service, session, correlation id) carried in entry
//! annotations is dropped when exporting to other formats.

use crate::{
    entry::{HeaderMap, RequestDetails, ResponseBody, ResponseDetails, Timeline, TraceEntry},
    errors::ParseError,
    format::TraceFormat,
};
use camino::Utf8Path;
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use indexmap::IndexMap;
use regex::Regex;
use std::sync::OnceLock;
use tracing::warn;
use url::Url;

/// Annotation key for the log-origin tag (`MANIFEST`, `CHUNKLIST`, ...).
pub const ANNOTATION_LOG_TYPE: &str = "log-type";
/// Annotation key for the service identifier.
pub const ANNOTATION_SERVICE_ID: &str = "service-id";
/// Annotation key for the session identifier.
pub const ANNOTATION_SESSION_ID: &str = "session-id";
/// Annotation key for the per-request correlation id.
pub const ANNOTATION_CORRELATION_ID: &str = "correlation-id";

fn timestamp_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}[,:]\d{3}")
            .expect("timestamp regex is valid")
    })
}

fn start_marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[(\w+)_START ([\w-]+)(?: ([\w.-]+))?\]").expect("start marker regex is valid")
    })
}

fn request_time_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"request_time=([\d.]+)").expect("request time regex is valid"))
}

/// One parsed record, before conversion to a trace entry.
struct Record {
    timestamp: DateTime<Utc>,
    request_line: String,
    correlation_id: u64,
    request_time: f64,
    query_params: String,
    headers: Vec<(String, String)>,
    body: String,
    log_type: String,
    service_id: String,
    session_id: Option<String>,
}

/// Parses a bodylogger `.log` file into trace entries.
pub(crate) fn parse(path: &Utf8Path) -> Result<Vec<TraceEntry>, ParseError> {
    let contents = std::fs::read_to_string(path).map_err(|error| ParseError::Io {
        path: path.to_owned(),
        error,
    })?;

    let mut records = Vec::new();
    let matches: Vec<_> = timestamp_regex().find_iter(&contents).collect();
    for (i, timestamp_match) in matches.iter().enumerate() {
        let block_end = matches
            .get(i + 1)
            .map(|next| next.start())
            .unwrap_or(contents.len());
        let block = &contents[timestamp_match.end()..block_end];

        match parse_record(timestamp_match.as_str(), block) {
            Some(record) => records.push(record),
            // Blocks without a complete record (no body markers, or an
            // unparseable timestamp) are interleaved service chatter, not
            // entries.
            None => warn!(
                "skipping non-record block at `{}` in bodylogger log",
                timestamp_match.as_str()
            ),
        }
    }

    records
        .into_iter()
        .enumerate()
        .map(|(index, record)| entry_from_record(path, index, record))
        .collect()
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    // The separator before the milliseconds is either `,` or `:`.
    let normalized = if raw.as_bytes().get(19) == Some(&b':') {
        let mut s = raw.to_owned();
        s.replace_range(19..20, ",");
        s
    } else {
        raw.to_owned()
    };
    NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M:%S,%3f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn parse_record(timestamp_raw: &str, block: &str) -> Option<Record> {
    let timestamp = parse_timestamp(timestamp_raw)?;
    let lines: Vec<&str> = block.trim().lines().collect();

    let request_time = lines
        .first()
        .and_then(|line| request_time_regex().captures(line))
        .and_then(|captures| captures[1].parse::<f64>().ok())
        .unwrap_or(0.0);

    let mut request_line = String::new();
    let mut correlation_id = 0u64;
    let mut query_params = String::new();
    let mut query_accum: Vec<String> = Vec::new();
    let mut headers: Vec<(String, String)> = Vec::new();
    let mut body_lines: Vec<&str> = Vec::new();
    let mut log_type = None;
    let mut service_id = None;
    let mut session_id = None;

    let mut in_query_params = false;
    let mut in_headers = false;
    let mut in_body = false;

    for line in &lines {
        let stripped = line.trim();

        if let Some(rest) = line.split_once("REQUEST:").map(|(_, rest)| rest.trim()) {
            match rest.rsplit_once('_') {
                Some((path, id)) if id.parse::<u64>().is_ok() => {
                    request_line = path.to_owned();
                    correlation_id = id.parse().unwrap_or(0);
                }
                _ => request_line = rest.to_owned(),
            }
            continue;
        }

        if line.contains("-- Query params:") {
            in_query_params = true;
            query_accum.clear();
            continue;
        }

        if in_query_params {
            if stripped.starts_with("-- ")
                || (stripped.starts_with('[') && stripped.contains("_START"))
            {
                query_params = query_accum.join("&");
                in_query_params = false;
                // Fall through so this line is processed below.
            } else {
                if stripped.contains('=') {
                    query_accum.push(stripped.to_owned());
                }
                continue;
            }
        }

        if stripped == "-- Headers:" {
            in_headers = true;
            continue;
        }

        if stripped.starts_with('[') && stripped.contains("_START") {
            in_headers = false;
            in_body = true;
            if let Some(captures) = start_marker_regex().captures(stripped) {
                log_type = Some(captures[1].to_owned());
                service_id = Some(captures[2].to_owned());
                session_id = captures.get(3).map(|m| m.as_str().to_owned());
            }
            continue;
        }

        if stripped.starts_with('[') && stripped.contains("_END") {
            break;
        }

        if in_headers {
            if let Some((name, value)) = line.split_once(": ") {
                headers.push((name.trim().to_owned(), value.trim().to_owned()));
            }
        }

        if in_body {
            body_lines.push(line);
        }
    }

    // A query-params section running to the end of the block.
    if in_query_params && query_params.is_empty() {
        query_params = query_accum.join("&");
    }

    Some(Record {
        timestamp,
        request_line,
        correlation_id,
        request_time,
        query_params,
        headers,
        body: body_lines.join("\n"),
        log_type: log_type?,
        service_id: service_id?,
        session_id,
    })
}

/// Sniffs the response MIME type from the logged body.
fn sniff_content_type(body: &str) -> &'static str {
    static VAST_RE: OnceLock<Regex> = OnceLock::new();
    static VMAP_RE: OnceLock<Regex> = OnceLock::new();

    let lines: Vec<&str> = body.trim().lines().collect();
    if lines.iter().take(3).any(|line| line.contains("<MPD")) {
        return "application/dash+xml";
    }
    if body.contains("#EXTM3U") {
        return "application/x-mpegURL";
    }
    let vast = VAST_RE
        .get_or_init(|| Regex::new(r"(?i)<(\w*:)?VAST").expect("VAST regex is valid"));
    if vast.is_match(body) {
        return "application/vnd.vast+xml";
    }
    let vmap = VMAP_RE
        .get_or_init(|| Regex::new(r"(?i)<(\w*:)?VMAP").expect("VMAP regex is valid"));
    if vmap.is_match(body) {
        return "application/vnd.vmap+xml";
    }
    if lines.first().is_some_and(|line| line.trim().starts_with("<?xml")) {
        return "application/xml";
    }
    "text/plain"
}

/// Synthesizes the request URL. The log identifies the origin host and path
/// but not a scheme, so the URL is reconstructed as
/// `http://{host}-{logtype}{path}`. The log-type suffix keeps the request
/// and response sides of the same exchange from colliding.
fn record_url(record: &Record) -> Option<Url> {
    let trimmed = record.request_line.trim_start_matches('/');
    let (host, path) = match trimmed.split_once('/') {
        Some((host, rest)) => (host, format!("/{rest}")),
        None => (trimmed, "/".to_owned()),
    };

    let mut url = format!("http://{host}-{}{path}", record.log_type.to_lowercase());
    if !record.query_params.is_empty() {
        url.push('?');
        url.push_str(&record.query_params);
    }
    Url::parse(&url).ok()
}

fn entry_from_record(
    path: &Utf8Path,
    index: usize,
    record: Record,
) -> Result<TraceEntry, ParseError> {
    let url = record_url(&record).ok_or_else(|| ParseError::Invalid {
        format: TraceFormat::BodyLogger,
        path: path.to_owned(),
        message: format!(
            "record {index} has an unusable request line `{}`",
            record.request_line
        ),
    })?;

    let mut request_headers: HeaderMap = record
        .headers
        .iter()
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    request_headers.insert("correlation-id", record.correlation_id.to_string());

    let content_type = sniff_content_type(&record.body);
    let mut response_headers = HeaderMap::new();
    response_headers.insert("Content-Type", content_type);
    if content_type == "application/x-mpegURL" {
        if let Some(sequence) = capture_in_body(&record.body, r"#EXT-X-MEDIA-SEQUENCE:(\d+)") {
            response_headers.insert("HLS-MediaSeq", sequence);
        }
        if let Some(pdt) = capture_in_body(&record.body, r"#EXT-X-PROGRAM-DATE-TIME:([^,\n]+)") {
            response_headers.insert("HLS-PDT", pdt);
        }
    }

    let request_start = TimeDelta::try_milliseconds((record.request_time * 1000.0) as i64)
        .and_then(|elapsed| record.timestamp.checked_sub_signed(elapsed));
    let timeline = Timeline::new(request_start, None, None, Some(record.timestamp));

    let mut annotations = IndexMap::new();
    annotations.insert(ANNOTATION_LOG_TYPE.to_owned(), record.log_type.clone());
    annotations.insert(ANNOTATION_SERVICE_ID.to_owned(), record.service_id.clone());
    if let Some(session_id) = &record.session_id {
        annotations.insert(ANNOTATION_SESSION_ID.to_owned(), session_id.clone());
    }
    annotations.insert(
        ANNOTATION_CORRELATION_ID.to_owned(),
        record.correlation_id.to_string(),
    );

    let body = record.body.into_bytes();
    Ok(TraceEntry::new(
        index,
        index.to_string(),
        RequestDetails::new("GET", url, request_headers),
        ResponseDetails::new(
            200,
            response_headers,
            Some(content_type.to_owned()),
            ResponseBody::from_bytes(body),
        ),
        timeline,
    )
    .with_comment(Some(record.log_type))
    .with_annotations(annotations))
}

fn capture_in_body(body: &str, pattern: &str) -> Option<String> {
    Regex::new(pattern)
        .ok()?
        .captures(body)
        .map(|captures| captures[1].to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use chrono::TimeZone;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    const FIXTURE: &str = indoc! {r#"
        2024-05-01 10:00:00,250 INFO handler request_time=0.250
        REQUEST: /origin.test/live/master.m3u8_101
        -- Query params:
        tok=abc
        sid=9
        -- Headers:
        x-forwarded-for: 10.0.0.1
        x-sessionid: sess-1
        [MANIFEST_START svc-1 sess-1]
        #EXTM3U
        #EXT-X-MEDIA-SEQUENCE:42
        #EXT-X-PROGRAM-DATE-TIME:2024-05-01T10:00:00Z
        [MANIFEST_END]
        2024-05-01 10:00:05,000 INFO handler heartbeat ok
        2024-05-01 10:00:10,100 INFO handler request_time=0.100
        REQUEST: /origin.test/vod/ad.xml_102
        -- Headers:
        x-forwarded-for: 10.0.0.1
        [VAST_START svc-1]
        <?xml version="1.0"?>
        <VAST version="4.0"></VAST>
        [VAST_END]
    "#};

    fn parse_fixture() -> Vec<TraceEntry> {
        let dir = Utf8TempDir::new().expect("tempdir");
        let path = dir.path().join("body.log");
        std::fs::write(&path, FIXTURE).expect("write fixture");
        parse(&path).expect("parse fixture")
    }

    #[test]
    fn test_parses_records_and_skips_chatter() {
        let entries = parse_fixture();
        // The heartbeat line is not a record.
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_manifest_record() {
        let entries = parse_fixture();
        let entry = &entries[0];

        assert_eq!(
            entry.request().url().as_str(),
            "http://origin.test-manifest/live/master.m3u8?tok=abc&sid=9"
        );
        assert_eq!(entry.request().method(), "GET");
        assert_eq!(entry.request().headers().get("x-sessionid"), Some("sess-1"));
        assert_eq!(entry.request().headers().get("correlation-id"), Some("101"));

        assert_eq!(entry.response().status(), 200);
        assert_eq!(entry.response().mime_type(), Some("application/x-mpegURL"));
        assert_eq!(entry.response().headers().get("HLS-MediaSeq"), Some("42"));
        assert_eq!(
            entry.response().headers().get("HLS-PDT"),
            Some("2024-05-01T10:00:00Z")
        );
        assert!(entry.body_bytes().starts_with(b"#EXTM3U"));

        let response_end = Utc
            .with_ymd_and_hms(2024, 5, 1, 10, 0, 0)
            .single()
            .expect("valid instant")
            + TimeDelta::milliseconds(250);
        assert_eq!(entry.timeline().response_end(), Some(response_end));
        assert_eq!(
            entry.timeline().request_start(),
            Some(response_end - TimeDelta::milliseconds(250))
        );

        assert_eq!(
            entry.annotations().get(ANNOTATION_LOG_TYPE).map(String::as_str),
            Some("MANIFEST")
        );
        assert_eq!(
            entry.annotations().get(ANNOTATION_SERVICE_ID).map(String::as_str),
            Some("svc-1")
        );
        assert_eq!(
            entry.annotations().get(ANNOTATION_SESSION_ID).map(String::as_str),
            Some("sess-1")
        );
        assert_eq!(entry.comment(), Some("MANIFEST"));
    }

    #[test]
    fn test_vast_record_without_session() {
        let entries = parse_fixture();
        let entry = &entries[1];

        assert_eq!(
            entry.request().url().as_str(),
            "http://origin.test-vast/vod/ad.xml"
        );
        assert_eq!(
            entry.response().mime_type(),
            Some("application/vnd.vast+xml")
        );
        assert_eq!(entry.annotations().get(ANNOTATION_SESSION_ID), None);
    }

    #[test]
    fn test_empty_log_yields_no_entries() {
        let dir = Utf8TempDir::new().expect("tempdir");
        let path = dir.path().join("empty.log");
        std::fs::write(&path, "no records here\n").expect("write fixture");
        assert!(parse(&path).expect("parse").is_empty());
    }

    #[test]
    fn test_sniff_content_type() {
        assert_eq!(sniff_content_type("#EXTM3U\n..."), "application/x-mpegURL");
        assert_eq!(
            sniff_content_type("<?xml version=\"1.0\"?>\n<MPD></MPD>"),
            "application/dash+xml"
        );
        assert_eq!(
            sniff_content_type("<ns2:VAST version=\"3.0\"/>"),
            "application/vnd.vast+xml"
        );
        assert_eq!(
            sniff_content_type("<?xml version=\"1.0\"?>\n<Other/>"),
            "application/xml"
        );
        assert_eq!(sniff_content_type("plain text"), "text/plain");
    }
}
