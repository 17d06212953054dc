// Copyright (c) The abrtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The HAR format adapter, built on the `har-io` crate.
//!
//! Bodies are carried byte-exact: base64-encoded content is decoded on the
//! way in, and binary bodies are re-encoded on the way out. Text bodies are
//! stored as their UTF-8 bytes.

use crate::{
    entry::{
        self, HeaderMap, RequestDetails, ResponseBody, ResponseDetails, Timeline, TraceEntry,
    },
    errors::{ExportError, ParseError},
    format::TraceFormat,
    helpers,
};
use atomicwrites::{AtomicFile, OverwriteBehavior};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use camino::Utf8Path;
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use har_io::{
    HarContent, HarCreator, HarEntry, HarFile, HarHeader, HarQueryParam, HarRequest, HarResponse,
    HarTimings,
};
use std::io::Write;
use tracing::warn;
use url::Url;

/// Parses a `.har` file into trace entries.
pub(crate) fn parse(path: &Utf8Path) -> Result<Vec<TraceEntry>, ParseError> {
    let bytes = std::fs::read(path).map_err(|error| ParseError::Io {
        path: path.to_owned(),
        error,
    })?;
    let archive = HarFile::from_slice(&bytes).map_err(|error| ParseError::Har {
        path: path.to_owned(),
        error,
    })?;

    archive
        .log
        .entries
        .iter()
        .enumerate()
        .map(|(index, har_entry)| from_har_entry(path, index, har_entry))
        .collect()
}

/// Serializes entries to a `.har` file, atomically.
pub(crate) fn serialize(entries: &[&TraceEntry], dest: &Utf8Path) -> Result<(), ExportError> {
    let mut archive = HarFile::new(HarCreator {
        name: "abrtrace".to_owned(),
        version: env!("CARGO_PKG_VERSION").to_owned(),
        comment: None,
    });
    archive.log.entries = entries
        .iter()
        .map(|entry| to_har_entry(entry))
        .collect::<Result<_, _>>()?;

    AtomicFile::new(dest, OverwriteBehavior::AllowOverwrite)
        .write(|file| {
            let mut writer = std::io::BufWriter::new(file);
            archive
                .serialize(&mut writer)
                .map_err(|error| ExportError::Serialize {
                    path: dest.to_owned(),
                    error,
                })?;
            writer.flush().map_err(|error| ExportError::Io {
                path: dest.to_owned(),
                error,
            })
        })
        .map_err(|error| match error {
            atomicwrites::Error::Internal(error) => ExportError::Io {
                path: dest.to_owned(),
                error,
            },
            atomicwrites::Error::User(error) => error,
        })
}

fn from_har_entry(path: &Utf8Path, index: usize, har: &HarEntry) -> Result<TraceEntry, ParseError> {
    let url = Url::parse(&har.request.url).map_err(|error| ParseError::Invalid {
        format: TraceFormat::Har,
        path: path.to_owned(),
        message: format!("entry {index} has invalid request URL `{}`: {error}", har.request.url),
    })?;

    let request_headers: HeaderMap = har
        .request
        .headers
        .iter()
        .map(|h| (h.name.clone(), h.value.clone()))
        .collect();
    let mut request = RequestDetails::new(
        har.request.method.to_ascii_uppercase(),
        url,
        request_headers,
    );
    if let Some(post_data) = &har.request.post_data {
        request = request.with_body(post_data.text.clone().into_bytes());
    }

    let response_headers: HeaderMap = har
        .response
        .headers
        .iter()
        .map(|h| (h.name.clone(), h.value.clone()))
        .collect();

    let body_bytes = decode_content(har, index);
    let raw_size = if har.response.content.size >= 0 {
        Some(har.response.content.size as u64)
    } else {
        body_bytes.as_ref().map(|bytes| bytes.len() as u64)
    };
    let compressed_size = if har.response.body_size >= 0 {
        Some(har.response.body_size as u64)
    } else {
        raw_size
    };

    let content_type = (!har.response.content.mime_type.is_empty())
        .then(|| har.response.content.mime_type.clone());
    let response = ResponseDetails::new(
        har.response.status,
        response_headers,
        content_type,
        ResponseBody::new(body_bytes, raw_size, compressed_size),
    );

    let request_start = DateTime::parse_from_rfc3339(&har.started_date_time)
        .map(|instant| instant.with_timezone(&Utc))
        .ok();
    if request_start.is_none() && !har.started_date_time.is_empty() {
        warn!(
            "entry {index}: unparseable startedDateTime `{}`",
            har.started_date_time
        );
    }
    let response_end = match request_start {
        Some(start) if har.time > 0.0 => {
            start.checked_add_signed(TimeDelta::microseconds((har.time * 1000.0) as i64))
        }
        _ => None,
    };
    let timeline = Timeline::new(request_start, None, None, response_end);

    let id = har
        .id
        .clone()
        .unwrap_or_else(|| entry::synthesized_id(index));

    Ok(TraceEntry::new(index, id, request, response, timeline)
        .with_comment(har.comment.clone()))
}

fn decode_content(har: &HarEntry, index: usize) -> Option<Vec<u8>> {
    let text = har.response.content.text.as_deref()?;
    if har.response.content.encoding.as_deref() == Some("base64") {
        match BASE64.decode(text) {
            Ok(bytes) => Some(bytes),
            Err(error) => {
                warn!("entry {index}: undecodable base64 body: {error}");
                None
            }
        }
    } else {
        Some(text.as_bytes().to_vec())
    }
}

fn to_har_entry(entry: &TraceEntry) -> Result<HarEntry, ExportError> {
    let request_start =
        entry
            .timeline()
            .request_start()
            .ok_or_else(|| ExportError::MissingRequestStart {
                id: entry.id().to_owned(),
                format: TraceFormat::Har,
            })?;

    let time = entry
        .timeline()
        .duration()
        .and_then(|duration| duration.num_microseconds())
        .map(|micros| micros as f64 / 1000.0)
        .unwrap_or(0.0);

    let request = HarRequest {
        method: entry.request().method().to_owned(),
        url: entry.request().url().as_str().to_owned(),
        headers: entry
            .request()
            .headers()
            .iter()
            .map(|(name, value)| HarHeader::new(name, value))
            .collect(),
        query_string: entry
            .request()
            .url()
            .query_pairs()
            .map(|(name, value)| HarQueryParam {
                name: name.into_owned(),
                value: value.into_owned(),
            })
            .collect(),
        post_data: entry.request().body().map(|body| har_io::HarPostData {
            mime_type: entry
                .request()
                .headers()
                .get("Content-Type")
                .unwrap_or_default()
                .to_owned(),
            text: String::from_utf8_lossy(body).into_owned(),
            comment: None,
        }),
        headers_size: header_block_size(entry.request().headers()),
        body_size: entry.request().body().map_or(0, |body| body.len() as i64),
        ..HarRequest::default()
    };

    let body = entry.response().body();
    let content_size = body
        .raw_size()
        .or_else(|| body.bytes().map(|bytes| bytes.len() as u64))
        .unwrap_or(0) as i64;
    let compressed_size = body.compressed_size().unwrap_or(content_size as u64) as i64;

    let content = match body.bytes() {
        Some(bytes) => {
            let mime_type = entry.response().mime_type().unwrap_or_default();
            match std::str::from_utf8(bytes) {
                Ok(text) if helpers::is_text_mime_type(mime_type) => HarContent {
                    size: bytes.len() as i64,
                    compression: Some((bytes.len() as i64 - compressed_size).max(0)),
                    mime_type: entry.response().content_type().unwrap_or_default().to_owned(),
                    text: Some(text.to_owned()),
                    encoding: None,
                    comment: None,
                },
                _ => HarContent {
                    size: bytes.len() as i64,
                    compression: None,
                    mime_type: entry.response().content_type().unwrap_or_default().to_owned(),
                    text: Some(BASE64.encode(bytes)),
                    encoding: Some("base64".to_owned()),
                    comment: None,
                },
            }
        }
        None => HarContent {
            size: content_size,
            mime_type: entry.response().content_type().unwrap_or_default().to_owned(),
            ..HarContent::default()
        },
    };

    let response = HarResponse {
        status: entry.response().status(),
        status_text: helpers::status_text(entry.response().status()).to_owned(),
        headers: entry
            .response()
            .headers()
            .iter()
            .map(|(name, value)| HarHeader::new(name, value))
            .collect(),
        content,
        headers_size: header_block_size(entry.response().headers()),
        body_size: compressed_size,
        ..HarResponse::default()
    };

    Ok(HarEntry {
        started_date_time: request_start.to_rfc3339_opts(SecondsFormat::Micros, false),
        time,
        request,
        response,
        timings: phase_timings(entry),
        comment: entry.comment().map(str::to_owned),
        id: (!entry.has_synthesized_id()).then(|| entry.id().to_owned()),
        ..HarEntry::default()
    })
}

fn header_block_size(headers: &HeaderMap) -> i64 {
    headers
        .iter()
        .map(|(name, value)| (name.len() + value.len() + 4) as i64)
        .sum()
}

/// Derives HAR phase timings from the timeline. Phases the capture did not
/// record stay at `-1`.
fn phase_timings(entry: &TraceEntry) -> HarTimings {
    let timeline = entry.timeline();
    let mut timings = HarTimings::default();

    let (Some(request_start), Some(response_start), Some(response_end)) = (
        timeline.request_start(),
        timeline.response_start(),
        timeline.response_end(),
    ) else {
        return timings;
    };

    let millis = |delta: TimeDelta| delta.num_microseconds().unwrap_or(0) as f64 / 1000.0;
    if let Some(request_end) = timeline.request_end() {
        timings.send = millis(request_end - request_start).max(0.0);
        timings.wait = millis(response_start - request_end).max(0.0);
    } else {
        timings.wait = millis(response_start - request_start).max(0.0);
    }
    timings.receive = millis(response_end - response_start).max(0.0);
    timings
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use chrono::TimeZone;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    const FIXTURE: &str = indoc! {r##"
        {
          "log": {
            "version": "1.2",
            "creator": {"name": "proxy", "version": "9.9"},
            "entries": [
              {
                "_id": "req-1",
                "startedDateTime": "2024-05-01T12:00:00.000000+00:00",
                "time": 125.5,
                "comment": "first refresh",
                "request": {
                  "method": "get",
                  "url": "https://cdn.test/live.m3u8?tok=1",
                  "httpVersion": "HTTP/1.1",
                  "headers": [{"name": "Accept", "value": "*/*"}],
                  "queryString": [{"name": "tok", "value": "1"}],
                  "headersSize": -1,
                  "bodySize": 0
                },
                "response": {
                  "status": 200,
                  "statusText": "OK",
                  "httpVersion": "HTTP/1.1",
                  "headers": [{"name": "Content-Type", "value": "application/vnd.apple.mpegurl"}],
                  "content": {
                    "size": 10,
                    "mimeType": "application/vnd.apple.mpegurl",
                    "text": "#EXTM3U\n#1"
                  },
                  "redirectURL": "",
                  "headersSize": -1,
                  "bodySize": 10
                },
                "cache": {},
                "timings": {"send": 0.5, "wait": 100.0, "receive": 25.0}
              }
            ]
          }
        }
    "##};

    fn write_fixture(dir: &Utf8TempDir) -> camino::Utf8PathBuf {
        let path = dir.path().join("capture.har");
        std::fs::write(&path, FIXTURE).expect("write fixture");
        path
    }

    #[test]
    fn test_parse_fixture() {
        let dir = Utf8TempDir::new().expect("tempdir");
        let entries = parse(&write_fixture(&dir)).expect("parse fixture");
        assert_eq!(entries.len(), 1);

        let entry = &entries[0];
        assert_eq!(entry.id(), "req-1");
        assert_eq!(entry.request().method(), "GET");
        assert_eq!(
            entry.request().url().as_str(),
            "https://cdn.test/live.m3u8?tok=1"
        );
        assert_eq!(
            entry.response().mime_type(),
            Some("application/vnd.apple.mpegurl")
        );
        assert_eq!(entry.body_bytes(), b"#EXTM3U\n#1");
        assert_eq!(entry.comment(), Some("first refresh"));

        let start = Utc
            .with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
            .single()
            .expect("valid instant");
        assert_eq!(entry.timeline().request_start(), Some(start));
        assert_eq!(
            entry.timeline().response_end(),
            Some(start + TimeDelta::microseconds(125_500))
        );
    }

    #[test]
    fn test_parse_rejects_invalid_json() {
        let dir = Utf8TempDir::new().expect("tempdir");
        let path = dir.path().join("broken.har");
        std::fs::write(&path, "{not json").expect("write fixture");
        assert!(matches!(parse(&path), Err(ParseError::Har { .. })));
    }

    #[test]
    fn test_parse_rejects_invalid_entry_url() {
        let dir = Utf8TempDir::new().expect("tempdir");
        let path = dir.path().join("badurl.har");
        std::fs::write(
            &path,
            r#"{"log": {"version": "1.2", "entries": [{"startedDateTime": "", "request": {"url": "not a url"}}]}}"#,
        )
        .expect("write fixture");
        assert!(matches!(parse(&path), Err(ParseError::Invalid { .. })));
    }

    #[test]
    fn test_round_trip_preserves_http_semantics() {
        let dir = Utf8TempDir::new().expect("tempdir");
        let entries = parse(&write_fixture(&dir)).expect("parse fixture");

        let out = dir.path().join("out.har");
        let refs: Vec<&TraceEntry> = entries.iter().collect();
        serialize(&refs, &out).expect("serialize");
        let reparsed = parse(&out).expect("reparse");

        assert_eq!(entries.len(), reparsed.len());
        let (a, b) = (&entries[0], &reparsed[0]);
        assert_eq!(a.id(), b.id());
        assert_eq!(a.request().method(), b.request().method());
        assert_eq!(a.request().url(), b.request().url());
        assert_eq!(
            a.request().headers().iter().collect::<Vec<_>>(),
            b.request().headers().iter().collect::<Vec<_>>()
        );
        assert_eq!(a.response().status(), b.response().status());
        assert_eq!(a.body_bytes(), b.body_bytes());
        assert_eq!(a.timeline(), b.timeline());
        assert_eq!(a.comment(), b.comment());
    }

    #[test]
    fn test_binary_bodies_round_trip_via_base64() {
        let dir = Utf8TempDir::new().expect("tempdir");
        let url = Url::parse("https://cdn.test/segment.ts").expect("valid URL");
        let body = vec![0u8, 159, 146, 150];
        let entry = TraceEntry::new(
            0,
            entry::synthesized_id(0),
            RequestDetails::new("GET", url, HeaderMap::new()),
            ResponseDetails::new(
                200,
                HeaderMap::new(),
                Some("video/mp2t".to_owned()),
                ResponseBody::from_bytes(body.clone()),
            ),
            Timeline::starting_at(Utc::now()),
        );

        let out = dir.path().join("binary.har");
        serialize(&[&entry], &out).expect("serialize");
        let reparsed = parse(&out).expect("reparse");
        assert_eq!(reparsed[0].body_bytes(), body.as_slice());
        // The synthesized id is not written out, but re-synthesized on read.
        assert_eq!(reparsed[0].id(), "index-0");
    }

    #[test]
    fn test_serialize_requires_request_start() {
        let url = Url::parse("https://cdn.test/live.m3u8").expect("valid URL");
        let entry = TraceEntry::new(
            0,
            "e0",
            RequestDetails::new("GET", url, HeaderMap::new()),
            ResponseDetails::new(200, HeaderMap::new(), None, ResponseBody::default()),
            Timeline::default(),
        );
        let dir = Utf8TempDir::new().expect("tempdir");
        let result = serialize(&[&entry], &dir.path().join("out.har"));
        assert!(matches!(
            result,
            Err(ExportError::MissingRequestStart { .. })
        ));
    }
}
