// Copyright (c) The abrtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The multifile format adapter.
//!
//! A multifile capture is a directory (optionally with a `requests/`
//! subdirectory) holding three kinds of files per entry, tied together by a
//! zero-padded index:
//!
//! - `request_{index:06}.meta.json`: the HTTP exchange metadata
//! - `request_{index:06}.body{ext}`: the response body, extension chosen
//!   from the MIME type
//! - `request_{index:06}.{name}.txt`: one file per annotation

use crate::{
    entry::{HeaderMap, RequestDetails, ResponseBody, ResponseDetails, Timeline, TraceEntry},
    errors::{ExportError, ParseError},
    format::TraceFormat,
    helpers,
};
use atomicwrites::{AtomicFile, OverwriteBehavior};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{io::Write, sync::OnceLock};
use url::Url;

fn meta_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^request_(\d+)\.meta\.json$").expect("meta regex is valid"))
}

fn annotation_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^request_\d+\.(.+)\.txt$").expect("annotation regex is valid")
    })
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
struct MultifileMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
    request: MetaRequest,
    response: MetaResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    elapsed_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    comment: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
struct MetaRequest {
    url: String,
    method: String,
    headers: IndexMap<String, String>,
}

impl Default for MetaRequest {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: "GET".to_owned(),
            headers: IndexMap::new(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
struct MetaResponse {
    status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    headers: IndexMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
}

/// Parses a multifile capture directory into trace entries.
pub(crate) fn parse(path: &Utf8Path) -> Result<Vec<TraceEntry>, ParseError> {
    // Entries may live in the directory itself or a `requests/` subdirectory.
    let mut dirs = vec![path.to_owned()];
    let requests_dir = path.join("requests");
    if requests_dir.is_dir() {
        dirs.push(requests_dir);
    }

    let mut metas: Vec<(u64, String, Utf8PathBuf)> = Vec::new();
    for dir in &dirs {
        for dir_entry in dir.read_dir_utf8().map_err(|error| ParseError::Io {
            path: dir.clone(),
            error,
        })? {
            let dir_entry = dir_entry.map_err(|error| ParseError::Io {
                path: dir.clone(),
                error,
            })?;
            if let Some(captures) = meta_name_regex().captures(dir_entry.file_name()) {
                if let Ok(index) = captures[1].parse::<u64>() {
                    metas.push((index, captures[1].to_owned(), dir_entry.path().to_owned()));
                }
            }
        }
    }
    metas.sort_by(|a, b| (a.0, a.2.as_str()).cmp(&(b.0, b.2.as_str())));

    metas
        .into_iter()
        .enumerate()
        .map(|(position, (source_index, index_str, meta_path))| {
            entry_from_files(position, source_index, &index_str, &meta_path)
        })
        .collect()
}

fn entry_from_files(
    position: usize,
    source_index: u64,
    index_str: &str,
    meta_path: &Utf8Path,
) -> Result<TraceEntry, ParseError> {
    let meta_bytes = std::fs::read(meta_path).map_err(|error| ParseError::Io {
        path: meta_path.to_owned(),
        error,
    })?;
    let meta: MultifileMeta =
        serde_json::from_slice(&meta_bytes).map_err(|error| ParseError::Json {
            path: meta_path.to_owned(),
            error,
        })?;

    let url = Url::parse(&meta.request.url).map_err(|error| ParseError::Invalid {
        format: TraceFormat::Multifile,
        path: meta_path.to_owned(),
        message: format!("invalid request URL `{}`: {error}", meta.request.url),
    })?;

    let parent = meta_path.parent().unwrap_or(Utf8Path::new("."));
    let mut body_bytes = None;
    let mut annotations = IndexMap::new();
    let body_prefix = format!("request_{index_str}.body");
    let annotation_prefix = format!("request_{index_str}.");

    let mut siblings: Vec<Utf8PathBuf> = parent
        .read_dir_utf8()
        .map_err(|error| ParseError::Io {
            path: parent.to_owned(),
            error,
        })?
        .filter_map(|dir_entry| dir_entry.ok())
        .map(|dir_entry| dir_entry.path().to_owned())
        .collect();
    siblings.sort();

    for sibling in &siblings {
        let Some(name) = sibling.file_name() else {
            continue;
        };
        if name.starts_with(&body_prefix) && body_bytes.is_none() {
            body_bytes = Some(std::fs::read(sibling).map_err(|error| ParseError::Io {
                path: sibling.clone(),
                error,
            })?);
        } else if name.starts_with(&annotation_prefix)
            && name.ends_with(".txt")
            && sibling.as_path() != meta_path
        {
            if let Some(captures) = annotation_name_regex().captures(name) {
                let text = std::fs::read_to_string(sibling).map_err(|error| ParseError::Io {
                    path: sibling.clone(),
                    error,
                })?;
                annotations.insert(captures[1].to_owned(), text);
            }
        }
    }

    let request_headers: HeaderMap = meta
        .request
        .headers
        .iter()
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    let response_headers: HeaderMap = meta
        .response
        .headers
        .iter()
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    let content_type = meta
        .response
        .content_type
        .clone()
        .or_else(|| response_headers.get("Content-Type").map(str::to_owned));
    let body = match body_bytes {
        Some(bytes) => ResponseBody::from_bytes(bytes),
        None => ResponseBody::default(),
    };
    let mut response = ResponseDetails::new(
        meta.response.status_code,
        response_headers,
        content_type,
        body,
    );
    if meta.response.mime_type.is_some() {
        response = response.with_mime_type(meta.response.mime_type.clone());
    }

    let request_start = meta
        .timestamp
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|instant| instant.with_timezone(&Utc));
    let response_end = match (request_start, meta.elapsed_ms) {
        (Some(start), Some(elapsed)) => {
            start.checked_add_signed(TimeDelta::milliseconds(elapsed))
        }
        _ => None,
    };
    let timeline = Timeline::new(request_start, None, None, response_end);

    Ok(TraceEntry::new(
        position,
        source_index.to_string(),
        RequestDetails::new(meta.request.method.to_ascii_uppercase(), url, request_headers),
        response,
        timeline,
    )
    .with_comment(meta.comment)
    .with_annotations(annotations))
}

/// Serializes entries into a multifile capture directory.
///
/// Each individual file is written atomically; the directory itself is
/// created up front.
pub(crate) fn serialize(entries: &[&TraceEntry], dest: &Utf8Path) -> Result<(), ExportError> {
    std::fs::create_dir_all(dest).map_err(|error| ExportError::Io {
        path: dest.to_owned(),
        error,
    })?;

    for (index, entry) in entries.iter().enumerate() {
        let basename = format!("request_{index:06}");

        let meta = meta_from_entry(entry);
        let meta_path = dest.join(format!("{basename}.meta.json"));
        let json = serde_json::to_vec_pretty(&meta).map_err(|error| ExportError::Json {
            path: meta_path.clone(),
            error,
        })?;
        write_atomic(&meta_path, &json)?;

        let extension = helpers::extension_for_entry(entry);
        let body_path = dest.join(format!("{basename}.body{extension}"));
        write_atomic(&body_path, entry.body_bytes())?;

        for (name, text) in entry.annotations() {
            let annotation_path = dest.join(format!("{basename}.{name}.txt"));
            write_atomic(&annotation_path, text.as_bytes())?;
        }
    }
    Ok(())
}

fn meta_from_entry(entry: &TraceEntry) -> MultifileMeta {
    let timeline = entry.timeline();
    MultifileMeta {
        timestamp: timeline
            .request_start()
            .map(|start| start.to_rfc3339_opts(SecondsFormat::Millis, true)),
        request: MetaRequest {
            url: entry.request().url().as_str().to_owned(),
            method: entry.request().method().to_owned(),
            headers: entry
                .request()
                .headers()
                .iter()
                .map(|(name, value)| (name.to_owned(), value.to_owned()))
                .collect(),
        },
        response: MetaResponse {
            status_code: entry.response().status(),
            reason: Some(helpers::status_text(entry.response().status()).to_owned()),
            headers: entry
                .response()
                .headers()
                .iter()
                .map(|(name, value)| (name.to_owned(), value.to_owned()))
                .collect(),
            mime_type: entry.response().mime_type().map(str::to_owned),
            content_type: entry.response().content_type().map(str::to_owned),
        },
        elapsed_ms: timeline
            .duration()
            .map(|duration| duration.num_milliseconds()),
        comment: entry.comment().map(str::to_owned),
    }
}

fn write_atomic(path: &Utf8Path, bytes: &[u8]) -> Result<(), ExportError> {
    AtomicFile::new(path, OverwriteBehavior::AllowOverwrite)
        .write(|file| file.write_all(bytes))
        .map_err(|error| {
            let error = match error {
                atomicwrites::Error::Internal(error) => error,
                atomicwrites::Error::User(error) => error,
            };
            ExportError::Io {
                path: path.to_owned(),
                error,
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use chrono::TimeZone;
    use indexmap::indexmap;
    use pretty_assertions::assert_eq;

    fn manifest_entry(index: usize) -> TraceEntry {
        let start = Utc
            .with_ymd_and_hms(2024, 5, 1, 12, 0, 10 * index as u32)
            .single()
            .expect("valid instant");
        let mut headers = HeaderMap::new();
        headers.insert("Content-Type", "application/vnd.apple.mpegurl");

        TraceEntry::new(
            index,
            index.to_string(),
            RequestDetails::new(
                "GET",
                Url::parse(&format!("https://cdn.test/live.m3u8?tok={index}"))
                    .expect("valid URL"),
                HeaderMap::new(),
            ),
            ResponseDetails::new(
                200,
                headers,
                Some("application/vnd.apple.mpegurl".to_owned()),
                ResponseBody::from_bytes(format!("#EXTM3U\n#refresh-{index}").into_bytes()),
            ),
            Timeline::new(Some(start), None, None, Some(start + TimeDelta::milliseconds(40))),
        )
        .with_comment(Some("refresh".to_owned()))
        .with_annotations(indexmap! {"digest".to_owned() => format!("d{index}")})
    }

    #[test]
    fn test_round_trip() {
        let dir = Utf8TempDir::new().expect("tempdir");
        let dest = dir.path().join("capture");
        let entries = vec![manifest_entry(0), manifest_entry(1)];
        let refs: Vec<&TraceEntry> = entries.iter().collect();
        serialize(&refs, &dest).expect("serialize");

        // Body files get the manifest extension.
        assert!(dest.join("request_000000.body.m3u8").is_file());
        assert!(dest.join("request_000000.digest.txt").is_file());

        let reparsed = parse(&dest).expect("parse");
        assert_eq!(reparsed.len(), 2);
        for (a, b) in entries.iter().zip(&reparsed) {
            assert_eq!(a.request().url(), b.request().url());
            assert_eq!(a.request().method(), b.request().method());
            assert_eq!(a.response().status(), b.response().status());
            assert_eq!(a.response().mime_type(), b.response().mime_type());
            assert_eq!(a.body_bytes(), b.body_bytes());
            assert_eq!(a.timeline().request_start(), b.timeline().request_start());
            assert_eq!(a.timeline().response_end(), b.timeline().response_end());
            assert_eq!(a.comment(), b.comment());
            assert_eq!(a.annotations(), b.annotations());
        }
    }

    #[test]
    fn test_parse_reads_requests_subdirectory() {
        let dir = Utf8TempDir::new().expect("tempdir");
        let dest = dir.path().join("capture");
        let nested = dest.join("requests");
        let entries = vec![manifest_entry(0)];
        let refs: Vec<&TraceEntry> = entries.iter().collect();
        serialize(&refs, &nested).expect("serialize");

        let reparsed = parse(&dest).expect("parse");
        assert_eq!(reparsed.len(), 1);
        assert_eq!(reparsed[0].request().url(), entries[0].request().url());
    }

    #[test]
    fn test_parse_rejects_malformed_meta() {
        let dir = Utf8TempDir::new().expect("tempdir");
        std::fs::write(dir.path().join("request_000000.meta.json"), "{oops")
            .expect("write meta");
        assert!(matches!(parse(dir.path()), Err(ParseError::Json { .. })));
    }

    #[test]
    fn test_parse_empty_directory() {
        let dir = Utf8TempDir::new().expect("tempdir");
        assert!(parse(dir.path()).expect("parse").is_empty());
    }

    #[test]
    fn test_entry_without_body_file() {
        let dir = Utf8TempDir::new().expect("tempdir");
        let meta = serde_json::json!({
            "timestamp": "2024-05-01T12:00:00.000Z",
            "request": {"url": "https://cdn.test/live.m3u8", "method": "GET", "headers": {}},
            "response": {"status_code": 204, "headers": {}},
        });
        std::fs::write(
            dir.path().join("request_000003.meta.json"),
            meta.to_string(),
        )
        .expect("write meta");

        let entries = parse(dir.path()).expect("parse");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id(), "3");
        assert_eq!(entries[0].response().status(), 204);
        assert_eq!(entries[0].response().body().bytes(), None);
    }
}
