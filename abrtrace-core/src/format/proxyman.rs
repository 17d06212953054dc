// Copyright (c) The abrtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The Proxyman log v2 format adapter.
//!
//! A `.proxymanlogv2` file is a zip archive with one `request_<index>_<id>`
//! JSON member per captured transaction. Member indices reflect capture
//! order; entry ids come from the JSON `id` field, falling back to the id
//! embedded in the member name.

use crate::{
    entry::{HeaderMap, RequestDetails, ResponseBody, ResponseDetails, Timeline, TraceEntry},
    errors::{ExportError, ParseError},
    format::TraceFormat,
    helpers,
};
use atomicwrites::{AtomicFile, OverwriteBehavior};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use camino::Utf8Path;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Read, Write},
    sync::OnceLock,
};
use tracing::warn;
use url::Url;
use zip::{CompressionMethod, ZipArchive, ZipWriter, write::SimpleFileOptions};

fn member_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^request_(\d+)_([A-Za-z0-9_-]+)$").expect("member name regex is valid")
    })
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
struct PmEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    request: PmRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<PmResponse>,
    timing: PmTiming,
    #[serde(rename = "isSSL")]
    is_ssl: bool,
    #[serde(rename = "isIntercepted")]
    is_intercepted: bool,
    #[serde(rename = "isRelayed")]
    is_relayed: bool,
    #[serde(rename = "isFromFile")]
    is_from_file: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    timezone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    style: Option<PmStyle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    notes: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
struct PmRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    #[serde(rename = "isSSL")]
    is_ssl: bool,
    method: PmMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    scheme: Option<String>,
    #[serde(rename = "fullPath", skip_serializing_if = "Option::is_none")]
    full_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    uri: Option<String>,
    version: PmVersion,
    header: PmHeaderBlock,
    #[serde(rename = "bodyData", skip_serializing_if = "Option::is_none")]
    body_data: Option<String>,
    #[serde(rename = "isWebSocketUpgrade")]
    is_web_socket_upgrade: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
struct PmMethod {
    name: String,
}

impl Default for PmMethod {
    fn default() -> Self {
        Self {
            name: "GET".to_owned(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
struct PmVersion {
    major: u32,
    minor: u32,
}

impl Default for PmVersion {
    fn default() -> Self {
        Self { major: 1, minor: 1 }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
struct PmHeaderBlock {
    entries: Vec<PmHeaderEntry>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
struct PmHeaderEntry {
    key: PmHeaderKey,
    value: String,
    #[serde(rename = "isEnabled")]
    is_enabled: bool,
}

impl Default for PmHeaderEntry {
    fn default() -> Self {
        Self {
            key: PmHeaderKey::default(),
            value: String::new(),
            is_enabled: true,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
struct PmHeaderKey {
    name: String,
    #[serde(rename = "nameInLowercase")]
    name_in_lowercase: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
struct PmResponse {
    status: PmStatus,
    version: PmVersion,
    header: PmHeaderBlock,
    #[serde(rename = "bodyData", skip_serializing_if = "Option::is_none")]
    body_data: Option<String>,
    #[serde(rename = "bodySize", skip_serializing_if = "Option::is_none")]
    body_size: Option<u64>,
    #[serde(rename = "bodyEncodedSize", skip_serializing_if = "Option::is_none")]
    body_encoded_size: Option<u64>,
    #[serde(rename = "createdAt", skip_serializing_if = "Option::is_none")]
    created_at: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<serde_json::Value>,
    #[serde(rename = "customPreviewerTabs", skip_serializing_if = "Option::is_none")]
    custom_previewer_tabs: Option<IndexMap<String, String>>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
struct PmStatus {
    code: u16,
    phrase: String,
    strict: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
struct PmTiming {
    #[serde(rename = "requestStartedAt", skip_serializing_if = "Option::is_none")]
    request_started_at: Option<f64>,
    #[serde(rename = "requestEndedAt", skip_serializing_if = "Option::is_none")]
    request_ended_at: Option<f64>,
    #[serde(rename = "responseStartedAt", skip_serializing_if = "Option::is_none")]
    response_started_at: Option<f64>,
    #[serde(rename = "responseEndedAt", skip_serializing_if = "Option::is_none")]
    response_ended_at: Option<f64>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
struct PmStyle {
    #[serde(skip_serializing_if = "Option::is_none")]
    comment: Option<String>,
}

/// Parses a `.proxymanlogv2` archive into trace entries.
pub(crate) fn parse(path: &Utf8Path) -> Result<Vec<TraceEntry>, ParseError> {
    let file = File::open(path).map_err(|error| ParseError::Io {
        path: path.to_owned(),
        error,
    })?;
    let mut archive = ZipArchive::new(BufReader::new(file)).map_err(|error| ParseError::Zip {
        path: path.to_owned(),
        error,
    })?;

    // Member indices define capture order; entries are re-indexed densely.
    let mut members: Vec<(u64, String, String)> = archive
        .file_names()
        .filter_map(|name| {
            let captures = member_name_regex().captures(name)?;
            let index: u64 = captures[1].parse().ok()?;
            Some((index, captures[2].to_owned(), name.to_owned()))
        })
        .collect();
    members.sort_by(|a, b| (a.0, a.2.as_str()).cmp(&(b.0, b.2.as_str())));

    let mut entries = Vec::with_capacity(members.len());
    for (position, (_, fallback_id, member_name)) in members.into_iter().enumerate() {
        let mut contents = String::new();
        archive
            .by_name(&member_name)
            .map_err(|error| ParseError::Zip {
                path: path.to_owned(),
                error,
            })?
            .read_to_string(&mut contents)
            .map_err(|error| ParseError::Io {
                path: path.to_owned(),
                error,
            })?;
        let pm: PmEntry = serde_json::from_str(&contents).map_err(|error| ParseError::Member {
            path: path.to_owned(),
            member: member_name.clone(),
            error,
        })?;
        entries.push(from_pm_entry(path, position, fallback_id, pm)?);
    }
    Ok(entries)
}

/// Serializes entries to a `.proxymanlogv2` archive, atomically.
pub(crate) fn serialize(entries: &[&TraceEntry], dest: &Utf8Path) -> Result<(), ExportError> {
    AtomicFile::new(dest, OverwriteBehavior::AllowOverwrite)
        .write(|file| {
            let mut zip = ZipWriter::new(file);
            let options =
                SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

            for (index, entry) in entries.iter().enumerate() {
                let (pm, member_name) = to_pm_entry(entry, index);
                let json =
                    serde_json::to_string_pretty(&pm).map_err(|error| ExportError::Json {
                        path: dest.to_owned(),
                        error,
                    })?;
                zip.start_file(member_name, options)
                    .map_err(|error| ExportError::Zip {
                        path: dest.to_owned(),
                        error,
                    })?;
                zip.write_all(json.as_bytes())
                    .map_err(|error| ExportError::Io {
                        path: dest.to_owned(),
                        error,
                    })?;
            }

            zip.finish().map_err(|error| ExportError::Zip {
                path: dest.to_owned(),
                error,
            })?;
            Ok(())
        })
        .map_err(|error| match error {
            atomicwrites::Error::Internal(error) => ExportError::Io {
                path: dest.to_owned(),
                error,
            },
            atomicwrites::Error::User(error) => error,
        })
}

fn from_pm_entry(
    path: &Utf8Path,
    index: usize,
    fallback_id: String,
    pm: PmEntry,
) -> Result<TraceEntry, ParseError> {
    let url = request_url(&pm.request).ok_or_else(|| ParseError::Invalid {
        format: TraceFormat::ProxymanLogV2,
        path: path.to_owned(),
        message: format!("entry {index} has no parseable request URL"),
    })?;

    let request_headers = header_map(&pm.request.header);
    let mut request = RequestDetails::new(
        pm.request.method.name.to_ascii_uppercase(),
        url,
        request_headers,
    );
    if let Some(body) = decode_body(pm.request.body_data.as_deref(), index) {
        request = request.with_body(body);
    }

    let response = match &pm.response {
        Some(pm_response) => {
            let headers = header_map(&pm_response.header);
            let content_type = headers.get("Content-Type").map(str::to_owned);
            let body_bytes = decode_body(pm_response.body_data.as_deref(), index);
            let raw_size = pm_response
                .body_size
                .or_else(|| body_bytes.as_ref().map(|bytes| bytes.len() as u64));
            let compressed_size = pm_response.body_encoded_size.or(raw_size);
            ResponseDetails::new(
                pm_response.status.code,
                headers,
                content_type,
                ResponseBody::new(body_bytes, raw_size, compressed_size),
            )
        }
        None => ResponseDetails::new(0, HeaderMap::new(), None, ResponseBody::default()),
    };

    let timeline = Timeline::new(
        instant(pm.timing.request_started_at),
        instant(pm.timing.request_ended_at),
        instant(pm.timing.response_started_at),
        instant(pm.timing.response_ended_at),
    );

    let id = pm.id.clone().unwrap_or(fallback_id);
    let comment = pm
        .style
        .as_ref()
        .and_then(|style| style.comment.clone())
        .or_else(|| pm.notes.clone());
    let annotations = pm
        .response
        .as_ref()
        .and_then(|r| r.custom_previewer_tabs.clone())
        .unwrap_or_default();

    Ok(TraceEntry::new(index, id, request, response, timeline)
        .with_comment(comment)
        .with_annotations(annotations))
}

fn to_pm_entry(entry: &TraceEntry, index: usize) -> (PmEntry, String) {
    let url = entry.request().url();
    let scheme = url.scheme().to_owned();
    let is_ssl = scheme == "https";
    let default_port = if is_ssl { 443 } else { 80 };
    let uri = match url.query() {
        Some(query) => format!("{}?{query}", url.path()),
        None => url.path().to_owned(),
    };

    let request = PmRequest {
        host: url.host_str().map(str::to_owned),
        port: Some(url.port().unwrap_or(default_port)),
        is_ssl,
        method: PmMethod {
            name: entry.request().method().to_owned(),
        },
        scheme: Some(scheme),
        full_path: Some(url.as_str().to_owned()),
        uri: Some(uri),
        version: PmVersion::default(),
        header: header_block(entry.request().headers()),
        body_data: entry.request().body().map(|body| BASE64.encode(body)),
        is_web_socket_upgrade: false,
    };

    let body = entry.response().body();
    let body_size = body
        .raw_size()
        .or_else(|| body.bytes().map(|bytes| bytes.len() as u64));
    let annotations = entry.annotations();
    let response = PmResponse {
        status: PmStatus {
            code: entry.response().status(),
            phrase: helpers::status_text(entry.response().status()).to_owned(),
            strict: false,
        },
        version: PmVersion::default(),
        header: header_block(entry.response().headers()),
        body_data: body.bytes().map(|bytes| BASE64.encode(bytes)),
        body_size,
        body_encoded_size: body.compressed_size().or(body_size),
        created_at: entry
            .timeline()
            .response_end()
            .or(entry.timeline().request_start())
            .map(epoch_seconds),
        error: None,
        custom_previewer_tabs: (!annotations.is_empty()).then(|| annotations.clone()),
    };

    let timing = PmTiming {
        request_started_at: entry.timeline().request_start().map(epoch_seconds),
        request_ended_at: entry.timeline().request_end().map(epoch_seconds),
        response_started_at: entry.timeline().response_start().map(epoch_seconds),
        response_ended_at: entry.timeline().response_end().map(epoch_seconds),
    };

    let id = member_safe_id(entry, index);
    let pm = PmEntry {
        id: Some(entry.id().to_owned()),
        name: Some(entry.id().to_owned()),
        request,
        response: Some(response),
        timing,
        is_ssl,
        is_intercepted: true,
        is_relayed: false,
        is_from_file: false,
        timezone: Some("GMT".to_owned()),
        style: entry.comment().map(|comment| PmStyle {
            comment: Some(comment.to_owned()),
        }),
        notes: None,
    };
    (pm, format!("request_{index}_{id}"))
}

fn request_url(request: &PmRequest) -> Option<Url> {
    if let Some(full_path) = request.full_path.as_deref() {
        if let Ok(url) = Url::parse(full_path) {
            return Some(url);
        }
    }

    let host = request.host.as_deref()?;
    let scheme = request.scheme.as_deref().unwrap_or("http");
    let path_and_query = request.uri.as_deref().unwrap_or("/");
    let mut url = format!("{scheme}://{host}");
    if let Some(port) = request.port {
        let default = (scheme == "http" && port == 80) || (scheme == "https" && port == 443);
        if !default {
            url.push_str(&format!(":{port}"));
        }
    }
    url.push_str(path_and_query);
    Url::parse(&url).ok()
}

fn header_map(block: &PmHeaderBlock) -> HeaderMap {
    block
        .entries
        .iter()
        .map(|header| (header.key.name.clone(), header.value.clone()))
        .collect()
}

fn header_block(headers: &HeaderMap) -> PmHeaderBlock {
    PmHeaderBlock {
        entries: headers
            .iter()
            .map(|(name, value)| PmHeaderEntry {
                key: PmHeaderKey {
                    name: name.to_owned(),
                    name_in_lowercase: name.to_ascii_lowercase(),
                },
                value: value.to_owned(),
                is_enabled: true,
            })
            .collect(),
    }
}

fn decode_body(body_data: Option<&str>, index: usize) -> Option<Vec<u8>> {
    let body_data = body_data?;
    if body_data.is_empty() {
        return None;
    }
    match BASE64.decode(body_data) {
        Ok(bytes) => Some(bytes),
        Err(error) => {
            warn!("entry {index}: undecodable base64 bodyData: {error}");
            None
        }
    }
}

/// Epoch instants are stored as fractional seconds. Microsecond precision
/// survives the f64 round trip for any realistic capture date.
fn epoch_seconds(instant: DateTime<Utc>) -> f64 {
    instant.timestamp_micros() as f64 / 1_000_000.0
}

fn instant(seconds: Option<f64>) -> Option<DateTime<Utc>> {
    seconds.and_then(|seconds| DateTime::from_timestamp_micros((seconds * 1_000_000.0).round() as i64))
}

fn member_safe_id(entry: &TraceEntry, index: usize) -> String {
    if entry.has_synthesized_id() {
        return format!("entry{index}");
    }
    let cleaned: String = entry
        .id()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if cleaned.is_empty() {
        format!("entry{index}")
    } else {
        cleaned
    }
}
