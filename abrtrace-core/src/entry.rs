// Copyright (c) The abrtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The canonical in-memory model for one captured HTTP transaction.
//!
//! Format adapters normalize their source material into [`TraceEntry`]
//! values; everything downstream (filtering, ABR detection, manifest
//! streams, export) operates on this model alone. Entries are immutable once
//! constructed and are owned by the [`Trace`](crate::trace::Trace) that
//! created them.

use crate::{abr::AbrFormat, helpers};
use chrono::{DateTime, TimeDelta, Utc};
use debug_ignore::DebugIgnore;
use indexmap::IndexMap;
use std::{borrow::Cow, fmt};
use url::Url;

/// Prefix used for entry ids synthesized from the source position, when the
/// capture format does not assign stable identifiers of its own.
pub(crate) const SYNTHESIZED_ID_PREFIX: &str = "index-";

/// Synthesizes a stable id for the entry at the given source position.
pub(crate) fn synthesized_id(index: usize) -> String {
    format!("{SYNTHESIZED_ID_PREFIX}{index}")
}

/// An ordered header collection with case-insensitive name lookup.
///
/// Wire order and original casing are preserved so that export can reproduce
/// the capture faithfully; lookup via [`get`](Self::get) ignores ASCII case
/// and returns the first match.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    /// Creates an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header, keeping insertion order.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Returns the value of the first header with the given name,
    /// ASCII-case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns true if a header with the given name is present.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterates over `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// The number of headers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no headers are present.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, String)> for HeaderMap {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a HeaderMap {
    type Item = (&'a str, &'a str);
    type IntoIter = Box<dyn Iterator<Item = (&'a str, &'a str)> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str())))
    }
}

/// Details of an HTTP request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestDetails {
    method: String,
    url: Url,
    headers: HeaderMap,
    body: DebugIgnore<Option<Vec<u8>>>,
}

impl RequestDetails {
    /// Creates request details without a body.
    pub fn new(method: impl Into<String>, url: Url, headers: HeaderMap) -> Self {
        Self {
            method: method.into(),
            url,
            headers,
            body: DebugIgnore(None),
        }
    }

    /// Attaches a request body.
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = DebugIgnore(Some(body));
        self
    }

    /// The HTTP method, uppercase.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The absolute request URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The request body, if the capture recorded one.
    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }
}

/// The body of an HTTP response.
///
/// `raw_size` is the decoded (uncompressed) size, `compressed_size` the
/// transfer size; either may be unknown depending on the capture format.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseBody {
    bytes: DebugIgnore<Option<Vec<u8>>>,
    raw_size: Option<u64>,
    compressed_size: Option<u64>,
}

impl ResponseBody {
    /// Creates a response body.
    pub fn new(bytes: Option<Vec<u8>>, raw_size: Option<u64>, compressed_size: Option<u64>) -> Self {
        Self {
            bytes: DebugIgnore(bytes),
            raw_size,
            compressed_size,
        }
    }

    /// Creates a response body from decoded bytes, deriving both sizes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let size = bytes.len() as u64;
        Self::new(Some(bytes), Some(size), Some(size))
    }

    /// The decoded body bytes, if recorded.
    pub fn bytes(&self) -> Option<&[u8]> {
        self.bytes.as_deref()
    }

    /// The body as text, lossily decoded as UTF-8.
    pub fn text(&self) -> Option<Cow<'_, str>> {
        self.bytes().map(String::from_utf8_lossy)
    }

    /// The decoded (uncompressed) size in bytes, if known.
    pub fn raw_size(&self) -> Option<u64> {
        self.raw_size
    }

    /// The transfer (possibly compressed) size in bytes, if known.
    pub fn compressed_size(&self) -> Option<u64> {
        self.compressed_size
    }
}

/// Details of an HTTP response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseDetails {
    status: u16,
    headers: HeaderMap,
    content_type: Option<String>,
    mime_type: Option<String>,
    body: ResponseBody,
}

impl ResponseDetails {
    /// Creates response details. The resolved MIME type is the content type
    /// with its parameters (charset and friends) stripped.
    pub fn new(
        status: u16,
        headers: HeaderMap,
        content_type: Option<String>,
        body: ResponseBody,
    ) -> Self {
        let mime_type = content_type
            .as_deref()
            .map(helpers::strip_mime_params)
            .map(str::to_owned);
        Self {
            status,
            headers,
            content_type,
            mime_type,
            body,
        }
    }

    /// Overrides the resolved MIME type, for formats that record it
    /// independently of the content type.
    pub fn with_mime_type(mut self, mime_type: Option<String>) -> Self {
        self.mime_type = mime_type;
        self
    }

    /// The HTTP status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// The response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The full content type, parameters included, if recorded.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// The resolved MIME type: content type with parameters stripped.
    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    /// The response body.
    pub fn body(&self) -> &ResponseBody {
        &self.body
    }
}

/// The timeline of an HTTP transaction. All instants are optional; capture
/// formats differ in which phases they record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Timeline {
    request_start: Option<DateTime<Utc>>,
    request_end: Option<DateTime<Utc>>,
    response_start: Option<DateTime<Utc>>,
    response_end: Option<DateTime<Utc>>,
}

impl Timeline {
    /// Creates a timeline from the four phase instants.
    pub fn new(
        request_start: Option<DateTime<Utc>>,
        request_end: Option<DateTime<Utc>>,
        response_start: Option<DateTime<Utc>>,
        response_end: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            request_start,
            request_end,
            response_start,
            response_end,
        }
    }

    /// Creates a timeline with only the request-start instant.
    pub fn starting_at(request_start: DateTime<Utc>) -> Self {
        Self {
            request_start: Some(request_start),
            ..Self::default()
        }
    }

    /// The instant the request started.
    pub fn request_start(&self) -> Option<DateTime<Utc>> {
        self.request_start
    }

    /// The instant the request finished sending.
    pub fn request_end(&self) -> Option<DateTime<Utc>> {
        self.request_end
    }

    /// The instant the first response byte arrived.
    pub fn response_start(&self) -> Option<DateTime<Utc>> {
        self.response_start
    }

    /// The instant the response finished.
    pub fn response_end(&self) -> Option<DateTime<Utc>> {
        self.response_end
    }

    /// Total transaction duration, when both endpoints are known.
    pub fn duration(&self) -> Option<TimeDelta> {
        match (self.request_start, self.response_end) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

/// One captured HTTP transaction.
///
/// Entries are immutable after construction. `index` is the 0-based position
/// in source capture order; `id` is unique within the owning trace, either
/// assigned by the format adapter or synthesized as `index-N`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceEntry {
    index: usize,
    id: String,
    request: RequestDetails,
    response: ResponseDetails,
    timeline: Timeline,
    comment: Option<String>,
    annotations: IndexMap<String, String>,
}

impl TraceEntry {
    /// Creates an entry.
    pub fn new(
        index: usize,
        id: impl Into<String>,
        request: RequestDetails,
        response: ResponseDetails,
        timeline: Timeline,
    ) -> Self {
        Self {
            index,
            id: id.into(),
            request,
            response,
            timeline,
            comment: None,
            annotations: IndexMap::new(),
        }
    }

    /// Attaches a free-form comment.
    pub fn with_comment(mut self, comment: Option<String>) -> Self {
        self.comment = comment;
        self
    }

    /// Attaches format-specific metadata. The core carries these opaquely;
    /// exporters drop the ones the destination format cannot represent.
    pub fn with_annotations(mut self, annotations: IndexMap<String, String>) -> Self {
        self.annotations = annotations;
        self
    }

    /// The 0-based position of this entry in source capture order.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The stable identifier, unique within the owning trace.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns true if the id was synthesized from the source position
    /// rather than assigned by the capture format.
    pub fn has_synthesized_id(&self) -> bool {
        self.id.starts_with(SYNTHESIZED_ID_PREFIX)
    }

    /// The request half of the transaction.
    pub fn request(&self) -> &RequestDetails {
        &self.request
    }

    /// The response half of the transaction.
    pub fn response(&self) -> &ResponseDetails {
        &self.response
    }

    /// The transaction timeline.
    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// The free-form comment, if any.
    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// Format-specific metadata, in insertion order.
    pub fn annotations(&self) -> &IndexMap<String, String> {
        &self.annotations
    }

    /// The ABR format this entry's response looks like, using the default
    /// classification rules (no ignored query parameters).
    pub fn abr_format(&self) -> Option<AbrFormat> {
        AbrFormat::classify(self.response.mime_type(), self.request.url())
    }

    /// The response body bytes, or an empty slice if none were recorded.
    pub fn body_bytes(&self) -> &[u8] {
        self.response.body().bytes().unwrap_or_default()
    }
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} -> {}",
            self.id,
            self.request.method(),
            self.request.url(),
            self.response.status(),
        )
    }
}
