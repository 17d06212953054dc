// Copyright (c) The abrtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::{ParseError, SerializeError};
use serde::{Deserialize, Serialize};
use std::{io, str::FromStr};

fn default_size() -> i64 {
    -1
}

fn default_timing() -> f64 {
    -1.0
}

fn default_http_version() -> String {
    "HTTP/1.1".to_owned()
}

/// The root element of a HAR archive.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct HarFile {
    /// The `log` envelope every HAR file is wrapped in.
    pub log: HarLog,
}

impl HarFile {
    /// Creates a new, empty `HarFile` with the given creator stanza.
    pub fn new(creator: HarCreator) -> Self {
        Self {
            log: HarLog {
                version: "1.2".to_owned(),
                creator,
                browser: None,
                pages: None,
                entries: vec![],
                comment: None,
            },
        }
    }

    /// Parses a HAR archive from a reader.
    pub fn from_reader(reader: impl io::Read) -> Result<Self, ParseError> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// Parses a HAR archive from raw bytes.
    ///
    /// A UTF-8 byte order mark, which several capture tools prepend, is
    /// stripped before parsing.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ParseError> {
        let bytes = bytes.strip_prefix(b"\xef\xbb\xbf").unwrap_or(bytes);
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Serializes this archive to the given writer as pretty-printed JSON.
    pub fn serialize(&self, writer: impl io::Write) -> Result<(), SerializeError> {
        Ok(serde_json::to_writer_pretty(writer, self)?)
    }

    /// Serializes this archive to a string.
    pub fn to_string(&self) -> Result<String, SerializeError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl FromStr for HarFile {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_slice(s.as_bytes())
    }
}

/// The `log` object: format version, creator, and the captured entries.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct HarLog {
    /// HAR format version. `"1.2"` in practice.
    pub version: String,

    /// The application that produced this archive.
    #[serde(default)]
    pub creator: HarCreator,

    /// The browser the traffic was captured from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<HarCreator>,

    /// Page groupings. Carried opaquely; entry-level tooling ignores them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<serde_json::Value>,

    /// The captured HTTP transactions, in capture order.
    pub entries: Vec<HarEntry>,

    /// Free-form comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// The application that created an archive.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct HarCreator {
    /// Application name.
    #[serde(default)]
    pub name: String,

    /// Application version.
    #[serde(default)]
    pub version: String,

    /// Free-form comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Default for HarCreator {
    fn default() -> Self {
        Self {
            name: "unknown".to_owned(),
            version: String::new(),
            comment: None,
        }
    }
}

/// A single captured HTTP transaction.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct HarEntry {
    /// Reference to the parent page, if pages are tracked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pageref: Option<String>,

    /// ISO 8601 instant at which the request started, with timezone.
    #[serde(rename = "startedDateTime", default)]
    pub started_date_time: String,

    /// Total elapsed time of the transaction in milliseconds.
    #[serde(default)]
    pub time: f64,

    /// The request half of the transaction.
    #[serde(default)]
    pub request: HarRequest,

    /// The response half of the transaction.
    #[serde(default)]
    pub response: HarResponse,

    /// Cache usage info. Carried opaquely.
    #[serde(default)]
    pub cache: serde_json::Map<String, serde_json::Value>,

    /// Phase timings. The HAR spec requires `send`, `wait` and `receive`;
    /// `-1` marks a phase that does not apply.
    #[serde(default)]
    pub timings: HarTimings,

    /// IP address of the server, if recorded.
    #[serde(
        rename = "serverIPAddress",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub server_ip_address: Option<String>,

    /// Connection identifier, if recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,

    /// Free-form comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// Non-standard stable entry identifier (`_id`), emitted by some proxies.
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// The request half of an entry.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct HarRequest {
    /// HTTP method.
    #[serde(default)]
    pub method: String,

    /// Absolute request URL.
    #[serde(default)]
    pub url: String,

    /// HTTP protocol version.
    #[serde(rename = "httpVersion", default = "default_http_version")]
    pub http_version: String,

    /// Cookie list. Carried opaquely.
    #[serde(default)]
    pub cookies: Vec<serde_json::Value>,

    /// Request headers, in wire order.
    #[serde(default)]
    pub headers: Vec<HarHeader>,

    /// Parsed query parameters, in URL order.
    #[serde(rename = "queryString", default)]
    pub query_string: Vec<HarQueryParam>,

    /// Posted data, for requests that carry a body.
    #[serde(rename = "postData", default, skip_serializing_if = "Option::is_none")]
    pub post_data: Option<HarPostData>,

    /// Total size of the request headers in bytes, or `-1` if unknown.
    #[serde(rename = "headersSize", default = "default_size")]
    pub headers_size: i64,

    /// Size of the request body in bytes, or `-1` if unknown.
    #[serde(rename = "bodySize", default = "default_size")]
    pub body_size: i64,

    /// Free-form comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Default for HarRequest {
    fn default() -> Self {
        Self {
            method: "GET".to_owned(),
            url: String::new(),
            http_version: default_http_version(),
            cookies: vec![],
            headers: vec![],
            query_string: vec![],
            post_data: None,
            headers_size: -1,
            body_size: -1,
            comment: None,
        }
    }
}

/// The response half of an entry.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct HarResponse {
    /// HTTP status code. `0` marks an aborted transaction.
    #[serde(default)]
    pub status: u16,

    /// HTTP status text.
    #[serde(rename = "statusText", default)]
    pub status_text: String,

    /// HTTP protocol version.
    #[serde(rename = "httpVersion", default = "default_http_version")]
    pub http_version: String,

    /// Cookie list. Carried opaquely.
    #[serde(default)]
    pub cookies: Vec<serde_json::Value>,

    /// Response headers, in wire order.
    #[serde(default)]
    pub headers: Vec<HarHeader>,

    /// The response body.
    #[serde(default)]
    pub content: HarContent,

    /// Redirect target from the `Location` header, or empty.
    #[serde(rename = "redirectURL", default)]
    pub redirect_url: String,

    /// Total size of the response headers in bytes, or `-1` if unknown.
    #[serde(rename = "headersSize", default = "default_size")]
    pub headers_size: i64,

    /// Size of the response body as received in bytes, or `-1` if unknown.
    #[serde(rename = "bodySize", default = "default_size")]
    pub body_size: i64,

    /// Free-form comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Default for HarResponse {
    fn default() -> Self {
        Self {
            status: 0,
            status_text: String::new(),
            http_version: default_http_version(),
            cookies: vec![],
            headers: vec![],
            content: HarContent::default(),
            redirect_url: String::new(),
            headers_size: -1,
            body_size: -1,
            comment: None,
        }
    }
}

/// A single name/value header pair.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct HarHeader {
    /// Header name, original casing preserved.
    pub name: String,

    /// Header value.
    #[serde(default)]
    pub value: String,
}

impl HarHeader {
    /// Creates a new header pair.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A single parsed query-string parameter.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct HarQueryParam {
    /// Parameter name.
    pub name: String,

    /// Parameter value.
    #[serde(default)]
    pub value: String,
}

/// Posted request data.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct HarPostData {
    /// MIME type of the posted data.
    #[serde(rename = "mimeType", default)]
    pub mime_type: String,

    /// The posted body as text.
    #[serde(default)]
    pub text: String,

    /// Free-form comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// The body of a response.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct HarContent {
    /// Decoded (uncompressed) body size in bytes, or `-1` if unknown.
    #[serde(default = "default_size")]
    pub size: i64,

    /// Bytes saved by content encoding, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<i64>,

    /// MIME type of the body, including charset parameters if present.
    #[serde(rename = "mimeType", default)]
    pub mime_type: String,

    /// The body itself: plain text, or base64 when `encoding` says so.
    /// Absent when the capture tool did not record bodies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Body transfer encoding; `"base64"` is the only value seen in practice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,

    /// Free-form comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Default for HarContent {
    fn default() -> Self {
        Self {
            size: -1,
            compression: None,
            mime_type: String::new(),
            text: None,
            encoding: None,
            comment: None,
        }
    }
}

/// Phase timings for an entry, in milliseconds. `-1` marks a phase that does
/// not apply to the transaction.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct HarTimings {
    /// Time spent waiting for a network connection.
    #[serde(default = "default_timing")]
    pub blocked: f64,

    /// DNS resolution time.
    #[serde(default = "default_timing")]
    pub dns: f64,

    /// Time required to create the TCP connection.
    #[serde(default = "default_timing")]
    pub connect: f64,

    /// Time required to send the request to the server.
    #[serde(default = "default_timing")]
    pub send: f64,

    /// Time spent waiting for the first response byte.
    #[serde(default = "default_timing")]
    pub wait: f64,

    /// Time required to read the entire response.
    #[serde(default = "default_timing")]
    pub receive: f64,

    /// TLS negotiation time, if it applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl: Option<f64>,
}

impl Default for HarTimings {
    fn default() -> Self {
        Self {
            blocked: -1.0,
            dns: -1.0,
            connect: -1.0,
            send: -1.0,
            wait: -1.0,
            receive: -1.0,
            ssl: None,
        }
    }
}
