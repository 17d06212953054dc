// Copyright (c) The abrtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by abrtrace.

use crate::{abr::Direction, format::TraceFormat};
use camino::Utf8PathBuf;
use thiserror::Error;
use url::Url;

/// An error that occurs while parsing an [`AbrFormat`](crate::abr::AbrFormat)
/// value from a string.
#[derive(Clone, Debug, Error)]
#[error("unrecognized ABR format: {input} (known values: hls, dash)")]
pub struct UnknownAbrFormat {
    pub(crate) input: String,
}

/// An error that occurs while detecting the capture format of a path.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FormatDetectError {
    /// The path does not exist.
    #[error("path not found: `{path}`")]
    NotFound {
        /// The missing path.
        path: Utf8PathBuf,
    },

    /// No format adapter recognizes the path.
    #[error(
        "unsupported capture format for `{path}`{} (supported: .har, .proxymanlogv2, .log, or a multifile directory)",
        extension_note(.extension.as_deref()),
    )]
    UnsupportedFormat {
        /// The path that was probed.
        path: Utf8PathBuf,
        /// The extension that failed to match, if the path had one.
        extension: Option<String>,
    },
}

fn extension_note(extension: Option<&str>) -> String {
    match extension {
        Some(extension) => format!(" (extension `.{extension}`)"),
        None => String::new(),
    }
}

/// An error that occurs while parsing a capture file or directory into trace
/// entries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// An I/O error occurred while reading the source.
    #[error("error reading `{path}`")]
    Io {
        /// The file being read.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The source is not structurally valid JSON for its format.
    #[error("invalid JSON in `{path}`")]
    Json {
        /// The file being parsed.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// A HAR archive failed to parse.
    #[error("invalid HAR archive `{path}`")]
    Har {
        /// The file being parsed.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: har_io::ParseError,
    },

    /// A Proxyman log is not a readable zip archive.
    #[error("invalid Proxyman log (zip) archive `{path}`")]
    Zip {
        /// The file being read.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: zip::result::ZipError,
    },

    /// A member of a Proxyman log archive holds malformed entry JSON.
    #[error("invalid entry `{member}` in Proxyman log `{path}`")]
    Member {
        /// The archive being read.
        path: Utf8PathBuf,
        /// The offending archive member.
        member: String,
        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// The source is structurally invalid in a format-specific way.
    #[error("invalid {format} input `{path}`: {message}")]
    Invalid {
        /// The format being parsed.
        format: TraceFormat,
        /// The file being parsed.
        path: Utf8PathBuf,
        /// What was wrong with it.
        message: String,
    },
}

/// An error that occurs while opening a capture into a
/// [`Trace`](crate::trace::Trace).
#[derive(Debug, Error)]
pub enum OpenTraceError {
    /// Format detection failed.
    #[error(transparent)]
    Detect(#[from] FormatDetectError),

    /// The capture failed to parse.
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// An error which indicates that an entry id was looked up but is not present
/// in the trace.
#[derive(Clone, Debug, Error)]
#[error("entry id `{id}` not found in trace")]
pub struct EntryNotFound {
    id: String,
}

impl EntryNotFound {
    pub(crate) fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// The id that was looked up.
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// An error that occurs while navigating from an entry within its manifest
/// stream.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum NextEntryError {
    /// No entry has the given id.
    #[error("entry id `{id}` not found in trace")]
    EntryNotFound {
        /// The id that was looked up.
        id: String,
    },

    /// The entry exists but does not belong to any manifest stream.
    #[error("entry `{id}` is not part of any manifest stream")]
    NotAManifestEntry {
        /// The id of the entry.
        id: String,
    },

    /// Stepping the requested number of positions leaves the stream.
    #[error("no entry {n} positions {direction} of `{id}` in its manifest stream")]
    OutOfRange {
        /// The id of the reference entry.
        id: String,
        /// The direction that was stepped.
        direction: Direction,
        /// The number of positions requested.
        n: usize,
    },
}

/// An error that occurs while constructing a manifest stream from a trace.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ManifestStreamError {
    /// No entry in the trace canonicalizes to the given manifest URL.
    #[error("no entries found for manifest URL `{url}`")]
    NoMatchingEntries {
        /// The URL that was queried.
        url: Url,
    },
}

/// A precondition violation: the entry passed to
/// [`ManifestStream::relative_entry`](crate::abr::ManifestStream::relative_entry)
/// is not a member of that stream.
#[derive(Clone, Debug, Error)]
#[error("entry `{id}` is not a member of this manifest stream")]
pub struct NotInStream {
    id: String,
}

impl NotInStream {
    pub(crate) fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// The id of the entry that was passed in.
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// An error that occurs while exporting entries to a capture format.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExportError {
    /// The destination format does not support serialization.
    #[error("the {format} format is read-only and cannot be exported to")]
    UnsupportedFormat {
        /// The format that was requested.
        format: TraceFormat,
    },

    /// The destination format requires a request-start instant the entry
    /// does not carry.
    #[error("entry `{id}` has no request-start timestamp, required for {format} export")]
    MissingRequestStart {
        /// The id of the offending entry.
        id: String,
        /// The format being exported to.
        format: TraceFormat,
    },

    /// An I/O error occurred while writing the destination. Writes are
    /// atomic: the destination is left untouched on failure.
    #[error("error writing `{path}`")]
    Io {
        /// The destination path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// HAR serialization failed.
    #[error("error serializing HAR archive to `{path}`")]
    Serialize {
        /// The destination path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: har_io::SerializeError,
    },

    /// JSON serialization failed.
    #[error("error serializing JSON to `{path}`")]
    Json {
        /// The destination path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// Writing the Proxyman zip container failed.
    #[error("error writing Proxyman log (zip) archive `{path}`")]
    Zip {
        /// The destination path.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: zip::result::ZipError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_format_message_names_extension() {
        let error = FormatDetectError::UnsupportedFormat {
            path: "capture.pcap".into(),
            extension: Some("pcap".to_owned()),
        };
        let message = error.to_string();
        assert!(message.contains("`.pcap`"), "message was: {message}");
        assert!(message.contains(".proxymanlogv2"), "message was: {message}");
    }

    #[test]
    fn test_out_of_range_message() {
        let error = NextEntryError::OutOfRange {
            id: "e3".to_owned(),
            direction: Direction::Backward,
            n: 2,
        };
        assert_eq!(
            error.to_string(),
            "no entry 2 positions backward of `e3` in its manifest stream"
        );
    }
}
