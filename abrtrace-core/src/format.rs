// Copyright (c) The abrtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Capture format adapters.
//!
//! Every supported format normalizes its source material into a sequence of
//! [`TraceEntry`](crate::entry::TraceEntry) values on the way in, and (for
//! writable formats) serializes a sequence of entries on the way out.
//! Dispatch is an explicit closed enum: there is no runtime format registry.

pub mod bodylogger;
pub mod har;
pub mod multifile;
pub mod proxyman;

use crate::{
    entry::TraceEntry,
    errors::{ExportError, FormatDetectError, ParseError},
};
use camino::Utf8Path;
use std::fmt;

/// A supported capture format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TraceFormat {
    /// HTTP Archive JSON (`.har`).
    Har,
    /// Proxyman log v2: a zip archive of per-entry JSON files
    /// (`.proxymanlogv2`).
    ProxymanLogV2,
    /// A structured request/body text log (`.log`). Read-only.
    BodyLogger,
    /// A directory of per-entry `meta.json`/body/annotation files.
    Multifile,
}

impl TraceFormat {
    /// Every supported format, in detection order.
    pub const ALL: &'static [TraceFormat] = &[
        TraceFormat::Har,
        TraceFormat::ProxymanLogV2,
        TraceFormat::BodyLogger,
        TraceFormat::Multifile,
    ];

    /// Detects the capture format of a path.
    ///
    /// A directory is a multifile capture; files are recognized by
    /// extension. Fails with [`FormatDetectError::NotFound`] if the path
    /// does not exist and [`FormatDetectError::UnsupportedFormat`] if no
    /// adapter recognizes it.
    pub fn detect(path: &Utf8Path) -> Result<Self, FormatDetectError> {
        if !path.as_std_path().exists() {
            return Err(FormatDetectError::NotFound {
                path: path.to_owned(),
            });
        }
        if path.is_dir() {
            return Ok(Self::Multifile);
        }

        let extension = path.extension().map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("har") => Ok(Self::Har),
            Some("proxymanlogv2") => Ok(Self::ProxymanLogV2),
            Some("log") => Ok(Self::BodyLogger),
            _ => Err(FormatDetectError::UnsupportedFormat {
                path: path.to_owned(),
                extension,
            }),
        }
    }

    /// Parses the capture at `path` into entries, in source order.
    ///
    /// Structurally invalid input is a [`ParseError`] naming the offending
    /// file; adapters never silently drop entries.
    pub fn parse(self, path: &Utf8Path) -> Result<Vec<TraceEntry>, ParseError> {
        match self {
            Self::Har => har::parse(path),
            Self::ProxymanLogV2 => proxyman::parse(path),
            Self::BodyLogger => bodylogger::parse(path),
            Self::Multifile => multifile::parse(path),
        }
    }

    /// Serializes entries to `dest` in this format.
    ///
    /// The inverse of [`parse`](Self::parse) for writable formats; the
    /// read-only bodylogger format declines with
    /// [`ExportError::UnsupportedFormat`].
    pub fn serialize(self, entries: &[&TraceEntry], dest: &Utf8Path) -> Result<(), ExportError> {
        match self {
            Self::Har => har::serialize(entries, dest),
            Self::ProxymanLogV2 => proxyman::serialize(entries, dest),
            Self::BodyLogger => Err(ExportError::UnsupportedFormat { format: self }),
            Self::Multifile => multifile::serialize(entries, dest),
        }
    }

    /// Returns true if this format supports serialization.
    pub fn is_writable(self) -> bool {
        !matches!(self, Self::BodyLogger)
    }
}

impl fmt::Display for TraceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Har => "har",
            Self::ProxymanLogV2 => "proxymanlogv2",
            Self::BodyLogger => "bodylogger",
            Self::Multifile => "multifile",
        };
        f.write_str(name)
    }
}
