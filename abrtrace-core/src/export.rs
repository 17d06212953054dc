// Copyright (c) The abrtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Exporting traces and entry subsets to capture formats.
//!
//! Serialization preserves method, URL, headers, status code, bodies
//! (byte-exact) and timing for every entry. Format-specific metadata that the
//! destination cannot represent (the bodylogger's log-origin annotations
//! when writing HAR, for instance) is dropped silently: a documented,
//! intentional lossy conversion, not an error.
//!
//! Single-file destinations are written atomically (temporary file, then
//! rename), so a failure mid-write never leaves a format-valid but truncated
//! file at the destination path.

use crate::{entry::TraceEntry, errors::ExportError, format::TraceFormat, trace::Trace};
use camino::Utf8Path;
use tracing::debug;

/// Serializes entries to capture formats.
///
/// An exporter either snapshots every entry of a [`Trace`]
/// ([`Exporter::new`]) or wraps an explicit entry list
/// ([`Exporter::from_entries`]), which makes exporting a filtered subset a
/// one-liner:
///
/// ```no_run
/// # fn example(trace: &abrtrace_core::trace::Trace) -> Result<(), Box<dyn std::error::Error>> {
/// use abrtrace_core::{export::Exporter, trace::TraceFilter};
///
/// let manifests = trace.filter(&TraceFilter::new().mime_type("application/dash+xml"));
/// Exporter::from_entries(manifests).to_har("manifests.har".as_ref())?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Exporter<'a> {
    entries: Vec<&'a TraceEntry>,
}

impl<'a> Exporter<'a> {
    /// Creates an exporter over every entry currently in the trace.
    pub fn new(trace: &'a Trace) -> Self {
        Self {
            entries: trace.entries().iter().collect(),
        }
    }

    /// Creates an exporter over an explicit, ordered entry list.
    pub fn from_entries(entries: impl IntoIterator<Item = &'a TraceEntry>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// The entries this exporter will write, in output order.
    pub fn entries(&self) -> &[&'a TraceEntry] {
        &self.entries
    }

    /// Serializes the entries to `dest` in the given format.
    ///
    /// Fails with [`ExportError::UnsupportedFormat`] for read-only formats.
    pub fn to_format(&self, format: TraceFormat, dest: &Utf8Path) -> Result<(), ExportError> {
        debug!(
            "exporting {} entries to {format} at `{dest}`",
            self.entries.len()
        );
        format.serialize(&self.entries, dest)
    }

    /// Serializes the entries to a `.har` file.
    pub fn to_har(&self, dest: &Utf8Path) -> Result<(), ExportError> {
        self.to_format(TraceFormat::Har, dest)
    }

    /// Serializes the entries to a `.proxymanlogv2` archive.
    pub fn to_proxyman(&self, dest: &Utf8Path) -> Result<(), ExportError> {
        self.to_format(TraceFormat::ProxymanLogV2, dest)
    }

    /// Serializes the entries into a multifile capture directory.
    pub fn to_multifile(&self, dest: &Utf8Path) -> Result<(), ExportError> {
        self.to_format(TraceFormat::Multifile, dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{HeaderMap, RequestDetails, ResponseBody, ResponseDetails, Timeline};
    use camino_tempfile::Utf8TempDir;
    use chrono::Utc;
    use url::Url;

    fn entry(index: usize) -> TraceEntry {
        TraceEntry::new(
            index,
            format!("e{index}"),
            RequestDetails::new(
                "GET",
                Url::parse("https://cdn.test/live.m3u8").expect("valid URL"),
                HeaderMap::new(),
            ),
            ResponseDetails::new(
                200,
                HeaderMap::new(),
                Some("application/vnd.apple.mpegurl".to_owned()),
                ResponseBody::from_bytes(b"#EXTM3U".to_vec()),
            ),
            Timeline::starting_at(Utc::now()),
        )
    }

    #[test]
    fn test_bodylogger_target_is_rejected() {
        let dir = Utf8TempDir::new().expect("tempdir");
        let entries = [entry(0)];
        let exporter = Exporter::from_entries(&entries);
        let result = exporter.to_format(TraceFormat::BodyLogger, &dir.path().join("out.log"));
        assert!(matches!(
            result,
            Err(ExportError::UnsupportedFormat {
                format: TraceFormat::BodyLogger
            })
        ));
    }

    #[test]
    fn test_subset_export_preserves_given_order() {
        let entries = [entry(0), entry(1), entry(2)];
        let exporter = Exporter::from_entries([&entries[2], &entries[0]]);
        let ids: Vec<_> = exporter.entries().iter().map(|e| e.id()).collect();
        assert_eq!(ids, ["e2", "e0"]);
    }
}
