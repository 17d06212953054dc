// Copyright (c) The abrtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The canonical in-memory trace: an ordered, immutable-after-load sequence
//! of captured HTTP transactions plus the per-trace ABR detector.

use crate::{
    abr::{AbrDetector, AbrFormat, Direction, ManifestStream},
    entry::TraceEntry,
    errors::{EntryNotFound, ManifestStreamError, NextEntryError, OpenTraceError},
    format::TraceFormat,
};
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use std::{
    collections::{HashMap, hash_map::Entry},
    ops::Index,
    slice,
};
use tracing::warn;
use url::Url;

/// Opens a capture file or directory as a [`Trace`].
///
/// Dispatches through [`TraceFormat::detect`] and the matching format
/// adapter. Fails with a not-found error if `path` does not exist and an
/// unsupported-format error if no adapter recognizes it.
pub fn open(path: impl AsRef<Utf8Path>) -> Result<Trace, OpenTraceError> {
    let path = path.as_ref();
    let format = TraceFormat::detect(path)?;
    let entries = format.parse(path)?;
    let mut trace = Trace::from_entries(entries);
    trace.source = Some(TraceSource {
        path: path.to_owned(),
        format,
    });
    Ok(trace)
}

/// Where a trace was loaded from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceSource {
    /// The capture file or directory.
    pub path: Utf8PathBuf,

    /// The detected capture format.
    pub format: TraceFormat,
}

/// A pattern for partial-URL matching: a plain substring or a regex.
#[derive(Clone, Debug)]
pub enum UrlPattern {
    /// Matches URLs containing this substring.
    Substring(String),
    /// Matches URLs the regex finds a match in.
    Regex(Regex),
}

impl UrlPattern {
    fn matches(&self, url: &str) -> bool {
        match self {
            Self::Substring(needle) => url.contains(needle.as_str()),
            Self::Regex(regex) => regex.is_match(url),
        }
    }
}

impl From<&str> for UrlPattern {
    fn from(needle: &str) -> Self {
        Self::Substring(needle.to_owned())
    }
}

impl From<String> for UrlPattern {
    fn from(needle: String) -> Self {
        Self::Substring(needle)
    }
}

impl From<Regex> for UrlPattern {
    fn from(regex: Regex) -> Self {
        Self::Regex(regex)
    }
}

/// Entry selection criteria for [`Trace::filter`]. Criteria combine as a
/// logical AND; an empty filter matches every entry.
#[derive(Clone, Debug, Default)]
pub struct TraceFilter {
    host: Option<String>,
    url: Option<String>,
    path: Option<String>,
    partial_url: Option<UrlPattern>,
    mime_type: Option<String>,
}

impl TraceFilter {
    /// Creates an empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Matches entries whose URL host equals `host`, ASCII-case-insensitively.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Matches entries whose full URL equals `url` exactly.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Matches entries whose URL path equals `path` exactly.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Matches entries whose URL contains the substring or regex.
    pub fn partial_url(mut self, pattern: impl Into<UrlPattern>) -> Self {
        self.partial_url = Some(pattern.into());
        self
    }

    /// Matches entries whose resolved response MIME type equals `mime_type`.
    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    fn matches(&self, entry: &TraceEntry) -> bool {
        let url = entry.request().url();
        if let Some(host) = &self.host {
            let entry_host = url.host_str().unwrap_or_default();
            if !entry_host.eq_ignore_ascii_case(host) {
                return false;
            }
        }
        if let Some(exact) = &self.url {
            if url.as_str() != exact {
                return false;
            }
        }
        if let Some(path) = &self.path {
            if url.path() != path {
                return false;
            }
        }
        if let Some(pattern) = &self.partial_url {
            if !pattern.matches(url.as_str()) {
                return false;
            }
        }
        if let Some(mime_type) = &self.mime_type {
            if entry.response().mime_type() != Some(mime_type.as_str()) {
                return false;
            }
        }
        true
    }
}

/// A detected manifest URL, paired with its classified format.
///
/// The URL is the canonical form: ignored query parameters stripped,
/// remaining parameters in their original order.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DecoratedUrl {
    url: Url,
    format: AbrFormat,
}

impl DecoratedUrl {
    /// The canonical manifest URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The classified ABR format.
    pub fn format(&self) -> AbrFormat {
        self.format
    }
}

impl std::fmt::Display for DecoratedUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]", self.url, self.format)
    }
}

/// An ordered, immutable-after-load collection of captured HTTP transactions.
///
/// Entry ids are unique within a trace and `index` is a dense `0..n`
/// sequence matching source capture order. The trace owns one
/// [`AbrDetector`]; mutating its ignore-set affects subsequent detection and
/// grouping calls on this trace only, never manifest streams that were
/// already constructed.
///
/// A trace is not internally synchronized: callers that share one across
/// threads while reconfiguring the detector must serialize access
/// themselves.
#[derive(Clone, Debug)]
pub struct Trace {
    entries: Vec<TraceEntry>,
    source: Option<TraceSource>,
    detector: AbrDetector,
    id_index: HashMap<String, usize>,
}

impl Trace {
    /// Creates a trace from entries in source order.
    ///
    /// If two entries carry the same id the first one wins lookups; this is
    /// logged, since adapters are expected to assign unique ids.
    pub fn from_entries(entries: Vec<TraceEntry>) -> Self {
        let mut id_index: HashMap<String, usize> = HashMap::with_capacity(entries.len());
        for (position, entry) in entries.iter().enumerate() {
            match id_index.entry(entry.id().to_owned()) {
                Entry::Occupied(_) => warn!(
                    "duplicate entry id `{}`; lookups resolve to the first occurrence",
                    entry.id()
                ),
                Entry::Vacant(slot) => {
                    slot.insert(position);
                }
            }
        }

        Self {
            entries,
            source: None,
            detector: AbrDetector::new(),
            id_index,
        }
    }

    /// Opens a capture file or directory. See [`open`].
    pub fn open(path: impl AsRef<Utf8Path>) -> Result<Self, OpenTraceError> {
        open(path)
    }

    /// Where this trace was loaded from, if it came from a capture source.
    pub fn source(&self) -> Option<&TraceSource> {
        self.source.as_ref()
    }

    /// The ABR detector configuration for this trace.
    pub fn detector(&self) -> &AbrDetector {
        &self.detector
    }

    /// Mutable access to the detector, for configuring ignored query
    /// parameters:
    ///
    /// ```no_run
    /// # let mut trace: abrtrace_core::trace::Trace = unimplemented!();
    /// trace.detector_mut().ignore_query_params(["token", "cb"]);
    /// ```
    pub fn detector_mut(&mut self) -> &mut AbrDetector {
        &mut self.detector
    }

    /// The entries, in source capture order.
    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    /// The number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the trace has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the entries in source order.
    pub fn iter(&self) -> slice::Iter<'_, TraceEntry> {
        self.entries.iter()
    }

    /// The entry at the given source position.
    pub fn get(&self, index: usize) -> Option<&TraceEntry> {
        self.entries.get(index)
    }

    /// Returns the entries matching all criteria of `filter`, in source
    /// order. An empty result is a value, not an error.
    pub fn filter(&self, filter: &TraceFilter) -> Vec<&TraceEntry> {
        self.entries
            .iter()
            .filter(|entry| filter.matches(entry))
            .collect()
    }

    /// Looks up an entry by id.
    pub fn entry_by_id(&self, id: &str) -> Result<&TraceEntry, EntryNotFound> {
        self.id_index
            .get(id)
            .map(|&position| &self.entries[position])
            .ok_or_else(|| EntryNotFound::new(id))
    }

    /// Looks up several entries by id, returned in the order of the
    /// requested ids. Ids with no match are silently omitted; erroring on
    /// each miss would make batch lookups needlessly noisy.
    pub fn entries_by_ids<I, S>(&self, ids: I) -> Vec<&TraceEntry>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        ids.into_iter()
            .filter_map(|id| self.entry_by_id(id.as_ref()).ok())
            .collect()
    }

    /// All entries whose full request URL equals `url`, in source order.
    pub fn entries_for_url(&self, url: &Url) -> Vec<&TraceEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.request().url() == url)
            .collect()
    }

    /// All entries whose URL path equals `path`, in source order.
    pub fn entries_by_path(&self, path: &str) -> Vec<&TraceEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.request().url().path() == path)
            .collect()
    }

    /// All entries whose URL host matches `host`,
    /// ASCII-case-insensitively. `None` matches entries whose URL has no
    /// host (`data:` and friends).
    pub fn entries_by_host(&self, host: Option<&str>) -> Vec<&TraceEntry> {
        self.entries
            .iter()
            .filter(|entry| {
                let entry_host = entry.request().url().host_str();
                match (entry_host, host) {
                    (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                    (None, None) => true,
                    _ => false,
                }
            })
            .collect()
    }

    /// All entries whose URL matches the substring or regex pattern, in
    /// source order.
    pub fn entries_for_partial_url(&self, pattern: &UrlPattern) -> Vec<&TraceEntry> {
        self.entries
            .iter()
            .filter(|entry| pattern.matches(entry.request().url().as_str()))
            .collect()
    }

    /// Navigates from the entry with the given id within its manifest
    /// stream: returns the entry `n` positions away in `direction`.
    ///
    /// Fails if the id is unknown, if the entry does not classify as a
    /// manifest (and so belongs to no manifest stream), or if the step lands
    /// outside the stream.
    pub fn next_entry_by_id(
        &self,
        id: &str,
        direction: Direction,
        n: usize,
    ) -> Result<&TraceEntry, NextEntryError> {
        let entry = self
            .entry_by_id(id)
            .map_err(|_| NextEntryError::EntryNotFound { id: id.to_owned() })?;
        if self.detector.detect(entry).is_none() {
            return Err(NextEntryError::NotAManifestEntry { id: id.to_owned() });
        }

        let stream = self
            .manifest_stream(entry.request().url())
            .map_err(|_| NextEntryError::NotAManifestEntry { id: id.to_owned() })?;
        // The entry was found via its own URL, so stream membership holds.
        let relative = stream
            .relative_entry(entry, direction, n)
            .map_err(|_| NextEntryError::NotAManifestEntry { id: id.to_owned() })?;
        relative.ok_or(NextEntryError::OutOfRange {
            id: id.to_owned(),
            direction,
            n,
        })
    }

    /// All distinct ABR manifest URLs in this trace, in order of first
    /// appearance, optionally restricted to one format.
    ///
    /// Detection runs over every entry with the trace's detector;
    /// deduplication is by canonical key, so refreshes of one live manifest
    /// with rotating ignored query parameters yield a single
    /// [`DecoratedUrl`]. Never fails: a trace without manifests gives an
    /// empty list.
    pub fn abr_manifest_urls(&self, format: Option<AbrFormat>) -> Vec<DecoratedUrl> {
        let mut seen = std::collections::HashSet::new();
        let mut urls = Vec::new();

        for entry in &self.entries {
            let Some(entry_format) = self.detector.detect(entry) else {
                continue;
            };
            if format.is_some_and(|wanted| wanted != entry_format) {
                continue;
            }

            let canonical = self.detector.canonicalize(entry.request().url());
            if seen.insert(canonical.as_str().to_owned()) {
                urls.push(DecoratedUrl {
                    url: canonical,
                    format: entry_format,
                });
            }
        }
        urls
    }

    /// The manifest stream for the given URL: every entry whose request URL
    /// canonicalizes to the same manifest, in time order.
    ///
    /// The URL itself is canonicalized first, so any of the captured
    /// variants (with or without ignored query parameters) names the same
    /// stream. Fails with
    /// [`ManifestStreamError::NoMatchingEntries`] when nothing matches.
    pub fn manifest_stream(&self, url: &Url) -> Result<ManifestStream<'_>, ManifestStreamError> {
        let canonical = self.detector.canonicalize(url);
        let entries: Vec<&TraceEntry> = self
            .entries
            .iter()
            .filter(|entry| self.detector.canonicalize(entry.request().url()) == canonical)
            .collect();

        if entries.is_empty() {
            return Err(ManifestStreamError::NoMatchingEntries { url: url.clone() });
        }
        Ok(ManifestStream::new(canonical, entries))
    }
}

impl Index<usize> for Trace {
    type Output = TraceEntry;

    fn index(&self, index: usize) -> &Self::Output {
        &self.entries[index]
    }
}

impl<'a> IntoIterator for &'a Trace {
    type Item = &'a TraceEntry;
    type IntoIter = slice::Iter<'a, TraceEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
