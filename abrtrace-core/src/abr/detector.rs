// Copyright (c) The abrtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{abr::AbrFormat, entry::TraceEntry};
use std::collections::BTreeSet;
use url::Url;

/// Detection and canonicalization rules for ABR manifest URLs.
///
/// A detector holds the set of query parameter names to ignore during URL
/// canonicalization, so that repeated requests to the same live manifest with
/// rotating tokens or cache busters group together. Each
/// [`Trace`](crate::trace::Trace) owns one detector; mutating it affects only
/// subsequent detection and grouping calls, not manifest streams that were
/// already constructed.
///
/// Detection never fails: an entry that does not look like a manifest is a
/// `None`, not an error.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AbrDetector {
    ignored_query_params: BTreeSet<String>,
}

impl AbrDetector {
    /// Creates a detector with an empty ignore-set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one query parameter name to the ignore-set.
    ///
    /// Returns `&mut Self` so calls can be chained. Adding is idempotent and
    /// never removes previously ignored names.
    pub fn ignore_query_param(&mut self, name: impl Into<String>) -> &mut Self {
        self.ignored_query_params.insert(name.into());
        self
    }

    /// Adds several query parameter names to the ignore-set.
    ///
    /// Same contract as [`ignore_query_param`](Self::ignore_query_param):
    /// additive, idempotent, chainable.
    pub fn ignore_query_params<I, S>(&mut self, names: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored_query_params
            .extend(names.into_iter().map(Into::into));
        self
    }

    /// Iterates over the ignored query parameter names, in sorted order.
    pub fn ignored_query_params(&self) -> impl Iterator<Item = &str> + '_ {
        self.ignored_query_params.iter().map(String::as_str)
    }

    /// Returns true if the given query parameter name is ignored.
    pub fn is_ignored(&self, name: &str) -> bool {
        self.ignored_query_params.contains(name)
    }

    /// Canonicalizes a URL for manifest grouping.
    ///
    /// Drops the fragment, removes every query parameter whose name is in
    /// the ignore-set, and keeps the remaining parameters in their original
    /// relative order. Two URLs identify the same manifest iff their
    /// canonical forms (scheme, host, path, remaining query) are equal.
    /// Canonicalization is idempotent.
    pub fn canonicalize(&self, url: &Url) -> Url {
        let mut canonical = url.clone();
        canonical.set_fragment(None);

        if url.query().is_none() {
            return canonical;
        }

        let retained: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(name, _)| !self.ignored_query_params.contains(name.as_ref()))
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect();

        if retained.is_empty() {
            canonical.set_query(None);
        } else {
            canonical.query_pairs_mut().clear().extend_pairs(retained);
        }
        canonical
    }

    /// Classifies an entry per the manifest detection rules, using the
    /// response's resolved MIME type and the request URL.
    pub fn detect(&self, entry: &TraceEntry) -> Option<AbrFormat> {
        AbrFormat::classify(entry.response().mime_type(), entry.request().url())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn url(s: &str) -> Url {
        Url::parse(s).expect("test URL should parse")
    }

    #[test]
    fn test_canonicalize_strips_ignored_params() {
        let mut detector = AbrDetector::new();
        detector.ignore_query_param("tok");

        let canonical = detector.canonicalize(&url("https://x.test/live.m3u8?tok=1&b=2"));
        assert_eq!(canonical.as_str(), "https://x.test/live.m3u8?b=2");
    }

    #[test]
    fn test_canonicalize_preserves_remaining_order() {
        let mut detector = AbrDetector::new();
        detector.ignore_query_param("sid");

        let canonical =
            detector.canonicalize(&url("https://x.test/dash.mpd?z=1&sid=9&a=2&z=3"));
        assert_eq!(canonical.as_str(), "https://x.test/dash.mpd?z=1&a=2&z=3");
    }

    #[test]
    fn test_canonicalize_drops_empty_query_and_fragment() {
        let mut detector = AbrDetector::new();
        detector.ignore_query_param("tok");

        let canonical = detector.canonicalize(&url("https://x.test/live.m3u8?tok=1#frag"));
        assert_eq!(canonical.as_str(), "https://x.test/live.m3u8");
    }

    #[test]
    fn test_canonicalize_is_idempotent() {
        let mut detector = AbrDetector::new();
        detector.ignore_query_params(["tok", "cb"]);

        let once = detector.canonicalize(&url("https://x.test/live.m3u8?tok=1&a=b%20c&cb=7"));
        let twice = detector.canonicalize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_ignore_set_is_monotonic_and_order_independent() {
        let mut split = AbrDetector::new();
        split.ignore_query_params(["a", "b"]).ignore_query_param("c");

        let mut joined = AbrDetector::new();
        joined.ignore_query_params(["c", "b", "a"]);

        assert_eq!(split, joined);

        // Re-adding an existing name changes nothing.
        split.ignore_query_param("a");
        assert_eq!(split, joined);
    }

    #[test]
    fn test_ignored_names_are_never_removed() {
        let mut detector = AbrDetector::new();
        detector.ignore_query_param("tok");
        detector.ignore_query_params(Vec::<String>::new());
        assert!(detector.is_ignored("tok"));
    }
}
