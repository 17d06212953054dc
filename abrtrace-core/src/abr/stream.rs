// Copyright (c) The abrtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{abr::AbrFormat, entry::TraceEntry, errors::NotInStream};
use chrono::{DateTime, TimeDelta, Utc};
use std::{fmt, ops::Index, time::Duration};
use url::Url;

/// Which entry to select relative to a target instant in
/// [`ManifestStream::find_entry_by_time`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimePosition {
    /// The entry minimizing the absolute distance to the target; equal
    /// distances prefer the earlier entry.
    Nearest,
    /// The entry with the greatest request-start at or before the target.
    Before,
    /// The entry with the smallest request-start at or after the target.
    After,
}

/// A direction for relative stepping through a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Toward later entries.
    Forward,
    /// Toward earlier entries.
    Backward,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forward => f.write_str("forward"),
            Self::Backward => f.write_str("backward"),
        }
    }
}

/// The chronological sequence of all captured requests to one canonical
/// manifest URL.
///
/// A stream is a non-owning view into its trace: it borrows the entries and
/// holds no independent storage. Entries are sorted ascending by
/// request-start, ties broken by original capture index; entries without a
/// request-start sort first and are never candidates for time lookup.
/// Streams are never empty.
#[derive(Clone, Debug)]
pub struct ManifestStream<'trace> {
    canonical_url: Url,
    format: Option<AbrFormat>,
    entries: Vec<&'trace TraceEntry>,
    /// Number of leading entries without a request-start instant.
    untimed: usize,
    /// Request-start instants for `entries[untimed..]`, ascending.
    timestamps: Vec<DateTime<Utc>>,
}

impl<'trace> ManifestStream<'trace> {
    pub(crate) fn new(canonical_url: Url, mut entries: Vec<&'trace TraceEntry>) -> Self {
        debug_assert!(!entries.is_empty(), "manifest streams are never empty");
        entries.sort_by_key(|entry| (entry.timeline().request_start(), entry.index()));

        let untimed = entries
            .iter()
            .take_while(|entry| entry.timeline().request_start().is_none())
            .count();
        let timestamps = entries[untimed..]
            .iter()
            .filter_map(|entry| entry.timeline().request_start())
            .collect();
        let format = entries.iter().find_map(|entry| entry.abr_format());

        Self {
            canonical_url,
            format,
            entries,
            untimed,
            timestamps,
        }
    }

    /// The canonical URL shared by this stream's entries.
    pub fn canonical_url(&self) -> &Url {
        &self.canonical_url
    }

    /// The canonical request path (query parameters stripped), for display
    /// and labeling.
    pub fn original_path(&self) -> &str {
        self.canonical_url.path()
    }

    /// The ABR format of this stream, classified from its entries.
    pub fn format(&self) -> Option<AbrFormat> {
        self.format
    }

    /// The number of entries in the stream. Always at least 1.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the stream has no entries. Present for API
    /// completeness; constructed streams are never empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entry at the given position in time order.
    pub fn get(&self, index: usize) -> Option<&'trace TraceEntry> {
        self.entries.get(index).copied()
    }

    /// The earliest entry.
    pub fn first(&self) -> &'trace TraceEntry {
        self.entries[0]
    }

    /// The latest entry.
    pub fn last(&self) -> &'trace TraceEntry {
        self.entries[self.entries.len() - 1]
    }

    /// The earliest request-start instant among the entries, if any entry
    /// carries one.
    pub fn first_request_start(&self) -> Option<DateTime<Utc>> {
        self.timestamps.first().copied()
    }

    /// The latest request-start instant among the entries.
    pub fn last_request_start(&self) -> Option<DateTime<Utc>> {
        self.timestamps.last().copied()
    }

    /// Iterates over the entries in time order.
    pub fn iter(&self) -> impl Iterator<Item = &'trace TraceEntry> + '_ {
        self.entries.iter().copied()
    }

    /// Finds an entry by request-start time.
    ///
    /// `tolerance` bounds the allowed distance: the absolute distance for
    /// [`TimePosition::Nearest`], the positive distance for
    /// [`TimePosition::Before`] and [`TimePosition::After`]. When no entry
    /// satisfies the bound the result is `None`, never an error.
    pub fn find_entry_by_time(
        &self,
        target: DateTime<Utc>,
        position: TimePosition,
        tolerance: Duration,
    ) -> Option<&'trace TraceEntry> {
        let tolerance = TimeDelta::from_std(tolerance).unwrap_or(TimeDelta::MAX);

        // The candidate on each side of the target, tolerance applied.
        let before = {
            let i = self.timestamps.partition_point(|ts| *ts <= target);
            i.checked_sub(1)
                .map(|i| (self.timestamps[i], self.entries[self.untimed + i]))
                .filter(|(ts, _)| target - *ts <= tolerance)
        };
        let after = {
            let i = self.timestamps.partition_point(|ts| *ts < target);
            self.timestamps
                .get(i)
                .map(|ts| (*ts, self.entries[self.untimed + i]))
                .filter(|(ts, _)| *ts - target <= tolerance)
        };

        match position {
            TimePosition::Before => before.map(|(_, entry)| entry),
            TimePosition::After => after.map(|(_, entry)| entry),
            TimePosition::Nearest => match (before, after) {
                (Some((before_ts, before_entry)), Some((after_ts, after_entry))) => {
                    // Equal distances prefer the earlier entry.
                    if target - before_ts <= after_ts - target {
                        Some(before_entry)
                    } else {
                        Some(after_entry)
                    }
                }
                (Some((_, entry)), None) | (None, Some((_, entry))) => Some(entry),
                (None, None) => None,
            },
        }
    }

    /// Returns the entry `n` positions away from `entry` in `direction`.
    ///
    /// `entry` must be a member of this stream; passing an entry from a
    /// different stream or trace is a precondition violation reported as
    /// [`NotInStream`]. A step landing outside the stream is `Ok(None)`.
    pub fn relative_entry(
        &self,
        entry: &TraceEntry,
        direction: Direction,
        n: usize,
    ) -> Result<Option<&'trace TraceEntry>, NotInStream> {
        let position = self
            .entries
            .iter()
            .position(|member| member.id() == entry.id())
            .ok_or_else(|| NotInStream::new(entry.id()))?;

        let target = match direction {
            Direction::Forward => position.checked_add(n),
            Direction::Backward => position.checked_sub(n),
        };
        Ok(target.and_then(|index| self.entries.get(index).copied()))
    }
}

impl<'trace> Index<usize> for ManifestStream<'trace> {
    type Output = TraceEntry;

    fn index(&self, index: usize) -> &Self::Output {
        self.entries[index]
    }
}

impl<'a, 'trace> IntoIterator for &'a ManifestStream<'trace> {
    type Item = &'trace TraceEntry;
    type IntoIter = std::vec::IntoIter<&'trace TraceEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.clone().into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{HeaderMap, RequestDetails, ResponseBody, ResponseDetails, Timeline};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    const HLS_MIME: &str = "application/vnd.apple.mpegurl";

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
            .single()
            .expect("valid instant")
    }

    fn manifest_entry(index: usize, start: Option<DateTime<Utc>>) -> TraceEntry {
        let url = Url::parse("https://x.test/live.m3u8").expect("valid URL");
        TraceEntry::new(
            index,
            format!("e{index}"),
            RequestDetails::new("GET", url, HeaderMap::new()),
            ResponseDetails::new(
                200,
                HeaderMap::new(),
                Some(HLS_MIME.to_owned()),
                ResponseBody::default(),
            ),
            Timeline::new(start, None, None, None),
        )
    }

    fn stream(entries: &[TraceEntry]) -> ManifestStream<'_> {
        ManifestStream::new(
            Url::parse("https://x.test/live.m3u8").expect("valid URL"),
            entries.iter().collect(),
        )
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_entries_sorted_by_time_then_index() {
        let t = base_time();
        let entries = vec![
            manifest_entry(0, Some(t + TimeDelta::seconds(20))),
            manifest_entry(1, Some(t)),
            manifest_entry(2, Some(t + TimeDelta::seconds(10))),
            manifest_entry(3, Some(t)),
        ];
        let stream = stream(&entries);
        let ids: Vec<_> = stream.iter().map(TraceEntry::id).collect();
        assert_eq!(ids, ["e1", "e3", "e2", "e0"]);
        assert_eq!(stream.format(), Some(AbrFormat::Hls));
    }

    #[test]
    fn test_find_before_and_after_bracket_target() {
        let t = base_time();
        let entries: Vec<_> = (0..3)
            .map(|i| manifest_entry(i, Some(t + TimeDelta::seconds(10 * i as i64))))
            .collect();
        let stream = stream(&entries);
        let target = t + TimeDelta::seconds(14);

        let before = stream
            .find_entry_by_time(target, TimePosition::Before, secs(3600))
            .expect("before exists");
        let after = stream
            .find_entry_by_time(target, TimePosition::After, secs(3600))
            .expect("after exists");
        assert_eq!(before.id(), "e1");
        assert_eq!(after.id(), "e2");
    }

    #[test]
    fn test_find_exact_match_counts_for_both_sides() {
        let t = base_time();
        let entries: Vec<_> = (0..3)
            .map(|i| manifest_entry(i, Some(t + TimeDelta::seconds(10 * i as i64))))
            .collect();
        let stream = stream(&entries);
        let target = t + TimeDelta::seconds(10);

        for position in [TimePosition::Before, TimePosition::After, TimePosition::Nearest] {
            let found = stream
                .find_entry_by_time(target, position, secs(0))
                .expect("exact match within zero tolerance");
            assert_eq!(found.id(), "e1");
        }
    }

    #[test]
    fn test_find_tolerance_bounds_result() {
        let t = base_time();
        let entries: Vec<_> = (0..3)
            .map(|i| manifest_entry(i, Some(t + TimeDelta::seconds(10 * i as i64))))
            .collect();
        let stream = stream(&entries);
        let target = t + TimeDelta::seconds(14);

        assert!(
            stream
                .find_entry_by_time(target, TimePosition::Before, secs(3))
                .is_none(),
            "e1 is 4s before the target, outside a 3s tolerance"
        );
        assert!(
            stream
                .find_entry_by_time(target, TimePosition::After, secs(5))
                .is_none(),
            "e2 is 6s after the target, outside a 5s tolerance"
        );
        let nearest = stream
            .find_entry_by_time(target, TimePosition::Nearest, secs(5))
            .expect("e1 is within 5s");
        assert_eq!(nearest.id(), "e1");
    }

    #[test]
    fn test_find_nearest_equal_distance_prefers_earlier() {
        let t = base_time();
        let entries = vec![
            manifest_entry(0, Some(t)),
            manifest_entry(1, Some(t + TimeDelta::seconds(10))),
        ];
        let stream = stream(&entries);
        let nearest = stream
            .find_entry_by_time(t + TimeDelta::seconds(5), TimePosition::Nearest, secs(60))
            .expect("both candidates in range");
        assert_eq!(nearest.id(), "e0");
    }

    #[test]
    fn test_find_before_first_and_after_last() {
        let t = base_time();
        let entries = vec![manifest_entry(0, Some(t))];
        let stream = stream(&entries);

        assert!(
            stream
                .find_entry_by_time(t - TimeDelta::seconds(1), TimePosition::Before, secs(3600))
                .is_none()
        );
        assert!(
            stream
                .find_entry_by_time(t + TimeDelta::seconds(1), TimePosition::After, secs(3600))
                .is_none()
        );
    }

    #[test]
    fn test_untimed_entries_are_not_time_candidates() {
        let t = base_time();
        let entries = vec![manifest_entry(0, None), manifest_entry(1, Some(t))];
        let stream = stream(&entries);

        // The untimed entry sorts first but never matches a time lookup.
        assert_eq!(stream.first().id(), "e0");
        let found = stream
            .find_entry_by_time(t, TimePosition::Nearest, secs(3600))
            .expect("timed entry found");
        assert_eq!(found.id(), "e1");
    }

    #[test]
    fn test_relative_entry_round_trip() {
        let t = base_time();
        let entries: Vec<_> = (0..3)
            .map(|i| manifest_entry(i, Some(t + TimeDelta::seconds(10 * i as i64))))
            .collect();
        let stream = stream(&entries);

        let next = stream
            .relative_entry(&entries[1], Direction::Forward, 1)
            .expect("member")
            .expect("in range");
        assert_eq!(next.id(), "e2");
        let back = stream
            .relative_entry(next, Direction::Backward, 1)
            .expect("member")
            .expect("in range");
        assert_eq!(back.id(), "e1");
    }

    #[test]
    fn test_relative_entry_out_of_bounds_is_none() {
        let t = base_time();
        let entries: Vec<_> = (0..2)
            .map(|i| manifest_entry(i, Some(t + TimeDelta::seconds(10 * i as i64))))
            .collect();
        let stream = stream(&entries);

        assert_eq!(
            stream
                .relative_entry(&entries[0], Direction::Backward, 1)
                .expect("member"),
            None
        );
        assert_eq!(
            stream
                .relative_entry(&entries[1], Direction::Forward, 5)
                .expect("member"),
            None
        );
    }

    #[test]
    fn test_relative_entry_requires_membership() {
        let t = base_time();
        let entries = vec![manifest_entry(0, Some(t))];
        let stream = stream(&entries);
        let outsider = manifest_entry(99, Some(t));

        let result = stream.relative_entry(&outsider, Direction::Forward, 1);
        assert!(result.is_err(), "foreign entry must be a precondition error");
    }

    #[test]
    fn test_original_path() {
        let entries = vec![manifest_entry(0, Some(base_time()))];
        let stream = stream(&entries);
        assert_eq!(stream.original_path(), "/live.m3u8");
    }
}
