// Copyright (c) The abrtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! ABR manifest detection: format classification, URL canonicalization, and
//! the chronological manifest stream view.

mod detector;
mod stream;

pub use detector::*;
pub use stream::*;

use std::{fmt, str::FromStr};
use url::Url;

/// MIME types that identify an HLS playlist. Compared ASCII-case-insensitively
/// after stripping parameters.
const HLS_MIME_TYPES: &[&str] = &["application/vnd.apple.mpegurl", "application/x-mpegurl"];

/// MIME types that identify a DASH manifest.
const DASH_MIME_TYPES: &[&str] = &["application/dash+xml", "application/dash-xml"];

/// Catch-all MIME types that carry no real type information. A response
/// tagged with one of these (or with no MIME type at all) falls back to
/// URL-extension classification.
const GENERIC_MIME_TYPES: &[&str] = &[
    "application/octet-stream",
    "binary/octet-stream",
    "text/plain",
];

/// An Adaptive-Bitrate streaming format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AbrFormat {
    /// Apple HTTP Live Streaming (`.m3u8` playlists).
    Hls,
    /// MPEG-DASH (`.mpd` manifests).
    Dash,
}

impl AbrFormat {
    /// Classifies a MIME type. Parameters (`; charset=...`) are stripped and
    /// the comparison ignores ASCII case.
    pub fn from_mime_type(mime_type: &str) -> Option<Self> {
        let essence = crate::helpers::strip_mime_params(mime_type);
        if HLS_MIME_TYPES.iter().any(|m| essence.eq_ignore_ascii_case(m)) {
            Some(Self::Hls)
        } else if DASH_MIME_TYPES.iter().any(|m| essence.eq_ignore_ascii_case(m)) {
            Some(Self::Dash)
        } else {
            None
        }
    }

    /// Classifies a bare path extension (without the leading dot).
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension {
            "m3u8" => Some(Self::Hls),
            "mpd" => Some(Self::Dash),
            _ => None,
        }
    }

    /// Classifies a URL by the extension of its last path segment.
    pub fn from_url(url: &Url) -> Option<Self> {
        let last_segment = url.path().rsplit('/').next().unwrap_or_default();
        let (_, extension) = last_segment.rsplit_once('.')?;
        Self::from_extension(extension)
    }

    /// Classifies a response by MIME type and URL, in that order.
    ///
    /// A recognized manifest MIME type wins even if the URL extension
    /// disagrees. The URL extension is consulted only when the MIME type is
    /// absent or one of the generic catch-alls; a present, specific,
    /// non-manifest MIME type means the response is not a manifest.
    pub fn classify(mime_type: Option<&str>, url: &Url) -> Option<Self> {
        match mime_type {
            Some(mime_type) => {
                if let Some(format) = Self::from_mime_type(mime_type) {
                    Some(format)
                } else if is_generic_mime_type(mime_type) {
                    Self::from_url(url)
                } else {
                    None
                }
            }
            None => Self::from_url(url),
        }
    }

    /// The conventional file extension for this format, with the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Hls => ".m3u8",
            Self::Dash => ".mpd",
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Hls => "HLS",
            Self::Dash => "DASH",
        }
    }
}

impl fmt::Display for AbrFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AbrFormat {
    type Err = UnknownAbrFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("hls") {
            Ok(Self::Hls)
        } else if s.eq_ignore_ascii_case("dash") {
            Ok(Self::Dash)
        } else {
            Err(UnknownAbrFormat {
                input: s.to_owned(),
            })
        }
    }
}

pub use crate::errors::UnknownAbrFormat;

fn is_generic_mime_type(mime_type: &str) -> bool {
    let essence = crate::helpers::strip_mime_params(mime_type);
    GENERIC_MIME_TYPES
        .iter()
        .any(|m| essence.eq_ignore_ascii_case(m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("application/vnd.apple.mpegurl", Some(AbrFormat::Hls); "hls standard")]
    #[test_case("application/x-mpegURL", Some(AbrFormat::Hls); "hls variant casing")]
    #[test_case("application/vnd.apple.mpegurl; charset=utf-8", Some(AbrFormat::Hls); "hls with params")]
    #[test_case("application/dash+xml", Some(AbrFormat::Dash); "dash standard")]
    #[test_case("application/dash-xml", Some(AbrFormat::Dash); "dash legacy")]
    #[test_case("video/mp2t", None; "segment mime")]
    fn test_from_mime_type(input: &str, expected: Option<AbrFormat>) {
        assert_eq!(AbrFormat::from_mime_type(input), expected);
    }

    #[test]
    fn test_from_url_uses_last_segment() {
        let url = Url::parse("https://cdn.test/v1.mpd/segments/chunk.ts").expect("valid URL");
        assert_eq!(AbrFormat::from_url(&url), None);

        let url = Url::parse("https://cdn.test/live/master.m3u8?token=x").expect("valid URL");
        assert_eq!(AbrFormat::from_url(&url), Some(AbrFormat::Hls));
    }

    #[test]
    fn test_classify_mime_wins_over_extension() {
        // A DASH MIME type on an .m3u8 URL classifies as DASH.
        let url = Url::parse("https://cdn.test/live.m3u8").expect("valid URL");
        assert_eq!(
            AbrFormat::classify(Some("application/dash+xml"), &url),
            Some(AbrFormat::Dash)
        );
    }

    #[test_case(None; "absent mime")]
    #[test_case(Some("application/octet-stream"); "octet stream")]
    #[test_case(Some("text/plain"); "plain text")]
    fn test_classify_falls_back_to_extension(mime_type: Option<&str>) {
        let url = Url::parse("https://cdn.test/manifest.mpd").expect("valid URL");
        assert_eq!(AbrFormat::classify(mime_type, &url), Some(AbrFormat::Dash));
    }

    #[test]
    fn test_classify_specific_mime_suppresses_extension() {
        // image/png on an .m3u8 URL is not a manifest.
        let url = Url::parse("https://cdn.test/live.m3u8").expect("valid URL");
        assert_eq!(AbrFormat::classify(Some("image/png"), &url), None);
    }

    #[test]
    fn test_from_str_round_trips() {
        assert_eq!("hls".parse::<AbrFormat>().expect("valid"), AbrFormat::Hls);
        assert_eq!("DASH".parse::<AbrFormat>().expect("valid"), AbrFormat::Dash);
        assert!("smooth".parse::<AbrFormat>().is_err());
    }
}
