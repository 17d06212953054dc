// Copyright (c) The abrtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for abrtrace: reconstructing Adaptive-Bitrate (ABR)
//! streaming sessions from captured HTTP traffic.
//!
//! A capture file or directory is opened into a [`Trace`](trace::Trace), an
//! ordered, immutable sequence of HTTP transactions. The per-trace
//! [`AbrDetector`](abr::AbrDetector) classifies which transactions are HLS or
//! DASH manifest requests and canonicalizes their URLs so that repeated
//! refreshes of the same live playlist group together. A
//! [`ManifestStream`](abr::ManifestStream) is the chronological sequence of
//! those refreshes and supports time-tolerant and relative navigation. The
//! [`Exporter`](export::Exporter) writes a trace, or any filtered subset of
//! it, back out in one of the supported capture formats.
//!
//! Supported formats: HAR (via the `har-io` crate), Proxyman log v2,
//! bodylogger text logs (read-only), and multifile capture directories.

pub mod abr;
pub mod entry;
pub mod errors;
pub mod export;
pub mod format;
mod helpers;
pub mod trace;

pub use trace::open;
