// Copyright (c) The abrtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use thiserror::Error;

/// An error that occurs while parsing a [`HarFile`](crate::HarFile).
///
/// Returned by [`HarFile::from_reader`](crate::HarFile::from_reader) and
/// friends. The underlying [`serde_json::Error`] carries the line and column
/// of the offending input.
#[derive(Debug, Error)]
#[error("error parsing HAR archive")]
pub struct ParseError {
    #[from]
    inner: serde_json::Error,
}

/// An error that occurs while serializing a [`HarFile`](crate::HarFile).
///
/// Returned by [`HarFile::serialize`](crate::HarFile::serialize) and
/// [`HarFile::to_string`](crate::HarFile::to_string).
#[derive(Debug, Error)]
#[error("error serializing HAR archive")]
pub struct SerializeError {
    #[from]
    inner: serde_json::Error,
}
