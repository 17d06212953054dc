// Copyright (c) The abrtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Read and generate HTTP Archive (HAR) 1.2 files in Rust.
//!
//! This crate models the subset of the HAR format that HTTP capture tooling
//! actually exchanges: the `log` envelope, entries with request/response
//! pairs, header and query-parameter lists, response content (text or
//! base64), and per-entry timings. Fields that are optional in the wild are
//! optional here, and unknown input fields are ignored rather than rejected.

mod archive;
mod errors;

pub use archive::*;
pub use errors::*;
