// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The in-process request/response pair for [`crate::client::StreamdalClient::process`]
//! (spec §3). These never cross the wire, so they live alongside the
//! rest of the data model rather than in the generated `proto` module.

/// A single payload submitted for pipeline processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRequest {
    /// `OperationType` as an `i32`, matching the wire enum's
    /// representation so callers can pass either the raw int or
    /// `OperationType::Producer as i32` without a conversion step.
    pub operation_type: i32,
    pub component_name: String,
    pub operation_name: String,
    pub data: Vec<u8>,
}

/// The result of running a [`ProcessRequest`] through its audience's
/// active pipelines. Always returned, never wrapped in `Result` (spec
/// §7): failures are reported through `error`/`message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResponse {
    pub data: Vec<u8>,
    pub error: bool,
    pub message: String,
}
