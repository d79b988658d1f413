// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! In-process client library for running server-assigned WASM
//! pipelines over application payloads.
//!
//! Applications construct one [`client::StreamdalClient`] per service
//! process and call [`client::StreamdalClient::process`] on the hot
//! path. Everything else — registration, pipeline assignment, metrics,
//! live tailing — happens in the background, driven by commands from
//! the control plane.
//!
//! This crate does not install a `tracing` subscriber; host
//! applications are expected to do that themselves.

pub mod audience;
pub mod client;
pub mod config;
pub mod error;
pub mod processor;
pub mod proto;
pub mod registry;
pub mod session;
pub mod tail;
pub mod telemetry;
pub mod types;
pub mod wasm;

pub use client::{ClientError, StreamdalClient};
pub use config::StreamdalConfig;
pub use types::{ProcessRequest, ProcessResponse};
