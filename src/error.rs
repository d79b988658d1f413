// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Crate-wide error types.
//!
//! Each fallible subsystem gets its own variant family, following the
//! teacher repo's convention of one `thiserror` enum per concern rather
//! than a single catch-all. `process()` never returns one of these: WASM
//! failures are absorbed into a `WasmResponse` and reported through
//! `ProcessResponse.message` instead (§7 of the spec).

use thiserror::Error;

/// Errors raised while constructing or validating a [`crate::config::StreamdalConfig`].
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("service_name is required")]
    MissingServiceName,

    #[error("grpc_url is required")]
    MissingGrpcUrl,

    #[error("grpc_port is required")]
    MissingGrpcPort,

    #[error("grpc_token is required")]
    MissingGrpcToken,
}

/// Errors raised during the registration handshake or while the command
/// stream is being consumed.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to connect to control plane at {0}")]
    Connect(#[source] tonic::transport::Error),

    #[error("registration rejected by control plane: {0}")]
    RegistrationFailed(#[source] tonic::Status),

    #[error("command stream ended: {0}")]
    StreamClosed(#[source] tonic::Status),
}

/// Errors surfaced by the WASM host bridge. Always caught at the
/// boundary of [`crate::wasm::WasmBridge::exec`] and converted into a
/// `WasmResponse { exit_code: INTERNAL_ERROR, .. }`; never propagated.
#[derive(Error, Debug)]
pub enum WasmError {
    #[error("failed to instantiate wasm module: {0}")]
    Instantiate(#[source] anyhow::Error),

    #[error("module does not export 'memory'")]
    MissingMemory,

    #[error("module does not export 'alloc'")]
    MissingAlloc,

    #[error("module does not export function '{0}'")]
    MissingFunction(String),

    #[error("WASM memory pointer out of bounds")]
    PointerOutOfBounds,

    #[error("no terminators found in response data")]
    NoTerminator,

    #[error("wasm trap: {0}")]
    Trap(#[source] anyhow::Error),

    #[error("failed to decode wasm response: {0}")]
    Decode(#[source] prost::DecodeError),

    #[error("failed to encode wasm request: {0}")]
    Encode(#[source] prost::EncodeError),
}
