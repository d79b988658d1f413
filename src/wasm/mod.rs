// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The WASM host bridge (spec §4.A): module instantiation, the linear
//! memory marshalling contract, and the per-`wasm_id` instance cache.

mod bridge;
mod cache;

pub use bridge::{scan_for_sentinel, WasmBridge};
pub use cache::WasmInstanceCache;
