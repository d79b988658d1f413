// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

// Module declaration for generated protobuf code.
#[path = "streamdal.internal.v1.rs"]
pub mod internal_v1;

pub use internal_v1::*;
