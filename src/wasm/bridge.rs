// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The WASM host bridge: instantiate modules, marshal requests/responses
//! across linear memory, and never let a host-side failure escape as a
//! fatal error (spec §4.A).
//!
//! The marshalling protocol here — the `+64` alloc margin, the
//! three-`0xA6` sentinel termination, the trailing-strip rule — is the
//! wire contract with module authors and must be reproduced bit-exactly
//! across implementations; see the scan loop in [`scan_for_sentinel`].

use prost::Message;
use wasmtime::Memory;

use crate::error::WasmError;
use crate::proto::{PipelineStep, WasmExitCode, WasmRequest, WasmResponse};
use crate::wasm::cache::WasmInstanceCache;

/// Three consecutive `0xA6` bytes terminate a WASM response (spec §4.A, §6).
const SENTINEL: u8 = 0xA6;
const TERMINATOR_LEN: u32 = 3;
/// Alloc margin added on top of the serialized request length to
/// accommodate module alignment requirements. Load-bearing; must be
/// preserved verbatim (spec §9).
const ALLOC_MARGIN: u32 = 64;

/// Bridges `PipelineStep` invocations to a cached WASM instance.
pub struct WasmBridge {
    cache: WasmInstanceCache,
}

impl WasmBridge {
    pub fn new() -> Self {
        Self {
            cache: WasmInstanceCache::new(),
        }
    }

    /// Drop the cached instance for `wasm_id`. Best-effort; see
    /// [`WasmInstanceCache::evict`].
    pub async fn evict(&self, wasm_id: &str) {
        self.cache.evict(wasm_id).await;
    }

    /// Release every cached instance. Called on client shutdown (spec
    /// §4.F).
    pub async fn release_all(&self) {
        self.cache.clear().await;
    }

    /// Run `step`'s WASM function against `input`. Never fails: any
    /// host-side error (bad module, trap, memory error, decode
    /// failure) is reported as `WasmResponse { exit_code:
    /// INTERNAL_ERROR, .. }` instead of being propagated (spec §4.A).
    pub async fn exec(&self, step: &PipelineStep, input: &[u8]) -> WasmResponse {
        match self.try_exec(step, input).await {
            Ok(resp) => resp,
            Err(err) => WasmResponse {
                exit_code: WasmExitCode::InternalError as i32,
                exit_msg: format!("Failed to execute WASM: {err}"),
                output_payload: Vec::new(),
                output_step: Vec::new(),
            },
        }
    }

    async fn try_exec(&self, step: &PipelineStep, input: &[u8]) -> Result<WasmResponse, WasmError> {
        let instance = self.cache.get_or_create(&step.wasm_id, &step.wasm_bytes).await?;

        // The module already has its own copy of its bytes; don't ship
        // them again on every invocation (spec §4.A step 1).
        let mut step_for_wire = step.clone();
        step_for_wire.wasm_bytes = Vec::new();

        let request = WasmRequest {
            input: input.to_vec(),
            step: Some(step_for_wire),
        };

        let mut serialized = Vec::with_capacity(request.encoded_len());
        request.encode(&mut serialized).map_err(WasmError::Encode)?;

        let mut store = instance.store.lock().await;

        let memory = instance
            .instance
            .get_memory(&mut *store, "memory")
            .ok_or(WasmError::MissingMemory)?;

        let alloc = instance
            .instance
            .get_typed_func::<u32, u32>(&mut *store, "alloc")
            .map_err(|_| WasmError::MissingAlloc)?;

        let ptr = alloc
            .call(&mut *store, serialized.len() as u32 + ALLOC_MARGIN)
            .map_err(WasmError::Trap)?;

        memory
            .write(&mut *store, ptr as usize, &serialized)
            .map_err(|e| WasmError::Trap(e.into()))?;

        let func = instance
            .instance
            .get_typed_func::<(u32, u32), u32>(&mut *store, &step.wasm_function)
            .map_err(|_| WasmError::MissingFunction(step.wasm_function.clone()))?;

        let response_ptr = func
            .call(&mut *store, (ptr, serialized.len() as u32))
            .map_err(WasmError::Trap)?;

        let mem_data = memory.data(&mut *store);
        let payload = scan_for_sentinel(mem_data, response_ptr as usize, None)?;

        WasmResponse::decode(payload.as_slice()).map_err(WasmError::Decode)
    }
}

impl Default for WasmBridge {
    fn default() -> Self {
        Self::new()
    }
}

/// Scan `memory` starting at `ptr` until three consecutive `0xA6`
/// sentinel bytes have been seen (or `length` bytes have been consumed,
/// if provided), then strip the trailing sentinels (spec §4.A steps
/// 6-8). Pure and allocation-free apart from the returned buffer, so it
/// can be tested without a live WASM instance.
pub fn scan_for_sentinel(
    memory: &[u8],
    ptr: usize,
    length: Option<usize>,
) -> Result<Vec<u8>, WasmError> {
    if ptr > memory.len() {
        return Err(WasmError::PointerOutOfBounds);
    }
    if let Some(len) = length {
        if ptr + len > memory.len() {
            return Err(WasmError::PointerOutOfBounds);
        }
    }

    let mut result = Vec::new();
    let mut consecutive_sentinels: u32 = 0;
    let mut consumed = 0usize;
    let mut terminated = false;

    for &byte in &memory[ptr..] {
        if let Some(len) = length {
            if consumed == len {
                break;
            }
        }

        result.push(byte);
        consumed += 1;

        if byte == SENTINEL {
            consecutive_sentinels += 1;
            if consecutive_sentinels == TERMINATOR_LEN {
                terminated = true;
                break;
            }
        } else {
            consecutive_sentinels = 0;
        }
    }

    if !terminated {
        return Err(WasmError::NoTerminator);
    }

    while result.last() == Some(&SENTINEL) {
        result.pop();
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::PipelineStep;

    /// A module exporting `memory`/`alloc`/`run`, where `run` ignores
    /// its input entirely and always returns a canned, hand-encoded
    /// `WasmResponse { exit_code: SUCCESS, output_payload: b"ok" }`
    /// framed with the sentinel terminator. Exercises the full
    /// marshalling path through a real `wasmtime` instance, the way
    /// the teacher's own WASM backend tests do.
    fn echo_ok_module() -> Vec<u8> {
        wat::parse_str(
            r#"
            (module
                (memory (export "memory") 1)
                (func (export "alloc") (param $size i32) (result i32)
                    (i32.const 2000))
                (func (export "run") (param $ptr i32) (param $len i32) (result i32)
                    (i32.store8 (i32.const 1000) (i32.const 8))
                    (i32.store8 (i32.const 1001) (i32.const 1))
                    (i32.store8 (i32.const 1002) (i32.const 26))
                    (i32.store8 (i32.const 1003) (i32.const 2))
                    (i32.store8 (i32.const 1004) (i32.const 111))
                    (i32.store8 (i32.const 1005) (i32.const 107))
                    (i32.store8 (i32.const 1006) (i32.const 166))
                    (i32.store8 (i32.const 1007) (i32.const 166))
                    (i32.store8 (i32.const 1008) (i32.const 166))
                    (i32.const 1000))
            )
            "#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn exec_round_trips_through_a_real_instance() {
        let bridge = WasmBridge::new();
        let step = PipelineStep {
            name: "echo".to_string(),
            wasm_id: "echo-ok".to_string(),
            wasm_function: "run".to_string(),
            wasm_bytes: echo_ok_module(),
            on_success: vec![],
            on_failure: vec![],
            step_config: None,
        };

        let resp = bridge.exec(&step, b"anything").await;

        assert_eq!(resp.exit_code, WasmExitCode::Success as i32);
        assert_eq!(resp.output_payload, b"ok");
    }

    #[tokio::test]
    async fn exec_caches_the_instance_across_calls() {
        let bridge = WasmBridge::new();
        let step = PipelineStep {
            name: "echo".to_string(),
            wasm_id: "echo-ok-cached".to_string(),
            wasm_function: "run".to_string(),
            wasm_bytes: echo_ok_module(),
            on_success: vec![],
            on_failure: vec![],
            step_config: None,
        };

        let first = bridge.exec(&step, b"one").await;
        // Second call carries no wasm_bytes, as the processor does once
        // a `wasm_id` is already cached; this must still succeed.
        let mut cached_step = step.clone();
        cached_step.wasm_bytes = Vec::new();
        let second = bridge.exec(&cached_step, b"two").await;

        assert_eq!(first.exit_code, WasmExitCode::Success as i32);
        assert_eq!(second.exit_code, WasmExitCode::Success as i32);
        assert_eq!(second.output_payload, b"ok");
    }

    #[test]
    fn strips_trailing_sentinels() {
        let mut memory = vec![0u8; 16];
        memory[0..5].copy_from_slice(b"hello");
        memory[5] = SENTINEL;
        memory[6] = SENTINEL;
        memory[7] = SENTINEL;
        memory[8] = 0xFF; // garbage past the terminator must be ignored

        let payload = scan_for_sentinel(&memory, 0, None).unwrap();
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn sentinel_bytes_inside_the_payload_do_not_terminate_early() {
        let mut memory = Vec::new();
        memory.push(SENTINEL);
        memory.push(SENTINEL);
        memory.extend_from_slice(b"mid");
        memory.push(SENTINEL);
        memory.push(SENTINEL);
        memory.push(SENTINEL);

        let payload = scan_for_sentinel(&memory, 0, None).unwrap();
        assert_eq!(payload, [SENTINEL, SENTINEL, b'm', b'i', b'd']);
    }

    #[test]
    fn pointer_past_memory_is_out_of_bounds() {
        let memory = vec![0u8; 4];
        let err = scan_for_sentinel(&memory, 10, None).unwrap_err();
        assert!(matches!(err, WasmError::PointerOutOfBounds));
    }

    #[test]
    fn missing_terminator_is_an_error() {
        let memory = vec![1, 2, 3, 4];
        let err = scan_for_sentinel(&memory, 0, None).unwrap_err();
        assert!(matches!(err, WasmError::NoTerminator));
    }

    #[test]
    fn empty_payload_before_terminator() {
        let memory = vec![SENTINEL, SENTINEL, SENTINEL];
        let payload = scan_for_sentinel(&memory, 0, None).unwrap();
        assert!(payload.is_empty());
    }
}
